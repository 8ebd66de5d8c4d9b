use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileProgress {
    pub file_name: String,
    pub rows: u64,
    pub sha256: String,
}

/// Row counts per imported file, in import order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub files: Vec<FileProgress>,
}

impl ProgressReport {
    pub fn record(&mut self, file_name: impl Into<String>, rows: u64, sha256: impl Into<String>) {
        self.files.push(FileProgress {
            file_name: file_name.into(),
            rows,
            sha256: sha256.into(),
        });
    }

    pub fn rows_for(&self, file_name: &str) -> Option<u64> {
        self.files
            .iter()
            .find(|entry| entry.file_name == file_name)
            .map(|entry| entry.rows)
    }

    pub fn total_rows(&self) -> u64 {
        self.files.iter().map(|entry| entry.rows).sum()
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.files.iter().map(|entry| entry.file_name.as_str()).collect()
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.files {
            writeln!(
                f,
                "  - processed {} rows from {}",
                entry.rows, entry.file_name
            )?;
        }
        Ok(())
    }
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("read {} for hashing", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportReportFile<'a> {
    generated_at: String,
    bundle_path: String,
    total_rows: u64,
    progress: &'a ProgressReport,
}

/// Writes `report` as a timestamped JSON file under `reports_dir`.
pub fn write_import_report(
    reports_dir: &Path,
    bundle_path: &Path,
    report: &ProgressReport,
) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("create reports directory {}", reports_dir.display()))?;

    let timestamp = Utc::now().format("import-%Y%m%d-%H%M%S%.3f.json");
    let path = reports_dir.join(timestamp.to_string());
    let payload = ImportReportFile {
        generated_at: Utc::now().to_rfc3339(),
        bundle_path: bundle_path.display().to_string(),
        total_rows: report.total_rows(),
        progress: report,
    };
    let json = serde_json::to_string_pretty(&payload).context("serialize import report")?;
    fs::write(&path, json).with_context(|| format!("write import report {}", path.display()))?;
    Ok(path)
}
