use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("data directory \"{0}\" does not exist")]
    PathNotFound(String),
    #[error("\"{0}\" is not a directory")]
    NotADirectory(String),
    #[error("file \"{name}\" is unexpected (expected one of: {})", .expected.join(", "))]
    UnexpectedFile { name: String, expected: Vec<String> },
    #[error("\"{0}\" is missing")]
    MissingFile(String),
    #[error(
        "bundle does not match the expected files (unexpected: [{}]; missing: [{}]; expected: {})",
        .unexpected.join(", "),
        .missing.join(", "),
        .expected.join(", ")
    )]
    Mismatch {
        unexpected: Vec<String>,
        missing: Vec<String>,
        expected: Vec<String>,
    },
    #[error("failed to list {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ValidationError {
    pub fn unexpected_files(&self) -> Vec<&str> {
        match self {
            ValidationError::UnexpectedFile { name, .. } => vec![name.as_str()],
            ValidationError::Mismatch { unexpected, .. } => {
                unexpected.iter().map(String::as_str).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn missing_files(&self) -> Vec<&str> {
        match self {
            ValidationError::MissingFile(name) => vec![name.as_str()],
            ValidationError::Mismatch { missing, .. } => {
                missing.iter().map(String::as_str).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Checks that `dir` holds exactly the registered files: nothing extra,
/// nothing missing. Read-only.
pub fn validate_bundle_dir(dir: &Path, registered: &[&str]) -> Result<(), ValidationError> {
    if !dir.exists() {
        return Err(ValidationError::PathNotFound(dir.display().to_string()));
    }
    if !dir.is_dir() {
        return Err(ValidationError::NotADirectory(dir.display().to_string()));
    }

    let present = list_entries(dir)?;
    let expected: BTreeSet<&str> = registered.iter().copied().collect();

    let unexpected: Vec<String> = present
        .iter()
        .filter(|name| !expected.contains(name.as_str()))
        .cloned()
        .collect();
    let missing: Vec<String> = registered
        .iter()
        .filter(|name| !present.contains(**name))
        .map(|name| name.to_string())
        .collect();
    let expected_list: Vec<String> = registered.iter().map(|name| name.to_string()).collect();

    match (unexpected.as_slice(), missing.as_slice()) {
        ([], []) => Ok(()),
        ([name], []) => Err(ValidationError::UnexpectedFile {
            name: name.clone(),
            expected: expected_list,
        }),
        ([], [name]) => Err(ValidationError::MissingFile(name.clone())),
        _ => Err(ValidationError::Mismatch {
            unexpected,
            missing,
            expected: expected_list,
        }),
    }
}

fn list_entries(dir: &Path) -> Result<BTreeSet<String>, ValidationError> {
    let io_err = |source| ValidationError::Io {
        path: dir.display().to_string(),
        source,
    };
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        names.insert(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}
