use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::import::{
    ImportStrategy, ImporterRegistry, RegistryError, SqlTemplateHandler, TableImporter,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read manifest {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid manifest")]
    Parse(#[from] serde_json::Error),
    #[error("manifest entry {name} has an empty sql statement")]
    EmptySql { name: String },
    #[error("manifest entry {name} has an empty table name")]
    EmptyTable { name: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// JSON description of a bundle: which files it holds, in import order, and
/// how each one is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportManifest {
    pub files: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub name: String,
    #[serde(flatten)]
    pub strategy: ManifestStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "camelCase")]
pub enum ManifestStrategy {
    Table {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table: Option<String>,
    },
    Lines {
        sql: String,
        #[serde(default, rename = "keepEmptyStrings")]
        keep_empty_strings: bool,
    },
}

impl ImportManifest {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.files.iter().map(|entry| entry.name.as_str()).collect()
    }

    /// Builds the registry the manifest describes, keeping its file order.
    pub fn into_registry(self) -> Result<ImporterRegistry, ConfigError> {
        let mut builder = ImporterRegistry::builder();
        for entry in self.files {
            let strategy = match entry.strategy {
                ManifestStrategy::Table { table: None } => ImportStrategy::table(),
                ManifestStrategy::Table { table: Some(table) } => {
                    if table.trim().is_empty() {
                        return Err(ConfigError::EmptyTable { name: entry.name });
                    }
                    ImportStrategy::whole_file(TableImporter::into_table(table))
                }
                ManifestStrategy::Lines {
                    sql,
                    keep_empty_strings,
                } => {
                    if sql.trim().is_empty() {
                        return Err(ConfigError::EmptySql { name: entry.name });
                    }
                    let handler = SqlTemplateHandler::new(sql);
                    if keep_empty_strings {
                        ImportStrategy::line_based(handler.keep_empty_strings())
                    } else {
                        ImportStrategy::line_based(handler)
                    }
                }
            };
            builder = builder.register(entry.name, strategy);
        }
        Ok(builder.build()?)
    }
}
