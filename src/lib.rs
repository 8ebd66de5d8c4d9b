//! Loads multi-file data bundles (a directory or a zip archive of
//! comma-separated files) into SQLite, all files in one transaction.

pub mod config;
pub mod db;
pub mod export;
pub mod import;
pub mod jobs;
pub mod logging;

pub use config::{ConfigError, ImportManifest, ManifestEntry, ManifestStrategy};
pub use export::{export_query, export_table, ExportError};
pub use import::{
    BundleImporter, ImportError, ImportStrategy, ImporterRegistry, ProgressReport, ValidationError,
};
pub use jobs::{JobHandle, JobId, JobLog, JobPool, JobStatus};
pub use logging::init_logging;
