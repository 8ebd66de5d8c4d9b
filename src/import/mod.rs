pub mod archive;
pub mod execute;
pub mod lines;
pub mod records;
pub mod registry;
pub mod report;
pub mod table;
pub mod validator;

pub use archive::{
    extract_archive, is_ignored_entry, stage_archive, stage_archive_in, stage_archive_stream,
    ArchiveError,
};
pub use execute::{BundleImporter, FileImportError, ImportError};
pub use lines::{import_lines, LineError, LineHandler, LineImportError, SqlTemplateHandler};
pub use records::{Record, RecordError, RecordReader};
pub use registry::{ImportStrategy, ImporterRegistry, ImporterRegistryBuilder, RegistryError};
pub use report::{file_sha256, write_import_report, FileProgress, ProgressReport};
pub use table::{
    import_table, table_name_for_file, TableImportError, TableImporter, WholeFileImporter,
};
pub use validator::{validate_bundle_dir, ValidationError};

pub(crate) fn quote_ident(name: &str) -> String {
    let escaped = name.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}
