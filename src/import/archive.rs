use std::fs::{self, File};
use std::future::Future;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use tempfile::{Builder, TempDir};
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

const STAGING_PREFIX: &str = "bundle-import.";
const IGNORED_FILE_NAMES: &[&str] = &[".DS_Store", ".localized"];
const IGNORED_PREFIX: &str = "__MACOSX";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to create staging directory")]
    Staging(#[source] io::Error),
    #[error("failed to buffer archive stream")]
    Spool(#[source] io::Error),
    #[error("failed to read archive")]
    Read(#[source] ZipError),
    #[error("archive entry escapes the staging directory: {0}")]
    UnsafeEntry(String),
    #[error("failed to extract {path}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Platform junk that archives pick up and bundles never contain.
pub fn is_ignored_entry(name: &str) -> bool {
    let name = name.trim_start_matches("./");
    if name.starts_with(IGNORED_PREFIX) {
        return true;
    }
    let last = name.trim_end_matches('/').rsplit('/').next().unwrap_or(name);
    IGNORED_FILE_NAMES.contains(&last)
}

/// Unpacks every non-ignored entry of `source` below `dest`, returning the
/// number of files written.
pub fn extract_archive<R: Read + Seek>(source: R, dest: &Path) -> Result<usize, ArchiveError> {
    let mut archive = ZipArchive::new(source).map_err(ArchiveError::Read)?;
    let mut written = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(ArchiveError::Read)?;
        let name = entry.name().to_string();
        if is_ignored_entry(&name) {
            debug!(target: "bundle_import", event = "archive_entry_skipped", entry = %name);
            continue;
        }
        let relative = entry
            .enclosed_name()
            .and_then(staged_relative_path)
            .ok_or_else(|| ArchiveError::UnsafeEntry(name.clone()))?;
        if relative.as_os_str().is_empty() {
            if entry.is_dir() {
                continue;
            }
            return Err(ArchiveError::UnsafeEntry(name));
        }
        let target = dest.join(&relative);
        let write_err = |source| ArchiveError::Write {
            path: name.clone(),
            source,
        };

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(write_err)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let mut out = File::create(&target).map_err(write_err)?;
        io::copy(&mut entry, &mut out).map_err(write_err)?;
        written += 1;
    }
    Ok(written)
}

/// Entry path below the staging root. `.` components are dropped; parent,
/// root and prefix components are refused.
fn staged_relative_path(path: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => relative.push(part),
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(relative)
}

/// Extracts `source` into a fresh staging directory, hands the directory to
/// `import_fn` and removes it again, whichever way the import ends.
pub async fn stage_archive<R, F, Fut, T, E>(source: R, import_fn: F) -> Result<T, E>
where
    R: Read + Seek,
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<ArchiveError>,
{
    let staging = Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir()
        .map_err(ArchiveError::Staging)?;
    run_staged(staging, source, import_fn).await
}

/// Same as [`stage_archive`], with the staging directory created under
/// `parent`.
pub async fn stage_archive_in<R, F, Fut, T, E>(
    parent: &Path,
    source: R,
    import_fn: F,
) -> Result<T, E>
where
    R: Read + Seek,
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<ArchiveError>,
{
    let staging = Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(parent)
        .map_err(ArchiveError::Staging)?;
    run_staged(staging, source, import_fn).await
}

/// Buffers a forward-only stream to an anonymous temp file first, since the
/// zip directory sits at the end of the archive.
pub async fn stage_archive_stream<R, F, Fut, T, E>(mut reader: R, import_fn: F) -> Result<T, E>
where
    R: Read,
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<ArchiveError>,
{
    let mut spool = tempfile::tempfile().map_err(ArchiveError::Spool)?;
    io::copy(&mut reader, &mut spool).map_err(ArchiveError::Spool)?;
    spool
        .seek(SeekFrom::Start(0))
        .map_err(ArchiveError::Spool)?;
    stage_archive(spool, import_fn).await
}

async fn run_staged<R, F, Fut, T, E>(staging: TempDir, source: R, import_fn: F) -> Result<T, E>
where
    R: Read + Seek,
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<ArchiveError>,
{
    let staged = staging.path().to_path_buf();
    let result = match extract_archive(source, &staged) {
        Ok(files) => {
            info!(
                target: "bundle_import",
                event = "archive_staged",
                path = %staged.display(),
                files
            );
            import_fn(staged.clone()).await
        }
        Err(err) => Err(E::from(err)),
    };

    if let Err(err) = staging.close() {
        warn!(
            target: "bundle_import",
            event = "staging_cleanup_failed",
            path = %staged.display(),
            error = %err
        );
    }
    result
}
