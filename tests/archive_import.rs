#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use std::fs;
use std::io::Cursor;

use bundle_import::import::{stage_archive_in, ArchiveError};
use bundle_import::{ImportError, ValidationError};
use tempfile::TempDir;
use util::{
    accounts_csv, count, finance_importer, temp_pool, transactions_csv, write_zip, zip_bytes,
};

fn staging_leftovers(parent: &TempDir) -> usize {
    fs::read_dir(parent.path()).unwrap().count()
}

#[tokio::test]
async fn zip_file_with_platform_junk_imports() {
    let pool = temp_pool().await;
    let scratch = TempDir::new().unwrap();
    let accounts = accounts_csv(10);
    let transactions = transactions_csv();
    let zip = write_zip(
        &scratch.path().join("bundle.zip"),
        &[
            ("accounts.csv", &accounts),
            ("transactions.csv", &transactions),
            (".DS_Store", "junk"),
            ("__MACOSX/", ""),
            ("__MACOSX/._accounts.csv", "junk"),
        ],
    );

    let report = finance_importer()
        .import_from_zip_file(&pool, &zip)
        .await
        .unwrap();
    assert_eq!(report.rows_for("accounts.csv"), Some(10));
    assert_eq!(report.rows_for("transactions.csv"), Some(4));
    assert_eq!(count(&pool, "transactions").await, 4);
}

#[tokio::test]
async fn zip_stream_is_spooled_and_imported() {
    let pool = temp_pool().await;
    let accounts = accounts_csv(2);
    let bytes = zip_bytes(&[
        ("accounts.csv", &accounts),
        ("transactions.csv", "id,account_id,amount\nt1,a2,9\n"),
    ]);

    let report = finance_importer()
        .import_from_zip_stream(&pool, bytes.as_slice())
        .await
        .unwrap();
    assert_eq!(report.total_rows(), 3);
}

#[tokio::test]
async fn entries_with_current_dir_prefix_import() {
    let pool = temp_pool().await;
    let scratch = TempDir::new().unwrap();
    let accounts = accounts_csv(10);
    let transactions = transactions_csv();
    let zip = write_zip(
        &scratch.path().join("bundle.zip"),
        &[
            ("./", ""),
            ("./accounts.csv", &accounts),
            ("./transactions.csv", &transactions),
        ],
    );

    let report = finance_importer()
        .import_from_zip_file(&pool, &zip)
        .await
        .unwrap();
    assert_eq!(report.rows_for("accounts.csv"), Some(10));
    assert_eq!(report.rows_for("transactions.csv"), Some(4));
    assert_eq!(count(&pool, "transactions").await, 4);
}

#[tokio::test]
async fn archive_missing_a_file_fails_validation() {
    let pool = temp_pool().await;
    let scratch = TempDir::new().unwrap();
    let accounts = accounts_csv(1);
    let zip = write_zip(
        &scratch.path().join("bundle.zip"),
        &[("accounts.csv", &accounts)],
    );

    let err = finance_importer()
        .import_from_zip_file(&pool, &zip)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ImportError::Validation(ValidationError::MissingFile(ref name)) if name == "transactions.csv"
    ));
    assert_eq!(count(&pool, "accounts").await, 0);
}

#[tokio::test]
async fn not_a_zip_is_an_archive_error() {
    let pool = temp_pool().await;
    let scratch = TempDir::new().unwrap();
    let path = scratch.path().join("bundle.zip");
    fs::write(&path, "definitely not a zip").unwrap();

    let err = finance_importer()
        .import_from_zip_file(&pool, &path)
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::Archive(ArchiveError::Read(_))));
}

#[tokio::test]
async fn missing_zip_file_is_reported() {
    let pool = temp_pool().await;
    let scratch = TempDir::new().unwrap();

    let err = finance_importer()
        .import_from_zip_file(&pool, &scratch.path().join("absent.zip"))
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::ArchiveOpen { .. }));
}

#[tokio::test]
async fn staging_is_removed_after_success_and_failure() {
    let pool = temp_pool().await;
    let parent = TempDir::new().unwrap();
    let importer = finance_importer();

    let accounts = accounts_csv(3);
    let transactions = transactions_csv();
    let good = zip_bytes(&[
        ("accounts.csv", &accounts),
        ("transactions.csv", &transactions),
    ]);
    let report = stage_archive_in(parent.path(), Cursor::new(good), |dir| {
        let importer = &importer;
        let pool = &pool;
        async move { importer.import_from_directory(pool, &dir).await }
    })
    .await
    .unwrap();
    assert_eq!(report.rows_for("accounts.csv"), Some(3));
    assert_eq!(staging_leftovers(&parent), 0);

    let bad = zip_bytes(&[
        ("accounts.csv", "id,name,opened_on\nz1,,2024-01-01\n"),
        ("transactions.csv", "id,account_id,amount\n"),
    ]);
    let err = stage_archive_in(parent.path(), Cursor::new(bad), |dir| {
        let importer = &importer;
        let pool = &pool;
        async move { importer.import_from_directory(pool, &dir).await }
    })
    .await
    .unwrap_err();
    assert_eq!(err.file(), Some("accounts.csv"));
    assert_eq!(err.line(), Some(2));
    assert_eq!(staging_leftovers(&parent), 0);

    // Only the three good accounts survive.
    assert_eq!(count(&pool, "accounts").await, 3);
}
