#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bundle_import::import::{ImportStrategy, ImporterRegistry, SqlTemplateHandler};
use bundle_import::BundleImporter;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use zip::write::FileOptions;
use zip::ZipWriter;

pub const SCHEMA: &[&str] = &[
    "CREATE TABLE accounts (id TEXT PRIMARY KEY, name TEXT NOT NULL, opened_on TEXT)",
    "CREATE TABLE transactions (
        id TEXT PRIMARY KEY,
        account_id TEXT NOT NULL REFERENCES accounts(id),
        amount INTEGER NOT NULL
    )",
];

pub const INSERT_TRANSACTION: &str =
    "INSERT INTO transactions (id, account_id, amount) VALUES (?1, ?2, ?3)";

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    create_schema(&pool).await;
    pool
}

pub async fn create_schema(pool: &SqlitePool) {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await.unwrap();
    }
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// accounts.csv loaded whole, transactions.csv line by line.
pub fn finance_importer() -> BundleImporter {
    let registry = ImporterRegistry::builder()
        .register("accounts.csv", ImportStrategy::table())
        .register(
            "transactions.csv",
            ImportStrategy::line_based(SqlTemplateHandler::new(INSERT_TRANSACTION)),
        )
        .build()
        .unwrap();
    BundleImporter::new(registry)
}

pub const FINANCE_MANIFEST: &str = r#"{
    "files": [
        { "name": "accounts.csv", "strategy": "table" },
        {
            "name": "transactions.csv",
            "strategy": "lines",
            "sql": "INSERT INTO transactions (id, account_id, amount) VALUES (?1, ?2, ?3)"
        }
    ]
}"#;

pub fn accounts_csv(rows: usize) -> String {
    let mut out = String::from("id,name,opened_on\n");
    for i in 1..=rows {
        out.push_str(&format!("a{i},Account {i},2024-01-{i:02}\n"));
    }
    out
}

/// Five data lines, one of them blank.
pub fn transactions_csv() -> String {
    "id,account_id,amount\nt1,a1,100\nt2,a2,-25\n\nt3,a1,40\nt4,a3,7\n".to_string()
}

pub fn write_files(dir: &Path, files: &[(&str, &str)]) {
    for (name, contents) in files {
        fs::write(dir.join(name), contents).unwrap();
    }
}

pub fn finance_bundle(dir: &Path) {
    write_files(
        dir,
        &[
            ("accounts.csv", &accounts_csv(10)),
            ("transactions.csv", &transactions_csv()),
        ],
    );
}

pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, contents) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

pub fn write_zip(path: &Path, entries: &[(&str, &str)]) -> PathBuf {
    fs::write(path, zip_bytes(entries)).unwrap();
    path.to_path_buf()
}
