use std::path::{Path, PathBuf};
use std::process;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;

use bundle_import::import::write_import_report;
use bundle_import::{
    db, export_query, export_table, init_logging, BundleImporter, ImportManifest, JobPool,
    JobStatus, ProgressReport,
};

#[derive(Debug, Parser)]
#[command(
    name = "bundle-import",
    about = "Load comma-separated data bundles into SQLite",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import a bundle directory or zip archive in a single transaction.
    Import {
        /// Target database (defaults to the per-user data directory).
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,
        /// Manifest describing the bundle's files, in import order.
        #[arg(long, value_name = "FILE")]
        manifest: PathBuf,
        /// Write a JSON import report into this directory.
        #[arg(long, value_name = "DIR")]
        report_dir: Option<PathBuf>,
        /// Print the progress report as JSON instead of text.
        #[arg(long)]
        json: bool,
        /// Bundle directory or zip archive.
        bundle: PathBuf,
    },
    /// Check that a bundle directory holds exactly the manifest's files.
    Validate {
        #[arg(long, value_name = "FILE")]
        manifest: PathBuf,
        dir: PathBuf,
    },
    /// Write one table, or the result of a query, out as comma-separated text.
    Export {
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,
        #[arg(long, required_unless_present = "sql", conflicts_with = "sql")]
        table: Option<String>,
        /// Optional SQL condition selecting the rows to export.
        #[arg(long = "where", value_name = "COND", requires = "table")]
        filter: Option<String>,
        /// Query to run instead of selecting from a table.
        #[arg(long, value_name = "QUERY")]
        sql: Option<String>,
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    init_logging();

    let cli = Cli::parse();
    if let Err(err) = handle_cli(cli.command).await {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

async fn handle_cli(command: Commands) -> Result<()> {
    match command {
        Commands::Import {
            db,
            manifest,
            report_dir,
            json,
            bundle,
        } => handle_import(db, &manifest, report_dir.as_deref(), json, bundle).await,
        Commands::Validate { manifest, dir } => handle_validate(&manifest, &dir),
        Commands::Export {
            db,
            table,
            filter,
            sql,
            out,
        } => {
            let source = match (table, sql) {
                (_, Some(sql)) => ExportSource::Query(sql),
                (Some(table), None) => ExportSource::Table { table, filter },
                (None, None) => return Err(anyhow!("either --table or --sql is required")),
            };
            handle_export(db, source, &out).await
        }
    }
}

fn resolve_db_path(db: Option<PathBuf>) -> Result<PathBuf> {
    match db {
        Some(path) => Ok(path),
        None => db::default_db_path().context("determine database path"),
    }
}

fn load_importer(manifest: &Path) -> Result<BundleImporter> {
    let registry = ImportManifest::from_path(manifest)?
        .into_registry()
        .with_context(|| format!("load manifest {}", manifest.display()))?;
    Ok(BundleImporter::new(registry))
}

async fn handle_import(
    db: Option<PathBuf>,
    manifest: &Path,
    report_dir: Option<&Path>,
    json: bool,
    bundle: PathBuf,
) -> Result<()> {
    let importer = load_importer(manifest)?;
    let db_path = resolve_db_path(db)?;
    let pool = db::open_pool(&db_path, false).await?;

    let jobs = JobPool::new();
    let (report_tx, report_rx) = oneshot::channel::<ProgressReport>();
    let task_pool = pool.clone();
    let task_bundle = bundle.clone();
    let handle = jobs.start(format!("import {}", bundle.display()), move |log| async move {
        log.line(format!("importing {}", task_bundle.display()));
        let report = if task_bundle.is_file() {
            importer.import_from_zip_file(&task_pool, &task_bundle).await?
        } else {
            importer
                .import_from_directory(&task_pool, &task_bundle)
                .await?
        };
        for line in report.to_string().lines() {
            log.line(line);
        }
        let _ = report_tx.send(report);
        Ok::<_, anyhow::Error>(())
    });

    let status = handle.wait().await;
    pool.close().await;
    let log = handle.drain_log();

    if let JobStatus::FinishedWithError(message) = status {
        return Err(anyhow!(message));
    }
    let report = report_rx
        .await
        .context("import finished without a progress report")?;

    if json {
        let serialized =
            serde_json::to_string_pretty(&report).context("serialize progress report")?;
        println!("{serialized}");
    } else {
        for line in log {
            println!("{line}");
        }
    }

    if let Some(dir) = report_dir {
        let path = write_import_report(dir, &bundle, &report)?;
        eprintln!("Report written to {}", path.display());
    }
    Ok(())
}

fn handle_validate(manifest: &Path, dir: &Path) -> Result<()> {
    let importer = load_importer(manifest)?;
    importer.validate(dir)?;
    println!(
        "{} holds the {} expected files",
        dir.display(),
        importer.registry().len()
    );
    Ok(())
}

enum ExportSource {
    Table {
        table: String,
        filter: Option<String>,
    },
    Query(String),
}

async fn handle_export(db: Option<PathBuf>, source: ExportSource, out: &Path) -> Result<()> {
    let db_path = resolve_db_path(db)?;
    let pool = db::open_pool(&db_path, false).await?;
    let mut conn = pool.acquire().await.context("acquire database connection")?;
    let (rows, what) = match &source {
        ExportSource::Table { table, filter } => {
            let rows = export_table(&mut conn, table, filter.as_deref(), out)
                .await
                .with_context(|| format!("export {table}"))?;
            (rows, table.as_str())
        }
        ExportSource::Query(sql) => {
            let rows = export_query(&mut conn, sql, out)
                .await
                .context("export query")?;
            (rows, "query")
        }
    };
    drop(conn);
    pool.close().await;
    println!("exported {rows} rows from {what} to {}", out.display());
    Ok(())
}
