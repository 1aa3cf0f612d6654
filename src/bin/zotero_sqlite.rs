use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use bibsync::config::Config;
use bibsync::progress::{init_logging, set_log_only};
use bibsync::report::{CsvLog, Summary};
use bibsync::safety::{backup_file, validate_output_path};
use bibsync::zotero::sqlite::{
    clean_extra, fix_paths_in_file, inspect, open, open_read_only, repair_storage, RepairAction,
    EXTRA_HEADER, INSPECT_HEADER, PATH_FIX_HEADER, STORAGE_REPAIR_HEADER,
};

#[derive(Parser)]
#[command(name = "zotero-sqlite")]
#[command(about = "Inspect and repair zotero.sqlite directly (close Zotero first)")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Database file (overrides ZOTERO_SQLITE)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[arg(long, global = true)]
    dry_run: bool,

    /// Output log (default depends on the command)
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    log_only: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Report attachments whose path contains the bad prefix (read-only)
    Inspect,
    /// Strip the bad prefix from attachment paths (backs the database up first)
    FixPaths,
    /// Remove tex.uri and papers2 lines from Extra (backs the database up first)
    CleanExtra,
    /// Recreate missing storage folders and copy PDFs into them
    RepairStorage,
}

fn write_log<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<usize> {
    let mut log = CsvLog::create(path, header)?;
    for row in rows {
        log.serialize(row)?;
    }
    Ok(log.finish()?)
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let args = Args::parse();
    set_log_only(args.log_only);

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let db = match &args.db {
        Some(p) => p.clone(),
        None => config.zotero_sqlite()?.to_path_buf(),
    };
    let log_for = |default: &str| args.log.clone().unwrap_or_else(|| config.log_path(default));

    match args.command {
        Command::Inspect => {
            let path = log_for("sqlite_broken_links_report.csv");
            validate_output_path(&path, &[db.as_path()])?;
            let conn = open_read_only(&db)?;
            let rows = inspect(&conn, &config.bad_path_prefix()?, config.zotero_storage()?, config.pdf_dir()?)?;
            write_log(&path, &INSPECT_HEADER, &rows)?;

            let mut summary = Summary::new();
            for row in &rows {
                summary.add(match row.action_needed {
                    RepairAction::AlreadyInStorage => "Already in storage",
                    RepairAction::MissingInSource => "Missing PDF in source folder",
                    RepairAction::NeedsCopy => "Needs copy to storage",
                });
            }
            summary.print("SQLite inspection complete", Some(&path));
        }
        Command::FixPaths => {
            let path = log_for("sqlite_path_fix_log.csv");
            validate_output_path(&path, &[db.as_path()])?;
            let prefix = config.bad_path_prefix()?;
            let (backup, rows) = fix_paths_in_file(&db, &prefix, args.dry_run)
                .with_context(|| format!("Failed to fix paths in {:?}", db))?;
            write_log(&path, &PATH_FIX_HEADER, &rows)?;

            println!("\n{:=<60}", "");
            println!("Path fix complete{}", if args.dry_run { " (dry run)" } else { "" });
            if let Some(backup) = backup {
                println!("  Backup: {}", backup.display());
            }
            println!("  Paths containing {}: {}", prefix, rows.len());
            println!("  Log: {}", path.display());
            println!("{:=<60}", "");
        }
        Command::CleanExtra => {
            let path = log_for("sqlite_extra_cleanup_log.csv");
            validate_output_path(&path, &[db.as_path()])?;
            let backup = if args.dry_run { None } else { Some(backup_file(&db)?) };
            let mut conn = open(&db)?;
            let rows = clean_extra(&mut conn, args.dry_run)?;
            write_log(&path, &EXTRA_HEADER, &rows)?;

            let emptied = rows.iter().filter(|r| r.new_value.is_empty()).count();
            println!("\n{:=<60}", "");
            println!("Extra cleanup complete{}", if args.dry_run { " (dry run)" } else { "" });
            if let Some(backup) = backup {
                println!("  Backup: {}", backup.display());
            }
            println!("  Items cleaned: {}", rows.len());
            println!("  Emptied fields removed: {}", emptied);
            println!("  Log: {}", path.display());
            println!("{:=<60}", "");
        }
        Command::RepairStorage => {
            let path = log_for("sqlite_storage_repair_log.csv");
            validate_output_path(&path, &[db.as_path()])?;
            let conn = open_read_only(&db)?;
            let rows = repair_storage(&conn, config.zotero_storage()?, config.pdf_dir()?, args.dry_run)?;
            write_log(&path, &STORAGE_REPAIR_HEADER, &rows)?;

            let mut summary = Summary::new();
            for row in &rows {
                let file_status = row.status.rsplit("; ").next().unwrap_or(&row.status);
                let label = file_status.split(':').next().unwrap_or(file_status);
                let label = if label.starts_with("Copied") {
                    "Copied"
                } else if label.starts_with("Would copy") {
                    "Would copy"
                } else {
                    label
                };
                summary.add(label);
            }
            summary.print("Storage repair complete", Some(&path));
        }
    }
    Ok(())
}
