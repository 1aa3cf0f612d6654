use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use bibsync::config::Config;
use bibsync::progress::init_logging;
use bibsync::report::{read_rows, CsvLog, Summary};
use bibsync::safety::validate_output_path;
use bibsync::storage::{from_match_log, from_report, MatchLogRow, StorageCopyRow, STORAGE_LOG_HEADER};
use bibsync::zotero::sqlite::InspectRow;

#[derive(Parser)]
#[command(name = "repair-storage")]
#[command(about = "Copy PDFs from the source folder into Zotero storage folders")]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true)]
    dry_run: bool,

    /// Copy log (default: <log dir>/storage_repair_log.csv)
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Copy the files an inspect report marks as needing a copy
    FromReport {
        /// Report written by `zotero-sqlite inspect`
        report: PathBuf,
    },
    /// Copy every PDF named in a Key,PDF log into its key's folder
    FromMatchLog {
        match_log: PathBuf,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let pdf_dir = config.pdf_dir()?;
    let storage = config.zotero_storage()?;
    let log_path = args.log.unwrap_or_else(|| config.log_path("storage_repair_log.csv"));

    let rows: Vec<StorageCopyRow> = match &args.command {
        Command::FromReport { report } => {
            validate_output_path(&log_path, &[report.as_path()])?;
            let input: Vec<InspectRow> =
                read_rows(report).with_context(|| format!("Failed to read {:?}", report))?;
            println!("Report rows: {}", input.len());
            from_report(&input, pdf_dir, storage, args.dry_run)
        }
        Command::FromMatchLog { match_log } => {
            validate_output_path(&log_path, &[match_log.as_path()])?;
            let input: Vec<MatchLogRow> =
                read_rows(match_log).with_context(|| format!("Failed to read {:?}", match_log))?;
            println!("Log rows: {}", input.len());
            from_match_log(&input, pdf_dir, storage, args.dry_run)
        }
    };

    let mut log = CsvLog::create(&log_path, &STORAGE_LOG_HEADER)?;
    let mut summary = Summary::new();
    for row in &rows {
        log.serialize(row)?;
        let label = row.action.split(':').next().unwrap_or(&row.action).to_string();
        summary.add(label);
    }
    log.finish()?;

    summary.print(
        if args.dry_run { "Storage copy (dry run)" } else { "Storage copy complete" },
        Some(&log_path),
    );
    Ok(())
}
