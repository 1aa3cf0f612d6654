use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use bibsync::config::Config;
use bibsync::progress::init_logging;
use bibsync::rename::list_pdfs;
use bibsync::report::{read_rows, CsvLog, Summary};
use bibsync::review::{review_unmatched, ReviewOptions, UnmatchedRow, REVIEW_LOG_HEADER};
use bibsync::safety::validate_output_path;

#[derive(Parser)]
#[command(name = "review-unmatched")]
#[command(about = "Collect the best-matching PDF for each unmatched item into a review folder")]
struct Args {
    /// CSV with Key,Title columns
    #[arg(default_value = "unmatched_pdfs.csv")]
    unmatched: PathBuf,

    /// Review folder (default: <pdf folder>/../to_review)
    #[arg(long)]
    review_dir: Option<PathBuf>,

    /// Move files instead of copying them
    #[arg(long = "move")]
    move_files: bool,

    #[arg(long)]
    dry_run: bool,

    /// Review log (default: <log dir>/review_log.csv)
    #[arg(long)]
    log: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let pdf_dir = config.pdf_dir()?;
    let review_dir = args.review_dir.unwrap_or_else(|| {
        pdf_dir
            .parent()
            .map(|p| p.join("to_review"))
            .unwrap_or_else(|| PathBuf::from("to_review"))
    });
    let log_path = args.log.unwrap_or_else(|| config.log_path("review_log.csv"));
    validate_output_path(&log_path, &[args.unmatched.as_path(), pdf_dir])?;

    let rows: Vec<UnmatchedRow> = read_rows(&args.unmatched)
        .with_context(|| format!("Failed to read {:?}", args.unmatched))?;
    let pdfs = list_pdfs(pdf_dir)?;
    println!("PDFs found: {}", pdfs.len());
    println!("Unmatched items: {}", rows.len());

    let opts = ReviewOptions {
        threshold: config.matching.review_threshold,
        move_files: args.move_files,
        dry_run: args.dry_run,
    };
    let results = review_unmatched(&rows, &pdfs, &review_dir, opts)?;

    let mut log = CsvLog::create(&log_path, &REVIEW_LOG_HEADER)?;
    let mut summary = Summary::new();
    for r in &results {
        log.serialize(r)?;
        summary.add(r.action.clone());
    }
    log.finish()?;

    summary.print(&format!("Review folder: {}", review_dir.display()), Some(&log_path));
    Ok(())
}
