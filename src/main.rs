use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;

use bibsync::bibliography::load_bibtex;
use bibsync::config::Config;
use bibsync::models::MatchOutcome;
use bibsync::pdf_text::PdfExtractor;
use bibsync::progress::{format_duration, init_logging, set_log_only};
use bibsync::rename::{apply, list_pdfs, Matcher, RenameMode};
use bibsync::report::{write_rename_log, Summary};
use bibsync::safety::validate_output_path;

#[derive(Parser)]
#[command(name = "rename-pdfs")]
#[command(about = "Rename PDFs to <citekey>.pdf by matching them against a BibTeX library")]
struct Args {
    /// Matching strategy
    #[arg(long, value_enum, default_value = "fuzzy")]
    mode: RenameMode,

    /// Log decisions without renaming anything
    #[arg(long)]
    dry_run: bool,

    /// BibTeX file (overrides BIB_PATH)
    #[arg(long)]
    bib: Option<PathBuf>,

    /// Folder of PDFs (overrides PDF_FOLDER)
    #[arg(long)]
    pdf_dir: Option<PathBuf>,

    /// Decision log (default: <log dir>/rename_log.csv)
    #[arg(long)]
    log: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "0")]
    workers: usize,

    /// Hide progress bars and print periodic progress lines instead
    #[arg(long)]
    log_only: bool,
}

fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_logging();
    let args = Args::parse();
    set_log_only(args.log_only);

    if args.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.workers)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    let start = Instant::now();
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let bib = match args.bib {
        Some(p) => p,
        None => config.bib_path()?.to_path_buf(),
    };
    let pdf_dir = match args.pdf_dir {
        Some(p) => p,
        None => config.pdf_dir()?.to_path_buf(),
    };
    let log_path = args.log.unwrap_or_else(|| config.log_path("rename_log.csv"));
    validate_output_path(&log_path, &[bib.as_path(), pdf_dir.as_path()])?;

    println!("Loading bibliography: {:?}", bib);
    let entries = load_bibtex(&bib).context("Failed to load bibliography")?;
    println!("Loaded {} entries", entries.len());

    let files = list_pdfs(&pdf_dir).context("Failed to list PDFs")?;
    println!("Found {} PDFs in {:?}", files.len(), pdf_dir);

    let reader = PdfExtractor::new(config.tools.ocr_command.clone());
    let matcher = Matcher::new(args.mode, &entries, &config.matching);
    let decisions = matcher.plan(&files, &reader);
    let results = apply(decisions, &pdf_dir, args.dry_run);

    write_rename_log(&log_path, &results).context("Failed to write rename log")?;

    let mut summary = Summary::new();
    for r in &results {
        summary.add(r.outcome.as_str());
    }
    let ocr_used = results.iter().filter(|r| r.ocr).count();
    summary.print(
        &format!(
            "Rename complete ({:?} mode{}) in {}",
            args.mode,
            if args.dry_run { ", dry run" } else { "" },
            format_duration(start.elapsed())
        ),
        Some(&log_path),
    );
    if ocr_used > 0 {
        println!("OCR used for {} files", ocr_used);
    }

    let failed = results
        .iter()
        .any(|r| r.outcome == MatchOutcome::Failed);
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}
