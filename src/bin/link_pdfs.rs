use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use bibsync::bibliography::{load_bibtex, title_index};
use bibsync::config::Config;
use bibsync::progress::{init_logging, set_log_only};
use bibsync::rename::list_pdfs;
use bibsync::report::{CsvLog, Summary};
use bibsync::safety::validate_output_path;
use bibsync::zotero::maintenance::{link_pdfs, LinkPdfOptions, LINK_PDFS_HEADER};
use bibsync::zotero::ZoteroClient;

#[derive(Parser)]
#[command(name = "link-pdfs")]
#[command(about = "Attach <citekey>.pdf (or the best title match) to Zotero items as linked files")]
struct Args {
    #[arg(long)]
    dry_run: bool,

    /// Write absolute PDF paths into the log
    #[arg(long)]
    full_paths: bool,

    /// Match log (default: <log dir>/pdf_match_log.csv)
    #[arg(long)]
    log: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    log_only: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let args = Args::parse();
    set_log_only(args.log_only);

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let bib = config.bib_path()?;
    let pdf_dir = config.pdf_dir()?;
    let log_path = args.log.unwrap_or_else(|| config.log_path("pdf_match_log.csv"));
    validate_output_path(&log_path, &[bib, pdf_dir])?;

    let entries = load_bibtex(bib).context("Failed to load bibliography")?;
    let titles = title_index(&entries);
    println!("BibTeX entries loaded: {} ({} titles)", entries.len(), titles.len());

    let pdfs = list_pdfs(pdf_dir)?;
    println!("PDFs found: {}", pdfs.len());

    let client = ZoteroClient::from_config(&config)?;
    let opts = LinkPdfOptions {
        pdf_dir,
        attachable_types: &config.repair.attachable_types,
        threshold: config.matching.link_threshold,
        full_paths: args.full_paths,
        dry_run: args.dry_run,
    };
    let rows = link_pdfs(&client, &titles, &pdfs, &opts)?;

    let mut log = CsvLog::create(&log_path, &LINK_PDFS_HEADER)?;
    let mut summary = Summary::new();
    for row in &rows {
        log.serialize(row)?;
        let label = row.action.split(" (").next().unwrap_or(&row.action).to_string();
        summary.add(label);
    }
    log.finish()?;

    summary.print("PDF linking complete", Some(&log_path));
    Ok(())
}
