use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use bibsync::config::Config;
use bibsync::entry_types::{find_nonstandard, standardise_file, STANDARD_TYPES};
use bibsync::progress::init_logging;

#[derive(Parser)]
#[command(name = "standardise-types")]
#[command(about = "Rewrite non-standard BibTeX entry types (@report, @thesis, @online, ...)")]
struct Args {
    /// BibTeX file (overrides BIB_PATH)
    #[arg(long)]
    bib: Option<PathBuf>,

    /// Only report non-standard types; exit 1 if any are found
    #[arg(long)]
    check: bool,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_logging();
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let bib = match args.bib {
        Some(p) => p,
        None => config.bib_path()?.to_path_buf(),
    };

    if args.check {
        let content = std::fs::read_to_string(&bib).with_context(|| format!("Failed to read {:?}", bib))?;
        let found = find_nonstandard(&content);
        for (key, entry_type) in &found {
            println!("  @{}{{{}}}", entry_type, key);
        }
        if found.is_empty() {
            println!("All entry types are standard.");
            return Ok(ExitCode::SUCCESS);
        }
        println!("{} entries use non-standard types", found.len());
        println!("Standard types: {}", STANDARD_TYPES.join(", "));
        return Ok(ExitCode::from(1));
    }

    let report = standardise_file(&bib, args.dry_run).context("Failed to standardise entry types")?;

    println!("\n{:=<60}", "");
    println!(
        "Entry types {}: {}",
        if args.dry_run { "to change" } else { "changed" },
        report.changes.len()
    );
    for change in &report.changes {
        println!("  {}: @{} -> @{}", change.key, change.from, change.to);
    }
    if !report.nonstandard.is_empty() {
        println!("Non-standard types remaining: {}", report.nonstandard.len());
        for (key, entry_type) in &report.nonstandard {
            println!("  {}: @{}", key, entry_type);
        }
    }
    println!("{:=<60}", "");

    Ok(ExitCode::from(report.exit_code()))
}
