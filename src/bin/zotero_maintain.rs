use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use bibsync::config::Config;
use bibsync::progress::{init_logging, set_log_only};
use bibsync::report::CsvLog;
use bibsync::zotero::maintenance::{
    clean_citekey_extra, cleanup_attachments, fix_links, relink, remap_types, sanity_check,
    CITEKEY_EXTRA_HEADER, CLEANUP_HEADER, FIX_LINKS_HEADER, RELINK_HEADER, SANITY_HEADER,
    TYPE_REMAP_HEADER,
};
use bibsync::zotero::ZoteroClient;

#[derive(Parser)]
#[command(name = "zotero-maintain")]
#[command(about = "Maintenance jobs against the Zotero Web API")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Report what would change without touching the library
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
    /// Change report/thesis/online/electronic items to presentation
    RemapTypes,
    /// Attach the first PDF in each item's storage folder as a linked file
    Relink,
    /// Repoint linked files under the bad prefix into Zotero storage
    FixLinks,
    /// Delete imported attachments whose path points at a stale home folder
    CleanupAttachments,
    /// Remove "Citation Key:" lines from the Extra field of top-level items
    CleanCitekeyExtra,
    /// Check that linked files exist in Zotero storage
    SanityCheck,
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
    let client = ZoteroClient::from_config(&config)?;
    let log_for = |default: &str| args.log.clone().unwrap_or_else(|| config.log_path(default));

    println!("\n{:=<60}", "");
    match args.command {
        Command::RemapTypes => {
            let rows = remap_types(&client, args.dry_run)?;
            let path = log_for("type_remap_log.csv");
            write_log(&path, &TYPE_REMAP_HEADER, &rows)?;
            let updated = rows.iter().filter(|r| r.status == "Updated").count();
            let errors = rows.iter().filter(|r| r.status.starts_with("Error")).count();
            println!("Type remap complete");
            println!("  Candidates: {}", rows.len());
            println!("  Updated: {}", updated);
            println!("  Errors: {}", errors);
            println!("  Log: {}", path.display());
        }
        Command::Relink => {
            let storage = config.zotero_storage()?;
            let rows = relink(&client, storage, &config.repair.attachable_types, args.dry_run)?;
            let path = log_for("final_relink_log.csv");
            write_log(&path, &RELINK_HEADER, &rows)?;
            let created = rows.iter().filter(|r| r.action == "Attachment created").count();
            println!("Relink complete");
            println!("  Items checked: {}", rows.len());
            println!("  Attachments created: {}", created);
            println!("  Log: {}", path.display());
        }
        Command::FixLinks => {
            let storage = config.zotero_storage()?;
            let prefix = config.bad_path_prefix()?;
            let rows = fix_links(&client, storage, &prefix, args.dry_run)?;
            let path = log_for("fix_links_log.csv");
            write_log(&path, &FIX_LINKS_HEADER, &rows)?;
            let updated = rows.iter().filter(|r| r.status == "Updated").count();
            println!("Link fix complete");
            println!("  Attachments under {}: {}", prefix, rows.len());
            println!("  Updated: {}", updated);
            println!("  Log: {}", path.display());
        }
        Command::CleanupAttachments => {
            let rows = cleanup_attachments(&client, &config.repair.broken_prefixes, args.dry_run)?;
            let path = log_for("bad_attachments_log.csv");
            write_log(&path, &CLEANUP_HEADER, &rows)?;
            let deleted = rows.iter().filter(|r| r.deleted).count();
            println!("Attachment cleanup complete");
            println!("  Broken attachments: {}", rows.len());
            println!("  Deleted: {}", deleted);
            println!("  Log: {}", path.display());
        }
        Command::CleanCitekeyExtra => {
            let rows = clean_citekey_extra(&client, args.dry_run)?;
            let path = log_for("citekey_extra_cleanup_log.csv");
            write_log(&path, &CITEKEY_EXTRA_HEADER, &rows)?;
            let updated = rows.iter().filter(|r| r.status == "Updated").count();
            let errors = rows.iter().filter(|r| r.status.starts_with("Error")).count();
            println!("Citation key cleanup complete");
            println!("  Items with a citation key line: {}", rows.len());
            println!("  Updated: {}", updated);
            println!("  Errors: {}", errors);
            println!("  Log: {}", path.display());
        }
        Command::SanityCheck => {
            let storage = config.zotero_storage()?;
            let rows = sanity_check(&client, storage)?;
            let path = log_for("sanity_check_report.csv");
            write_log(&path, &SANITY_HEADER, &rows)?;
            let missing_folder = rows.iter().filter(|r| !r.storage_folder_exists).count();
            let missing_pdf = rows
                .iter()
                .filter(|r| r.storage_folder_exists && !r.pdf_exists)
                .count();
            println!("Sanity check complete");
            println!("  PDFs OK: {}", rows.len() - missing_folder - missing_pdf);
            println!("  Missing storage folders: {}", missing_folder);
            println!("  Missing PDFs: {}", missing_pdf);
            println!("  Report: {}", path.display());
        }
    }
    if args.dry_run {
        println!("  Dry run only. The library was not modified.");
    }
    println!("{:=<60}", "");
    Ok(())
}
