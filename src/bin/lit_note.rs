use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use bibsync::bibliography::CslLibrary;
use bibsync::config::Config;
use bibsync::devonthink::DevonThink;
use bibsync::error::SyncError;
use bibsync::hookmark::Hookmark;
use bibsync::link_cache::LinkCache;
use bibsync::notes::{refresh_note, NoteContext};
use bibsync::progress::init_logging;

#[derive(Parser)]
#[command(name = "lit-note")]
#[command(about = "Create or refresh the Obsidian literature note for a citation key")]
struct Args {
    /// Citation key (case-insensitive)
    citekey: String,

    /// Compute links without writing the note or hooking anything
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
    let library = CslLibrary::load(config.csl_json_path()?).context("Failed to load CSL-JSON")?;

    let item = match library.require(&args.citekey) {
        Ok(item) => item,
        Err(SyncError::KeyNotFound(key)) => {
            eprintln!("Citation key {} not found in CSL JSON.", key);
            return Ok(ExitCode::from(1));
        }
        Err(e) => return Err(e.into()),
    };

    let store = DevonThink::new(config.tools.osascript.clone());
    let linker = Hookmark::new(config.tools.hook_path.clone(), args.dry_run);
    let ctx = NoteContext {
        config: &config,
        store: &store,
        linker: &linker,
        dry_run: args.dry_run,
    };

    let mut cache = LinkCache::open(config.linked_items()?).context("Failed to open link cache")?;
    let outcome = refresh_note(&ctx, &mut cache, item)?;
    if !args.dry_run {
        cache.commit().context("Failed to write link cache")?;
    }

    println!(
        "{} note: {}",
        if outcome.created { "Created" } else { "Updated" },
        outcome.note_path.display()
    );
    for line in outcome.automation_lines() {
        println!("{}", line);
    }
    Ok(ExitCode::SUCCESS)
}
