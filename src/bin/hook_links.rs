use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use rustc_hash::FxHashMap;

use bibsync::bibliography::CslLibrary;
use bibsync::config::Config;
use bibsync::devonthink::DevonThink;
use bibsync::error::SyncError;
use bibsync::hookmark::Hookmark;
use bibsync::hooks::{hook_item, hook_vault, select_keys, HOOK_LOG_HEADER};
use bibsync::link_cache::LinkCache;
use bibsync::notes::NoteContext;
use bibsync::progress::{create_progress_bar, init_logging, log_progress, set_log_only};
use bibsync::report::{CsvLog, Summary};
use bibsync::safety::validate_output_path;
use bibsync::zotero::{ZoteroApi, ZoteroClient};

#[derive(Parser)]
#[command(name = "hook-links")]
#[command(about = "Hook Obsidian notes, DEVONthink documents and Zotero items together")]
struct Args {
    /// Only process this citation key (case-insensitive)
    #[arg(long)]
    citekey: Option<String>,

    /// Hook every @<key>.md note in the vault to its Zotero item instead
    #[arg(long)]
    vault: bool,

    /// Add an empty link-cache row for KEY if it has none, then exit
    #[arg(long, value_name = "KEY", conflicts_with_all = ["citekey", "vault"])]
    register: Option<String>,

    #[arg(long)]
    dry_run: bool,

    /// Link log (default: <log dir>/hook_link_log.csv)
    #[arg(long)]
    log: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    log_only: bool,
}

fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_logging();
    let args = Args::parse();
    set_log_only(args.log_only);

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let linker = Hookmark::new(config.tools.hook_path.clone(), args.dry_run);

    if let Some(key) = &args.register {
        return register_key(&config, key, args.dry_run);
    }
    if args.vault {
        return run_vault(&config, &linker);
    }

    let library = CslLibrary::load(config.csl_json_path()?).context("Failed to load CSL-JSON")?;
    let keys = match select_keys(&library, args.citekey.as_deref()) {
        Ok(keys) => keys,
        Err(SyncError::KeyNotFound(key)) => {
            eprintln!("Citation key {} not found in CSL JSON.", key);
            return Ok(ExitCode::from(1));
        }
        Err(e) => return Err(e.into()),
    };

    let cache_path = config.linked_items()?;
    let log_path = args.log.unwrap_or_else(|| config.log_path("hook_link_log.csv"));
    validate_output_path(&log_path, &[cache_path, config.csl_json_path()?])?;

    let store = DevonThink::new(config.tools.osascript.clone());
    let ctx = NoteContext {
        config: &config,
        store: &store,
        linker: &linker,
        dry_run: args.dry_run,
    };

    let mut cache = LinkCache::open(cache_path).context("Failed to open link cache")?;
    let mut log = CsvLog::create(&log_path, &HOOK_LOG_HEADER)?;
    let mut summary = Summary::new();

    let pb = create_progress_bar(keys.len() as u64, "Hooking");
    let total = keys.len() as u64;
    for (i, key) in keys.iter().enumerate() {
        let Some(item) = library.get(key) else {
            continue;
        };
        let row = hook_item(&ctx, &mut cache, item);
        log.write_row(row.fields())?;
        summary.add(row.status.as_str());
        pb.inc(1);
        log_progress("hook", i as u64 + 1, total, 50);
    }
    pb.finish_and_clear();
    log.finish()?;

    if !args.dry_run {
        cache.commit().context("Failed to write link cache")?;
    }
    summary.print(
        if args.dry_run { "Hook linking (dry run)" } else { "Hook linking complete" },
        Some(&log_path),
    );
    Ok(ExitCode::SUCCESS)
}

fn register_key(config: &Config, key: &str, dry_run: bool) -> Result<ExitCode> {
    let cache_path = config.linked_items()?;
    let mut cache = LinkCache::open(cache_path).context("Failed to open link cache")?;
    if !cache.ensure(key) {
        println!("{} already has a link cache row", key);
    } else if dry_run {
        println!("[dry-run] would add {} to {}", key, cache_path.display());
    } else {
        cache.commit().context("Failed to write link cache")?;
        println!("Added {} to {}", key, cache_path.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn run_vault(config: &Config, linker: &Hookmark) -> Result<ExitCode> {
    let vault = config.vault()?;
    let client = ZoteroClient::from_config(config)?;
    let items = client.items(None).context("Failed to fetch Zotero items")?;

    let mut item_keys: FxHashMap<String, String> = FxHashMap::default();
    for item in &items {
        if let Some(citekey) = item.citation_key() {
            item_keys.entry(citekey).or_insert_with(|| item.key.clone());
        }
    }
    println!("Zotero items with citation keys: {}", item_keys.len());

    let report = hook_vault(vault, &item_keys, linker)?;
    for key in &report.missing {
        println!("  No Zotero item found for {}", key);
    }

    println!("\n{:=<60}", "");
    println!("Vault hooking complete");
    println!("  Hooked: {}", report.hooked.len());
    println!("  Missing: {}", report.missing.len());
    println!("  Failed: {}", report.failed.len());
    println!("{:=<60}", "");
    Ok(if report.failed.is_empty() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
