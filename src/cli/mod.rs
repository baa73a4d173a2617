//! Command-line interface for screensaver.
//!
//! Provides commands for running a sync cycle, inspecting the catalog and
//! the selection history, and maintaining the library.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{self, ConfigOverrides, ResolvedConfig};
use crate::core::{LockFailure, StateLock, SyncEngine, SyncError};
use crate::domain::{DirectoryId, Report, StagedFrom};
use crate::library::{
    Catalog, CatalogError, CatalogSnapshot, HistoryStore, Library, MarkerFilter,
};

/// screensaver - Random photo album sync for a picture frame
#[derive(Parser, Debug)]
#[command(name = "screensaver")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: nearest .screensaver/config.yaml)
    #[arg(long, global = true, env = config::ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Remote archive root, e.g. nas:/volume1/photo
    #[arg(long, global = true)]
    pub input_path: Option<String>,

    /// Output directory holding the working set, library and history
    #[arg(long, global = true)]
    pub output_path: Option<PathBuf>,

    /// ssh port for rsync
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Library budget, bytes or human size (e.g. 15GiB)
    #[arg(long, global = true)]
    pub budget: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Select a new album and stage it into the working set
    Run {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Seed the random source (reproducible selection)
        #[arg(long)]
        seed: Option<u64>,

        /// Do not contact the remote; select from the library
        #[arg(long)]
        local_only: bool,
    },

    /// Print the current catalog
    Catalog {
        /// Catalog of the library instead of the remote
        #[arg(long)]
        local: bool,
    },

    /// Inspect or clear the selection history
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },

    /// Inspect and maintain the library
    Library {
        #[command(subcommand)]
        command: LibraryCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommands {
    /// Show the persisted record
    Show {
        /// Print the raw record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Forget every shown directory
    Reset,
}

#[derive(Subcommand, Debug)]
pub enum LibraryCommands {
    /// List library entries and their size
    List,

    /// Evict random entries until the library fits its budget
    Trim,

    /// Remove one entry
    Evict {
        /// Directory id, e.g. 2020/trip
        id: String,
    },
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_file: self.config.clone(),
            input_path: self.input_path.clone(),
            output_path: self.output_path.clone(),
            port: self.port,
            budget: self.budget.clone(),
        }
    }

    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::load(&self.overrides())?;

        match self.command {
            Commands::Run {
                json,
                seed,
                local_only,
            } => run_cycle(&cfg, json, seed, local_only).await,
            Commands::Catalog { local } => show_catalog(&cfg, local).await,
            Commands::History { command } => match command {
                HistoryCommands::Show { json } => show_history(&cfg, json),
                HistoryCommands::Reset => reset_history(&cfg),
            },
            Commands::Library { command } => match command {
                LibraryCommands::List => list_library(&cfg),
                LibraryCommands::Trim => trim_library(&cfg),
                LibraryCommands::Evict { id } => evict_entry(&cfg, &id),
            },
            Commands::Config => show_config(&cfg),
        }
    }
}

async fn run_cycle(
    cfg: &ResolvedConfig,
    json: bool,
    seed: Option<u64>,
    local_only: bool,
) -> Result<()> {
    let mut engine = SyncEngine::new(cfg.engine_config(local_only), cfg.transfer())?;
    if let Some(seed) = seed {
        engine = engine.with_rng(StdRng::seed_from_u64(seed));
    }

    // Ctrl+C aborts the cycle; nothing is committed
    let cancel = engine.cancellation_token();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, aborting cycle");
                cancel.cancel();
            }
        }
    });

    let result = engine.run_cycle().await;
    watcher.abort();
    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, cfg.budget_bytes);
    }
    Ok(())
}

fn print_report(report: &Report, budget: u64) {
    let source = match report.staged_from {
        StagedFrom::Remote => "remote",
        StagedFrom::Library => "library",
        StagedFrom::LibraryRefreshed => "library (refreshed from remote)",
    };

    println!("Selected: {}", report.selection);
    if report.fell_back {
        println!("Mode:     {} (remote unavailable)", report.mode);
    } else {
        println!("Mode:     {}", report.mode);
    }
    println!("Source:   {}", source);
    println!(
        "Staged:   {} files, {}",
        report.staged_files,
        ByteSize::b(report.staged_bytes)
    );
    println!(
        "Library:  {} of {}",
        ByteSize::b(report.library_bytes),
        ByteSize::b(budget)
    );
    println!("Catalog:  {} albums", report.catalog_size);
    if report.history_reset {
        println!("History:  every album shown, starting a new round");
    }
    for id in &report.skipped_empty {
        println!("Skipped:  {} (no media)", id);
    }
    for id in &report.evicted {
        println!("Evicted:  {}", id);
    }
}

fn markers(cfg: &ResolvedConfig) -> Result<MarkerFilter> {
    MarkerFilter::with_extra(&cfg.exclude).context("Invalid catalog.exclude pattern")
}

fn open_library(cfg: &ResolvedConfig) -> Result<Library> {
    let library = Library::open(&cfg.library, cfg.budget_bytes, markers(cfg)?)
        .map_err(SyncError::from)?
        .with_dir_mode(cfg.dir_mode);
    Ok(library)
}

/// Hold the state lock while maintenance touches the library or history
fn lock_state(cfg: &ResolvedConfig) -> Result<StateLock> {
    let path = cfg.lock_file();
    StateLock::acquire(&path).map_err(|e| {
        let err = match e {
            LockFailure::Held => SyncError::Busy(path.clone()),
            LockFailure::Io(source) => SyncError::Io {
                path: path.clone(),
                source,
            },
        };
        err.into()
    })
}

async fn show_catalog(cfg: &ResolvedConfig, local: bool) -> Result<()> {
    let result = match (&cfg.remote_root, local) {
        (Some(root), false) => {
            let transfer = cfg.transfer();
            let cancel = CancellationToken::new();
            Catalog::build_remote(transfer.as_ref(), root, &markers(cfg)?, &cancel).await
        }
        _ => open_library(cfg)?.catalog(),
    };

    let catalog = match result {
        Ok(catalog) => catalog,
        Err(CatalogError::SourceEmpty { root }) => {
            println!("No albums under {}", root);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    for id in catalog.iter() {
        println!("{}", id);
    }
    eprintln!("\nTotal: {} albums", catalog.len());
    Ok(())
}

fn show_history(cfg: &ResolvedConfig, json: bool) -> Result<()> {
    let store = HistoryStore::new(cfg.history_file());
    let record = store.load().map_err(SyncError::from)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("History file: {}", store.path().display());
    match &record.random_dir {
        Some(id) => println!("Last selection: {}", id),
        None => println!("Last selection: (none)"),
    }
    if let Some(mode) = record.mode {
        println!("Last mode:      {}", mode);
    }
    if let Some(at) = record.updated_at {
        println!("Updated:        {}", at);
    }
    match &record.remote_list {
        CatalogSnapshot::Listed(ids) => println!("Remote albums:  {}", ids.len()),
        CatalogSnapshot::Unavailable(note) => println!("Remote albums:  {}", note),
    }
    println!("Library albums: {}", record.local_list.len());
    println!("\nShown this round ({}):", record.already_used.len());
    for id in record.already_used.iter() {
        println!("  {}", id);
    }
    Ok(())
}

fn reset_history(cfg: &ResolvedConfig) -> Result<()> {
    let _lock = lock_state(cfg)?;
    let store = HistoryStore::new(cfg.history_file());
    store.reset().map_err(SyncError::from)?;
    info!(path = %store.path().display(), "history reset");
    println!("History cleared");
    Ok(())
}

fn list_library(cfg: &ResolvedConfig) -> Result<()> {
    let library = open_library(cfg)?;
    let entries = library.entries().map_err(SyncError::from)?;

    if entries.is_empty() {
        println!("Library is empty. Run 'screensaver run' to fill it.");
        return Ok(());
    }

    println!("{:<50} {:>12}", "ALBUM", "SIZE");
    println!("{}", "-".repeat(63));
    let mut total = 0;
    for entry in &entries {
        total += entry.bytes;
        println!("{:<50} {:>12}", entry.id.to_string(), ByteSize::b(entry.bytes).to_string());
    }
    println!(
        "\nTotal: {} albums, {} of {}",
        entries.len(),
        ByteSize::b(total),
        ByteSize::b(library.budget())
    );
    Ok(())
}

fn trim_library(cfg: &ResolvedConfig) -> Result<()> {
    let _lock = lock_state(cfg)?;
    let library = open_library(cfg)?;
    let evicted = library
        .trim(&mut StdRng::from_entropy())
        .map_err(SyncError::from)?;

    if evicted.is_empty() {
        println!("Library is within budget");
    }
    for id in &evicted {
        println!("Evicted: {}", id);
    }
    Ok(())
}

fn evict_entry(cfg: &ResolvedConfig, raw: &str) -> Result<()> {
    let id: DirectoryId = raw
        .parse()
        .with_context(|| format!("Invalid directory id: {}", raw))?;
    let _lock = lock_state(cfg)?;
    let library = open_library(cfg)?;

    if library.evict(&id).map_err(SyncError::from)? {
        println!("Evicted: {}", id);
    } else {
        println!("Not in library: {}", id);
    }
    Ok(())
}

fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!("Screensaver Configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Remote:");
    println!(
        "  Root:      {}",
        cfg.remote_root.as_deref().unwrap_or("(none - library only)")
    );
    println!("  Transport: {:?}", cfg.transport);
    match cfg.port {
        Some(port) => println!("  Port:      {}", port),
        None => println!("  Port:      (ssh default)"),
    }
    println!("  rsync:     {}", cfg.rsync_binary);
    println!("  Timeout:   {}s", cfg.timeout_seconds);
    println!();
    println!("Paths:");
    println!("  Output:      {}", cfg.output.display());
    println!("  Working set: {}", cfg.working.display());
    println!("  Library:     {}", cfg.library.display());
    println!("  History:     {}", cfg.history_file().display());
    println!();
    println!("Library budget: {}", ByteSize::b(cfg.budget_bytes));
    println!("Max attempts:   {}", cfg.max_attempts);
    if !cfg.exclude.is_empty() {
        println!("Extra excludes: {}", cfg.exclude.join(", "));
    }
    if let Some(mode) = cfg.dir_mode {
        println!("Dir mode:       {:o}", mode);
    }

    Ok(())
}
