//! blocksync: block-level file synchronization client
//!
//! Keeps a local directory consistent with a content-addressed replica:
//! - Files split into fixed-size SHA-256-addressed blocks
//! - Last-writer-wins versioning; deletions travel as tombstones
//! - Only missing blocks are transferred
//! - The last-synced state persists in `index.db` inside the directory

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{builder::Styles, Parser, Subcommand};
use color_eyre::Result;
use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tracing::{debug, error, info};

use blocksync_core::{scan, FileConfig, SyncConfig, SyncEngine, DEFAULT_BLOCK_SIZE};
use blocksync_transport::TcpStore;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "blocksync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Sync a directory against a content-addressed replica")]
#[command(long_about = r#"
blocksync keeps a local directory consistent with a central replica.

How it works:
  • Files are chunked into fixed-size blocks, addressed by SHA-256
  • Only blocks the server is missing are uploaded
  • Concurrent writers race; the higher version wins
  • Deletions propagate as tombstones

Examples:
  blocksync sync ./docs 127.0.0.1:9001      One sync pass
  blocksync watch ./docs 127.0.0.1:9001     Re-sync on local changes
  blocksync scan ./docs                     Chunk and digest locally
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync pass
    Sync {
        /// Directory to sync
        dir: PathBuf,

        /// Metadata store address (host:port); may come from .blocksync.toml
        meta_addr: Option<String>,

        /// Block size in bytes
        #[arg(short, long)]
        block_size: Option<usize>,
    },

    /// Sync continuously, re-running a pass on local changes
    Watch {
        /// Directory to sync
        dir: PathBuf,

        /// Metadata store address (host:port); may come from .blocksync.toml
        meta_addr: Option<String>,

        /// Block size in bytes
        #[arg(short, long)]
        block_size: Option<usize>,

        /// Debounce delay in milliseconds
        #[arg(short, long, default_value = "500")]
        debounce: u64,
    },

    /// Chunk and digest a directory without contacting a server
    Scan {
        /// Directory to scan
        path: PathBuf,

        /// Output format (json, summary)
        #[arg(short, long, default_value = "summary")]
        format: String,

        /// Block size in bytes
        #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: usize,
    },

    /// Show version and exit
    Version,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Version => {
            eprintln!("blocksync {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Scan {
            path,
            format,
            block_size,
        } => {
            scan_command(&path, &format, block_size)?;
        }
        Commands::Sync {
            dir,
            meta_addr,
            block_size,
        } => {
            let config = build_config(&dir, meta_addr, block_size)?;
            sync_command(&config)?;
        }
        Commands::Watch {
            dir,
            meta_addr,
            block_size,
            debounce,
        } => {
            let config = build_config(&dir, meta_addr, block_size)?;
            watch_command(&config, debounce)?;
        }
    }

    Ok(())
}

/// Resolve the effective config: CLI args beat `.blocksync.toml` overrides.
fn build_config(
    dir: &PathBuf,
    meta_addr: Option<String>,
    block_size: Option<usize>,
) -> Result<SyncConfig> {
    let overrides = FileConfig::load(dir)?;
    let meta_addr = meta_addr.or(overrides.meta_addr).ok_or_else(|| {
        color_eyre::eyre::eyre!("no metadata store address given (argument or .blocksync.toml)")
    })?;
    let block_size = block_size
        .or(overrides.block_size)
        .unwrap_or(DEFAULT_BLOCK_SIZE);
    Ok(SyncConfig::new(dir, meta_addr).with_block_size(block_size))
}

fn sync_command(config: &SyncConfig) -> Result<()> {
    info!(
        "Syncing {} against {}",
        config.base_dir.display(),
        config.meta_addr
    );

    let mut remote = TcpStore::connect(&config.meta_addr)?;
    let report = SyncEngine::new(config.clone()).run(&mut remote)?;

    info!(
        "Done: {} up, {} down, {} deleted, {} unchanged",
        report.uploaded, report.downloaded, report.deleted, report.unchanged
    );
    if report.conflicts > 0 {
        info!(
            "{} update(s) lost a race; the next pass will pull the winners",
            report.conflicts
        );
    }
    for (file, reason) in &report.failed {
        error!("skipped {file}: {reason}");
    }

    Ok(())
}

fn watch_command(config: &SyncConfig, debounce_ms: u64) -> Result<()> {
    // Initial pass
    sync_command(config)?;

    let (tx, rx) = mpsc::channel();

    let mut debouncer = new_debouncer(
        Duration::from_millis(debounce_ms),
        None,
        move |result: DebounceEventResult| {
            if let Ok(events) = result {
                let _ = tx.send(events);
            }
        },
    )?;

    debouncer.watch(&config.base_dir, RecursiveMode::NonRecursive)?;

    info!("Watching for changes (Ctrl+C to stop)...");

    loop {
        match rx.recv() {
            Ok(events) => {
                // The index rewrite at the end of a pass is itself a change;
                // ignore events that touch only reserved names.
                let relevant = events.iter().any(|event| {
                    event.paths.iter().any(|path| {
                        path.file_name()
                            .and_then(|n| n.to_str())
                            .is_none_or(|name| !scan::is_reserved(name))
                    })
                });
                if !relevant {
                    continue;
                }

                debug!("detected changes, running a pass");
                if let Err(e) = sync_command(config) {
                    error!("Sync failed: {e}");
                }
            }
            Err(e) => {
                error!("Watch error: {e}");
                break;
            }
        }
    }

    Ok(())
}

fn scan_command(path: &PathBuf, format: &str, block_size: usize) -> Result<()> {
    info!("Scanning {}...", path.display());

    let outcome = scan::scan_base_dir(path, block_size)?;

    match format {
        "json" => {
            let as_hex: std::collections::BTreeMap<&String, Vec<String>> = outcome
                .files
                .iter()
                .map(|(name, digests)| {
                    (name, digests.iter().map(|d| d.to_hex()).collect())
                })
                .collect();
            let json = serde_json::to_string_pretty(&as_hex)?;
            eprintln!("{json}");
        }
        _ => {
            eprintln!("Files: {}", outcome.files.len());
            let total_blocks: usize = outcome.files.values().map(Vec::len).sum();
            eprintln!("Blocks: {total_blocks}");

            let mut names: Vec<_> = outcome.files.keys().collect();
            names.sort();
            for name in names {
                eprintln!("  {} ({} blocks)", name, outcome.files[name].len());
            }
        }
    }

    for file in &outcome.failed {
        error!("unreadable: {file}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Option<String> {
        Some("127.0.0.1:9001".to_string())
    }

    #[test]
    fn test_build_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = build_config(&dir.path().to_path_buf(), addr(), None).unwrap();
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.meta_addr, "127.0.0.1:9001");
    }

    #[test]
    fn test_build_config_cli_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".blocksync.toml"),
            "block_size = 1024\nmeta_addr = \"10.0.0.5:9001\"\n",
        )
        .unwrap();

        let with_flag =
            build_config(&dir.path().to_path_buf(), addr(), Some(2048)).unwrap();
        assert_eq!(with_flag.block_size, 2048);
        assert_eq!(with_flag.meta_addr, "127.0.0.1:9001");

        let without_flag = build_config(&dir.path().to_path_buf(), None, None).unwrap();
        assert_eq!(without_flag.block_size, 1024);
        assert_eq!(without_flag.meta_addr, "10.0.0.5:9001");
    }

    #[test]
    fn test_build_config_requires_an_address() {
        let dir = tempfile::tempdir().unwrap();
        assert!(build_config(&dir.path().to_path_buf(), None, None).is_err());
    }
}
