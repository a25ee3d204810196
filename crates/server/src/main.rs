//! blocksync-server: block and metadata store server
//!
//! Two subcommands, one per store. Each accepted connection runs a
//! read-message/handle/respond loop over the framed protocol until the peer
//! disconnects.

use std::io::{BufReader, BufWriter};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::{debug, info, warn};

use blocksync_core::protocol::{err_kind, Message, ProtocolReader, ProtocolWriter};
use blocksync_core::{BlockStore, MetaStore, SyncError};

#[derive(Parser)]
#[command(name = "blocksync-server")]
#[command(version)]
#[command(about = "Block and metadata store server for blocksync")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the content-addressed block store
    Blockstore {
        /// Address to listen on (host:port)
        #[arg(short, long, default_value = "127.0.0.1:9000")]
        listen: String,
    },

    /// Serve the file metadata store
    Metastore {
        /// Address to listen on (host:port)
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        listen: String,

        /// Block store address handed out to clients
        #[arg(long)]
        blockstore_addr: String,
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
            eprintln!("blocksync-server {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Blockstore { listen } => {
            serve_blockstore(&listen)?;
        }
        Commands::Metastore {
            listen,
            blockstore_addr,
        } => {
            serve_metastore(&listen, blockstore_addr)?;
        }
    }

    Ok(())
}

fn serve_blockstore(listen: &str) -> Result<()> {
    let store = Arc::new(BlockStore::new());
    let listener = TcpListener::bind(listen)?;
    info!("block store listening on {}", listener.local_addr()?);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    if let Err(e) = handle_block_conn(&store, stream) {
                        warn!("block connection error: {e}");
                    }
                });
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
    Ok(())
}

fn serve_metastore(listen: &str, blockstore_addr: String) -> Result<()> {
    let store = Arc::new(MetaStore::new(Some(blockstore_addr)));
    let listener = TcpListener::bind(listen)?;
    info!("metadata store listening on {}", listener.local_addr()?);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    if let Err(e) = handle_meta_conn(&store, stream) {
                        warn!("meta connection error: {e}");
                    }
                });
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
    Ok(())
}

/// Split a stream into a protocol reader/writer pair
fn framed(
    stream: TcpStream,
) -> Result<
    (
        ProtocolReader<BufReader<TcpStream>>,
        ProtocolWriter<BufWriter<TcpStream>>,
    ),
    SyncError,
> {
    let read_half = stream.try_clone()?;
    Ok((
        ProtocolReader::new(BufReader::new(read_half)),
        ProtocolWriter::new(BufWriter::new(stream)),
    ))
}

fn handle_block_conn(store: &BlockStore, stream: TcpStream) -> Result<(), SyncError> {
    let peer = stream.peer_addr()?;
    debug!(%peer, "block store connection opened");
    let (mut reader, mut writer) = framed(stream)?;

    loop {
        let msg = match reader.read_message() {
            Ok(msg) => msg,
            Err(e) => {
                // EOF or a dead peer ends the session
                debug!(%peer, "block store connection closed: {e}");
                break;
            }
        };

        match msg {
            Message::GetBlock { digest } => match store.get(&digest) {
                Ok(data) => writer.send_block(&data)?,
                Err(e) => writer.send_error(err_kind::NOT_FOUND, &e.to_string())?,
            },

            Message::PutBlock { data } => match store.put(data) {
                Ok(_) => writer.send_ack()?,
                Err(e) => writer.send_error(err_kind::INVALID, &e.to_string())?,
            },

            Message::HasBlocks { digests } => {
                writer.send_block_set(&store.has_subset(&digests))?;
            }

            other => {
                warn!(%peer, "unexpected block store message: {other:?}");
                writer.send_error(err_kind::INTERNAL, "unexpected message type")?;
            }
        }
    }

    Ok(())
}

fn handle_meta_conn(store: &MetaStore, stream: TcpStream) -> Result<(), SyncError> {
    let peer = stream.peer_addr()?;
    debug!(%peer, "metadata store connection opened");
    let (mut reader, mut writer) = framed(stream)?;

    loop {
        let msg = match reader.read_message() {
            Ok(msg) => msg,
            Err(e) => {
                debug!(%peer, "metadata store connection closed: {e}");
                break;
            }
        };

        match msg {
            Message::FileInfoMapReq => {
                let map = store.file_info_map();
                writer.send_file_info_map(map.values())?;
            }

            Message::UpdateFile { meta } => match store.update_file(meta) {
                Ok(version) => writer.send_version(version)?,
                Err(e) if e.is_version_conflict() => writer.send_version(-1)?,
                Err(e) => writer.send_error(err_kind::INVALID, &e.to_string())?,
            },

            Message::BlockStoreAddrReq => match store.block_store_addr() {
                Ok(addr) => writer.send_addr(&addr)?,
                Err(e) => writer.send_error(err_kind::UNCONFIGURED, &e.to_string())?,
            },

            other => {
                warn!(%peer, "unexpected metadata store message: {other:?}");
                writer.send_error(err_kind::INTERNAL, "unexpected message type")?;
            }
        }
    }

    Ok(())
}
