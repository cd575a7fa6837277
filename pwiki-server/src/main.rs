//! pwiki: file-backed wiki server with a persistent mirror
//!
//! # Usage
//!
//! ```bash
//! # Serve, restoring from and mirroring into the persistent directory
//! pwiki start --working-dir ./wiki --persistent-dir /app/persistence
//!
//! # One-off maintenance passes
//! pwiki backup --working-dir ./wiki --persistent-dir /app/persistence
//! pwiki restore --working-dir ./wiki --persistent-dir /app/persistence
//! pwiki reconcile --working-dir ./wiki --persistent-dir /app/persistence
//! ```

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use pwiki_core::{Reconciler, StoreConfig, SyncEngine, Wiki};
use pwiki_server::{ServerConfig, WikiHandler};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pwiki")]
#[command(author = "pwiki Contributors")]
#[command(version = "0.1.0")]
#[command(about = "File-backed wiki server with a persistent mirror", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Working directory holding pages and attachments
    #[arg(short, long, default_value = ".")]
    working_dir: PathBuf,

    /// Persistent mirror directory (default: from pwiki.json, else /app/persistence)
    #[arg(short, long)]
    persistent_dir: Option<PathBuf>,
}

impl StoreArgs {
    fn store_config(&self) -> Result<StoreConfig> {
        let persistent_root = match &self.persistent_dir {
            Some(dir) => dir.clone(),
            None => StoreConfig::load(&self.working_dir)
                .context("Failed to load pwiki.json")?
                .persistent_root,
        };
        Ok(StoreConfig::new(self.working_dir.clone(), persistent_root))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Restore, reconcile and back up, then serve
    Start {
        /// Listen address
        #[arg(short, long, default_value = "0.0.0.0:21313")]
        addr: String,

        /// Maximum request body size in bytes
        #[arg(long, default_value_t = 10 * 1024 * 1024)]
        max_body_size: usize,

        /// Value for Access-Control-Allow-Origin
        #[arg(long, default_value = "*")]
        cors_origin: String,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Mirror the working directory into the persistent directory
    Backup {
        #[command(flatten)]
        store: StoreArgs,
    },

    /// Copy the persistent directory back into the working directory
    Restore {
        #[command(flatten)]
        store: StoreArgs,
    },

    /// Rebuild attachment listings from the files on disk
    Reconcile {
        #[command(flatten)]
        store: StoreArgs,
    },
}

fn init_tracing(debug: bool) {
    let env_filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::Start {
            addr,
            max_body_size,
            cors_origin,
            store,
        } => {
            let store_config = store.store_config()?;
            info!("Working directory: {:?}", store_config.working_root);
            info!("Persistent directory: {:?}", store_config.persistent_root);

            let (wiki, report) = Wiki::open(&store_config).context("Startup sync failed")?;
            info!(
                "Startup: restored {} pages, repaired {} listings, backed up {} pages",
                report.restore.titles.len(),
                report.reconcile.repaired.len(),
                report.backup.titles.len()
            );

            let config = ServerConfig {
                max_body_size,
                cors_origin,
            };
            let handler = Arc::new(WikiHandler::with_config(Arc::new(wiki), config));

            let addr: SocketAddr = addr.parse().context("Invalid listen address")?;
            let listener = TcpListener::bind(addr).await?;
            info!("Starting server on http://{}", addr);

            loop {
                let (stream, _) = listener.accept().await?;
                let handler = handler.clone();
                let io = TokioIo::new(stream);

                tokio::spawn(async move {
                    let service = service_fn(move |req| handle_request(req, handler.clone()));
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection: {:?}", e);
                    }
                });
            }
        }

        Commands::Backup { store } => {
            let engine = SyncEngine::new(&store.store_config()?);
            let report = engine.backup()?;
            println!("Backup: {}", report.summary());
        }

        Commands::Restore { store } => {
            let engine = SyncEngine::new(&store.store_config()?);
            let report = engine.restore()?;
            println!("Restore: {}", report.summary());
        }

        Commands::Reconcile { store } => {
            let engine = SyncEngine::new(&store.store_config()?);
            // pages with a working body keep their working blobs
            let local = engine.working().titles().unwrap_or_default();
            let report = Reconciler::new(&engine).reconcile(&local)?;
            println!(
                "Reconcile: {} listings rewritten, {} empty bodies created",
                report.repaired.len(),
                report.bodies_created.len()
            );
            for title in &report.repaired {
                println!("  {}", title);
            }
        }
    }

    Ok(())
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    handler: Arc<WikiHandler>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let response = handler.handle(req).await;
    info!("{} {} -> {}", method, uri, response.status());
    Ok(response)
}
