//! LingUBible vote daemon - HTTP/JSON front for the vote ledger

mod error;
mod routes;
mod state;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ttlcache::TtlCache;
use votestore::{FileVoteStore, MemoryVoteStore, VoteStore, VoteTally};

use crate::routes::router;
use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Data directory for the vote log
    #[arg(short, long, default_value = "./data")]
    data: String,

    /// Keep votes in memory only (nothing is written to disk)
    #[arg(long)]
    memory: bool,

    /// How long a cached tally stays valid, in milliseconds
    #[arg(long, default_value_t = 300_000)]
    cache_ttl_ms: u64,

    /// Seconds between sweeps of expired cache entries
    #[arg(long, default_value_t = 60)]
    cleanup_interval_secs: u64,

    /// Health check mode (for Docker)
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    if args.health {
        match TcpStream::connect(&args.bind).await {
            Ok(_) => {
                println!("OK");
                std::process::exit(0);
            }
            Err(_) => {
                eprintln!("FAILED");
                std::process::exit(1);
            }
        }
    }

    info!("Starting lingud v{}", env!("CARGO_PKG_VERSION"));
    info!("Binding to {}", args.bind);

    let file_store = if args.memory {
        info!("Using in-memory vote store");
        None
    } else {
        info!("Data directory: {}", args.data);
        let store = FileVoteStore::open(&args.data)
            .with_context(|| format!("Failed to open vote store at {}", args.data))?;
        store.compact().context("Failed to compact vote log")?;
        Some(Arc::new(store))
    };

    let store: Arc<dyn VoteStore> = match &file_store {
        Some(store) => Arc::clone(store) as Arc<dyn VoteStore>,
        None => Arc::new(MemoryVoteStore::new()),
    };

    let ttl = Duration::from_millis(args.cache_ttl_ms);
    info!("Tally cache TTL: {:?}", ttl);

    let cache = Arc::new(TtlCache::new());
    let sweeper = spawn_cleanup(
        Arc::clone(&cache),
        Duration::from_secs(args.cleanup_interval_secs.max(1)),
    );

    let app = router(AppState::new(store, cache, ttl));

    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    info!("Server listening on {}", args.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    if let Some(store) = file_store {
        store.close().context("Failed to close vote store")?;
        info!("Vote store closed");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Periodically evict expired tallies so unread keys do not pile up
fn spawn_cleanup(cache: Arc<TtlCache<VoteTally>>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = cache.cleanup();
            if evicted > 0 {
                debug!(
                    "Cache sweep evicted {} expired entries ({} remain)",
                    evicted,
                    cache.size()
                );
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
