//! # livepad-server
//!
//! Sync server for end-to-end encrypted shared scratchpads.
//!
//! Clients derive a room id and a password hash from a shared secret and
//! only ever send ciphertext. This binary provides:
//! - **WebSocket sync** (`/ws`): join a room, then add, edit and delete
//!   notes and files with every change fanned out to the other members
//! - **Encrypted file storage**: upload and download of opaque file bytes
//! - **Expiry sweeping**: rooms and their files disappear once their
//!   lifetime is up
//! - **Per-room upload rate limiting**

mod api;
mod authority;
mod blob_store;
mod config;
mod error;
mod fanout;
mod rate_limit;
mod session;
mod sweeper;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use livepad_shared::constants::APP_NAME;
use livepad_store::RoomStore;

use crate::api::AppState;
use crate::authority::RoomAuthority;
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;
use crate::session::SessionRegistry;
use crate::sweeper::ExpirySweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing, filtered by RUST_LOG when set
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,livepad_server=debug")),
        )
        .init();

    info!("Starting {} server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = Arc::new(ServerConfig::from_env());
    info!(?config, "Configuration ready");

    // -----------------------------------------------------------------------
    // 3. Open storage and build the room authority
    // -----------------------------------------------------------------------
    let db_path = config.database_path();
    let store = RoomStore::open(&db_path, config.room_limits())?;
    info!(path = %db_path.display(), "Room store opened");

    let blob_store = Arc::new(
        BlobStore::new(config.blob_storage_path.clone(), config.max_file_size).await?,
    );

    let registry = Arc::new(SessionRegistry::new());
    let authority = Arc::new(RoomAuthority::new(
        store,
        blob_store,
        registry,
        Arc::clone(&config),
    ));

    let rate_limiter = RateLimiter::per_window(config.upload_rate_limit, config.upload_rate_window);

    let app_state = AppState {
        authority: Arc::clone(&authority),
        rate_limiter: rate_limiter.clone(),
        config: Arc::clone(&config),
    };

    // -----------------------------------------------------------------------
    // 4. Expiry sweeper and rate-limit purge
    // -----------------------------------------------------------------------

    // Expiry sweeper; first pass runs right away
    let sweeper = ExpirySweeper::new(Arc::clone(&authority), config.sweep_interval).spawn();

    // Evict rate-limit buckets that have been idle for two windows
    let limiter = rate_limiter.clone();
    let idle = config.upload_rate_window * 2;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            ticker.tick().await;
            limiter.purge_stale(idle).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server until it fails or Ctrl+C
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, stopping");
        }
    }

    sweeper.abort();
    Ok(())
}
