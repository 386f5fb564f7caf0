//! chathouse Server Entry Point
//!
//! Wires the pipeline together: SQLite store, append log, hot cache,
//! session registry, message service with its batch drainer, and the axum
//! router. Configuration comes from the environment (see `config.rs`); a
//! `.env` file is honored in development.
//!
//! Shutdown is graceful: SIGINT/SIGTERM stops accepting connections, the
//! drainer is stopped, and one final drain empties the append log so a
//! clean restart starts from an empty journal.

use chathouse_server::{
    create_router, AppState, BroadcastFn, Config, MessageService, SessionRegistry,
};
use chathouse_storage::{cache::DEFAULT_CAPACITY, MessageWal, RecentCache};
use chathouse_store::{MessageStore, SideStore, SqliteStore, UserStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("starting chathouse server");
    info!("configuration:");
    info!("  environment: {:?}", config.environment);
    info!("  wal path: {}", config.wal_path.display());
    info!(
        "  rate limit: {} requests / {:?} (block time {:?})",
        config.rate_limit_max_requests, config.rate_limit_window, config.rate_limit_block_time
    );
    info!("  drain interval: {:?}", config.drain_interval);

    // Long-term store (messages, users, admission side state).
    let store = Arc::new(SqliteStore::from_url(&config.database_url).await?);
    let users: Arc<dyn UserStore> = store.clone();
    let messages: Arc<dyn MessageStore> = store.clone();
    let side: Arc<dyn SideStore> = store.clone();

    // Append log. Recovered entries are NOT replayed here; the first drain
    // tick picks them up.
    let wal = Arc::new(MessageWal::open(&config.wal_path).await?);
    let pending = wal.snapshot().await?.len();
    if pending > 0 {
        info!(
            pending,
            "recovered log entries; the first drain will persist them"
        );
    }

    let cache = Arc::new(RecentCache::new(DEFAULT_CAPACITY));
    let registry = Arc::new(SessionRegistry::new());

    // The service broadcasts through a capability, not a registry
    // reference; ownership stays cycle-free.
    let broadcast: BroadcastFn = {
        let registry = registry.clone();
        Arc::new(move |frame| {
            registry.broadcast(frame);
        })
    };

    let service = Arc::new(MessageService::new(wal, cache, messages, broadcast));

    let (drainer_stop, drainer_stop_rx) = tokio::sync::oneshot::channel::<()>();
    let drainer = service
        .clone()
        .spawn_drainer(config.drain_interval, drainer_stop_rx);

    let state = AppState {
        config: Arc::new(config.clone()),
        users,
        side,
        service: service.clone(),
        registry,
    };
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("chathouse server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Stop the drainer, then empty the log so a clean shutdown leaves
    // nothing to recover.
    let _ = drainer_stop.send(());
    drainer.await.ok();
    match service.drain_once().await {
        Ok(count) if count > 0 => info!(count, "final drain complete"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "final drain failed; entries remain in the log"),
    }

    info!("chathouse server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("received SIGTERM, initiating graceful shutdown");
        }
    }
}
