use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pushrelay_core::RelayConfig;
use pushrelay_scheduler::{
    DurableEntryList, EntryStore, Registry, Scheduler, SqliteStore, StoreObserver,
    TracingObserver,
};
use tracing::{info, warn};

mod app;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pushrelay_gateway=info,pushrelay_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    // load config: PUSHRELAY_CONFIG env > ~/.pushrelay/pushrelay.toml
    let config_path = std::env::var("PUSHRELAY_CONFIG").ok();
    let config = RelayConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        RelayConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    let store: Arc<dyn EntryStore> = Arc::new(SqliteStore::new(db)?);

    // an undecodable entry aborts startup instead of being silently dropped
    let entries = DurableEntryList::open(
        Arc::clone(&store),
        Registry::with_defaults(),
        Arc::new(TracingObserver),
    )?;

    let scheduler = Scheduler::new();
    scheduler.set_observer(Arc::new(StoreObserver::new(
        store,
        Arc::new(TracingObserver),
    )))?;
    scheduler.set_entries(Box::new(entries))?;

    pushrelay_scheduler::init_http_client(Duration::from_secs(config.push.timeout_secs));
    scheduler.run();

    let addr: SocketAddr = config.listen_addr().parse()?;
    let state = Arc::new(app::AppState::new(config, scheduler));
    let router = app::build_router(Arc::clone(&state));

    info!("PushRelay gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // in-flight pushes are not awaited
    state.scheduler.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "cannot listen for ctrl-c, running until killed");
            std::future::pending::<()>().await
        }
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
