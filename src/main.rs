// ABOUTME: Main entry point for the warble agent
// ABOUTME: Initializes logging, config, cache store, session store, and the connection loop

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warble::config::Config;
use warble::connection::ConnectionManager;
use warble::pairing::{FixedNumber, PairingPrompt, StdinPrompt};
use warble::router::{CommandHandler, LoggingHandler};
use warble::session::SessionStore;
use warble::store::{CacheStore, StoreHandle};
use warble::transport::mock::MockTransport;
use warble::transport::{ConnectionEvent, Transport};

fn create_transport(config: &Config) -> Result<Arc<dyn Transport>> {
    match config.transport.transport_type.as_str() {
        "mock" => {
            tracing::warn!("Using the mock transport; no real network connection will be made");
            Ok(Arc::new(
                MockTransport::new().cycle(vec![ConnectionEvent::Opened]),
            ))
        }
        other => anyhow::bail!("Unknown transport type: {other}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic hook to log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\nPANIC! Agent crashed with the following error:\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting warble agent");

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;
    tracing::info!(
        transport = %config.transport.transport_type,
        data_dir = %config.storage.data_dir,
        subscribe_channels = config.agent.subscribe_channels.len(),
        "Configuration loaded"
    );

    let data_dir = PathBuf::from(&config.storage.data_dir);
    let store_path = data_dir.join("store.json");

    // Cache store: fail-open on missing or corrupt documents
    let store = CacheStore::load(&store_path);
    let store = StoreHandle::spawn(store, store_path);

    let sessions = SessionStore::new(data_dir.join("session"))?;
    let transport = create_transport(&config)?;

    let prompt: Arc<dyn PairingPrompt> = match &config.agent.phone_number {
        Some(number) => Arc::new(FixedNumber(number.clone())),
        None => Arc::new(StdinPrompt),
    };
    let handler: Arc<dyn CommandHandler> = Arc::new(LoggingHandler);

    let mut manager = ConnectionManager::new(
        Arc::new(config),
        transport,
        handler,
        prompt,
        sessions,
        store,
    );

    // Only a terminal logout escapes the run loop; everything else reconnects.
    if let Err(e) = manager.run().await {
        tracing::error!(error = %e, "Session terminated");
        std::process::exit(1);
    }

    Ok(())
}
