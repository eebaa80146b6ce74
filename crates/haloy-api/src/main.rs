//! Haloy deployment manager daemon.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use haloy_api::{AppState, ServerConfig, routes};
use haloy_broker::LogBroker;
use haloy_core::clock::SystemClock;
use haloy_core::id::IdFactory;
use haloy_runtime::{ContainerRuntime, DockerRuntime};
use haloy_store::Store;
use haloy_vault::Vault;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    info!(db = %config.db_path, "opening store");
    let store = Store::open(&config.db_path)
        .await
        .context("opening the state store")?;

    let vault = Arc::new(
        Vault::from_env(&config.identity_env).context("loading the encryption identity")?,
    );

    let runtime = DockerRuntime::connect(config.network_name.clone())
        .context("connecting to the container runtime")?;
    match runtime.ping().await {
        Ok(()) => info!("container runtime connected"),
        Err(e) => warn!("container runtime not responding yet: {e}"),
    }
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(runtime);
    if let Err(e) = runtime.ensure_network().await {
        warn!("could not ensure shared network at startup: {e}");
    }

    let broker = Arc::new(LogBroker::new());
    let ids = Arc::new(IdFactory::new(Arc::new(SystemClock)));
    let listen_addr = config.listen_addr;
    let state = AppState::new(runtime, store, vault, broker, ids, config);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;
    info!(addr = %listen_addr, "haloyd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("haloyd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
