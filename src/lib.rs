mod commands;
mod config;
pub mod excel;

pub use commands::router;
pub use config::{ConfigError, ServerConfig};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn run() {
    init_tracing();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Runtime::new().expect("Failed to start tokio runtime");

    if let Err(e) = runtime.block_on(serve(config)) {
        tracing::error!(error = %e, "server stopped with an error");
        std::process::exit(1);
    }
}

/// Bind the configured address and serve until Ctrl-C
pub async fn serve(config: ServerConfig) -> std::io::Result<()> {
    let app = router(&config);
    let listener = tokio::net::TcpListener::bind(config.socket_addr()).await?;

    tracing::info!(
        addr = %listener.local_addr()?,
        max_request_bytes = config.max_request_bytes,
        "excel consolidator listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
