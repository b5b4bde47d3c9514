use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use halo_gate::config::{Cli, HaloConfig, LogFormat, LoggingConfig};
use halo_gate::http::HttpServer;
use halo_gate::ratelimit::{select_store, RateLimiter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = HaloConfig::load(Cli::parse())?;

    init_tracing(&config.logging);

    info!("Starting halo-gate admission service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let limits = &config.rate_limiting;
    let store = select_store(
        limits.redis_url.as_deref(),
        limits.store_timeout(),
        limits.purge_interval(),
    )
    .await;
    let limiter = RateLimiter::new(store, limits.policy_table()?);
    info!(
        backend = limiter.backend_name(),
        general_points = limits.max_requests,
        general_window_ms = limits.window_ms,
        "Rate limiter initialized"
    );

    let server = HttpServer::new(
        config.server.http_addr,
        limiter,
        config.server.admin_token.as_deref(),
    );

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("halo-gate stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Resolve on Ctrl+C or SIGTERM. A handler that cannot be installed never
/// fires, so the other one still can.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = ctrl_c => "ctrl-c",
        _ = terminate => "sigterm",
    };
    info!(signal = received, "Draining in-flight requests before exit");
}
