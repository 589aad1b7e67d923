use std::{env, net::SocketAddr, time::Duration};

use anyhow::Context;
use lexgate_server::config::loader::{DEFAULT_CONFIG_FILE, load_config};
use lexgate_server::{RatePolicy, Services, build_router, observability};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    // Initialize tracing early with the default level
    observability::init_tracing();

    let config_path = resolve_config_path();
    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    tracing::info!(path = %config_path, "Configuration loaded");
    observability::apply_logging_level(&cfg.logging.level);

    lexgate_server::metrics::init_metrics();

    let services = Services::from_config(&cfg).await;
    let hooks = services.spawn_event_hooks().await;

    let app = build_router(&services, RatePolicy::relaxed());
    let addr = cfg.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, backend = services.store.backend_name(), "lexgate listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    // Dropping the last sender closes the bus; the dispatcher drains and exits.
    drop(services);
    let _ = tokio::time::timeout(Duration::from_secs(5), hooks).await;
    Ok(())
}

/// `--config <path>`, then `LEXGATE_CONFIG`, then the default file.
fn resolve_config_path() -> String {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return path;
            }
        }
    }

    match env::var("LEXGATE_CONFIG") {
        Ok(path) if !path.is_empty() => path,
        _ => DEFAULT_CONFIG_FILE.to_string(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
