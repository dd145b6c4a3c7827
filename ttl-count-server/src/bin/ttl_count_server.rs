use std::net::SocketAddr;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing::warn;
use ttl_count::RequestCounter;
use ttl_count::persist;
use ttl_count_server::api;
use ttl_count_server::config::Cli;
use ttl_count_server::config::Settings;
use ttl_count_server::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level, cli.log_format)?;

    let settings = Settings::from_env();
    let policy = cli.admission_policy();
    info!(
        ttl = ?settings.ttl,
        capacity = settings.capacity.get(),
        processing_delay = ?settings.processing_delay,
        ?policy,
        state_file = %cli.state_file.display(),
        "starting"
    );

    let seed = persist::load(&cli.state_file).await;
    let counter = RequestCounter::new(settings.counter_config()?, seed);
    info!(live = counter.count(), "restored admissions");

    let addr = SocketAddr::new(cli.host, settings.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = counter.spawn_sweeper(shutdown_rx);

    let app = api::router(counter.clone(), policy, settings.processing_delay);
    info!(%addr, "listening");
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server stopped with an error");
    }

    // In-flight requests have drained; stop evicting and capture what is left
    let _ = shutdown_tx.send(true);
    match sweeper.await {
        Ok(report) => info!(evicted = report.evicted, "sweeper finished"),
        Err(e) => warn!(error = %e, "sweeper task failed"),
    }

    if let Err(e) = persist::save(&cli.state_file, &counter.snapshot()).await {
        error!(error = %e, "failed to save admissions");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::SignalKind;
        use tokio::signal::unix::signal;

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
