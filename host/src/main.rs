//! `repeater` - capture and replay host.
//!
//! Reads protocol lines on stdin, writes replies and notifications on stdout
//! and logs to stderr.
//!
//! Run with: `RUST_LOG=repeater=debug cargo run --bin repeater`

use anyhow::Context;
use repeater_capture::telemetry::MetricsServer;
use repeater_host::config::Config;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = Config::from_env().context("invalid configuration")?;
    info!(settings = %config.settings_path.display(), "Starting repeater host");

    let _metrics = match config.metrics_addr {
        Some(addr) => {
            let mut server = MetricsServer::new(addr);
            server.start().context("failed to start metrics exporter")?;
            Some(server)
        },
        None => None,
    };

    let session = repeater_host::start_session(&config)
        .await
        .context("failed to start capture session")?;

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    let serve = repeater_host::serve(&session, stdin, stdout, config.shutdown_timeout());

    tokio::select! {
        result = serve => {
            result.context("protocol stream failed")?;
            info!("Input closed, stopped");
        },
        () = shutdown_signal() => {
            info!("Received shutdown signal, draining in-flight replays");
            if let Err(error) = session.shutdown(config.shutdown_timeout()).await {
                warn!(error = %error, "Replays still running at shutdown");
            }
        },
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "repeater=info,repeater_host=info,repeater_capture=info,repeater_runtime=info".into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Waits for Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!(error = %error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(error) => {
                warn!(error = %error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
