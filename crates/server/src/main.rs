mod bootstrap;
mod health;
mod intake;
mod sheets;
mod webhook;

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;

use delguur_core::config::{AppConfig, LoadOptions, LogFormat};

use crate::webhook::WebhookState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);
    run(config).await
}

fn init_logging(config: &AppConfig) {
    let level = config.logging.level.parse().unwrap_or(tracing::Level::INFO);
    let builder = tracing_subscriber::fmt().with_target(false).with_max_level(level);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let application = bootstrap::bootstrap_with_config(config).await?;
    let verify_token =
        application.config.channel.verify_token.expose_secret().to_string();

    let app = webhook::router(WebhookState {
        pipeline: Arc::clone(&application.pipeline),
        verify_token,
    })
    .merge(health::router(application.db_pool.clone()));

    let address = format!(
        "{}:{}",
        application.config.server.bind_address, application.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(event_name = "system.server_listening", %address, "accepting webhook traffic");

    let grace = Duration::from_secs(application.config.server.graceful_shutdown_secs.max(1));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    wait_for_shutdown().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(grace, server).await {
        Ok(joined) => joined??,
        Err(_) => {
            tracing::warn!(
                event_name = "system.shutdown_grace_elapsed",
                "connections still open after the grace period"
            );
        }
    }

    application.db_pool.close().await;
    tracing::info!(event_name = "system.shutdown_complete", "goodbye");
    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.shutdown_signal_failed",
            error = %error,
            "could not listen for the shutdown signal"
        );
    }
    tracing::info!(event_name = "system.shutdown_requested", "shutting down");
}
