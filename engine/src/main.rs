//! Campaign engine server.
//!
//! Hosts the provider webhook endpoint and the open/click tracking
//! endpoints, and runs the background scheduler that promotes due
//! scheduled campaigns and re-drives deferred batches.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use campaign_engine::send::TransportResult;
use campaign_engine::web::{self, AppState};
use campaign_engine::{
    ChannelTransport, Config, Dispatcher, MemoryStore, Provider, Suppressor, WebhookProcessor,
};
use campaign_engine::quota::QuotaGuard;

/// Transport stand-in that accepts everything and logs the attempt.
///
/// The real SMTP/HTTP transport is wired in by the hosting application;
/// this keeps the server runnable on its own.
struct LoggingTransport;

#[async_trait]
impl ChannelTransport for LoggingTransport {
    async fn send_email(
        &self,
        provider: &Provider,
        to: &str,
        subject: &str,
        _html: &str,
        _from_name: &str,
        _from_address: &str,
    ) -> TransportResult {
        info!(provider = %provider.name, to = %to, subject = %subject, "email_transport_logged");
        TransportResult::Accepted {
            provider_message_id: None,
        }
    }

    async fn send_sms(
        &self,
        provider: &Provider,
        to_e164: &str,
        body: &str,
        sender_name: &str,
    ) -> TransportResult {
        info!(
            provider = %provider.name,
            to = %to_e164,
            sender = %sender_name,
            body_length = body.len(),
            "sms_transport_logged"
        );
        TransportResult::Accepted {
            provider_message_id: None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("campaign_server_starting");

    let config = Arc::new(Config::from_env());
    info!(
        port = config.port,
        batch_size = config.batch_size,
        batch_delay_secs = config.batch_delay_secs,
        scheduler_poll_secs = config.scheduler_poll_secs,
        webhook_signing_configured = config.webhook_signing_key.is_some(),
        "config_loaded"
    );

    let store = Arc::new(MemoryStore::new());
    let quota = Arc::new(QuotaGuard::new());

    // Default provider credential; the hosting application registers real
    // ones alongside it.
    let default_provider = Provider::new(
        "default",
        config.default_daily_limit,
        config.default_hourly_limit,
    );
    info!(provider_id = %default_provider.id, "default_provider_registered");
    store.insert_provider(default_provider);
    let transport = Arc::new(LoggingTransport);

    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        quota,
        transport,
        Arc::clone(&config),
    );
    let reconciler = dispatcher.reconciler().clone();
    let suppressor = Suppressor::new(Arc::clone(&store), config.honor_resubscribe);
    let processor = Arc::new(WebhookProcessor::new(
        Arc::clone(&store),
        reconciler.clone(),
        suppressor,
    ));

    // Background scheduler for due campaigns and deferred batches
    let scheduler = tokio::spawn(dispatcher.clone().run_scheduler());

    let state = AppState::new(Arc::clone(&config), store, reconciler, processor);
    let app = web::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "campaign_server_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    scheduler.abort();
    info!("campaign_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("campaign_server_shutting_down");
}
