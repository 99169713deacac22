//! # Redis Streams Demo Server
//!
//! Publishes a `user_created` event on every `GET /` and consumes the same
//! stream through a consumer group, logging each event it receives.
//!
//! Configuration is layered: built-in defaults, then the JSON file named by
//! `--config-path` (default `server_streams.conf`), then environment
//! variables and CLI flags. A `.env` file is loaded first.
//!
//! Ctrl-C or SIGTERM stops the HTTP listener, drains the consumer and closes
//! both Redis connections.

mod streams_logic;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use lib_streams::connections::{StreamConnection, StreamStore};
use lib_streams::loggers::{LogOptions, init_tracing};
use lib_streams::streams::{ConsumerServer, StreamPublisher, shutdown_signal};
use streams_logic::config::{Config, load_config};
use streams_logic::{handlers, routes};

const APP_NAME: &str = "server_streams";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = load_config(Config::parse())?;

    let mut log_options = LogOptions::new(APP_NAME)
        .with_level(config.log_level())
        .with_json_console(config.log_json.unwrap_or(false));
    log_options.log_dir = config.log_dir.clone();
    let _guard = init_tracing(&log_options)?;

    // Validate everything before any connection is attempted.
    let server_config = config.server_config()?;
    let registration = config.registration()?;

    let publisher_connection = Arc::new(StreamConnection::new(server_config.redis_config())?);
    publisher_connection.connect().await?;
    let publisher = Arc::new(
        StreamPublisher::new(publisher_connection.clone(), registration)
            .with_span(tracing::info_span!("publisher", app = APP_NAME)),
    );

    let mut server = ConsumerServer::new(server_config)?
        .with_span(tracing::info_span!("consumer", app = APP_NAME));
    handlers::register(&mut server)?;
    let server = Arc::new(server);
    server
        .listen(|| tracing::info!("Consumer server is listening"))
        .await?;

    let app = routes::router(routes::AppState::new(publisher, server.clone()));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port())).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");

    let (signal_tx, signal_rx) = tokio::sync::oneshot::channel();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let signal = shutdown_signal().await;
            tracing::info!(%signal, "Shutdown signal received");
            let _ = signal_tx.send(signal);
        })
        .await;

    let signal = signal_rx.await.unwrap_or("shutdown");
    if let Err(e) = server.on_shutdown(signal).await {
        tracing::warn!(error = %e, "Consumer shutdown reported an error");
    }
    publisher_connection.close().await?;
    served?;

    tracing::info!("Shutdown complete.");
    Ok(())
}
