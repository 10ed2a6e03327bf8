//! Event Correlator
//!
//! Reads newline-delimited JSON events from stdin and writes one aggregated
//! event per completed correlation group to stdout:
//! - Groups keyed by correlation id (or a configured payload field)
//! - Durable group storage (in-memory or SQLite)
//! - Background expiry sweep on the primary node

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use correlation_core::Event;
use correlator::{
    CollectionPolicy, CorrelationKeyStrategy, CorrelatorConfig, EventCorrelator, LogListener,
};
use group_store::{build_store, health::check_store, StoreConfig};
use telemetry::{health, init_tracing_from_env, metrics};

/// Application configuration.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default)]
    correlation: CorrelatorConfig,

    #[serde(default)]
    store: StoreConfig,

    /// Payload field holding the correlation key; the event's correlation
    /// id is used when unset
    #[serde(default)]
    key_field: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting Event Correlator v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    let store = build_store(&config.store).context("Failed to open group store")?;
    if check_store(store.as_ref()).await {
        health().store.set_healthy();
    } else {
        health().store.set_unhealthy("Store check failed");
    }

    let key_strategy = match &config.key_field {
        Some(field) => CorrelationKeyStrategy::PayloadField(field.clone()),
        None => CorrelationKeyStrategy::CorrelationId,
    };
    let policy = CollectionPolicy::new().with_key_strategy(key_strategy);

    let (expired_tx, mut expired_rx) = mpsc::unbounded_channel::<Event>();
    let correlator = Arc::new(
        EventCorrelator::new(policy, store, config.correlation.clone())
            .context("Invalid correlator configuration")?
            .with_listener(Arc::new(LogListener))
            .with_expiry_output(expired_tx),
    );
    correlator
        .start()
        .context("Failed to start expiry sweep")?;

    let report = health().report();
    if report.status.is_serving() {
        info!(status = ?report.status, "Correlator ready");
    } else {
        warn!(health = ?report, "Starting with an unhealthy group store");
    }

    // Results forwarded by the expiry sweep
    let expired_writer = tokio::spawn(async move {
        while let Some(event) = expired_rx.recv().await {
            emit(&event);
        }
    });

    tokio::select! {
        result = read_events(&correlator) => {
            if let Err(e) = result {
                error!("Input error: {:#}", e);
            }
            info!("Input exhausted");
        }
        _ = shutdown_signal() => {}
    }

    info!("Shutting down...");
    correlator.stop().await;
    drop(correlator);
    if let Err(e) = expired_writer.await {
        warn!("Expiry output task failed: {}", e);
    }

    info!(
        metrics = ?metrics().snapshot(),
        health = ?health().report(),
        "Shutdown complete"
    );
    Ok(())
}

/// Feeds stdin lines through the correlator until EOF.
async fn read_events(correlator: &EventCorrelator<CollectionPolicy>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }

        let event: Event = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Skipping malformed event");
                continue;
            }
        };

        match correlator.process(event).await {
            Ok(Some(aggregated)) => emit(&aggregated),
            Ok(None) => {}
            Err(e) if e.is_config() => {
                error!(code = e.error_code().unwrap_or("-"), "Event rejected: {}", e);
            }
            Err(e) => {
                error!(retryable = e.is_retryable(), "Processing failed: {}", e);
            }
        }
    }

    Ok(())
}

fn emit(event: &Event) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => error!(event_id = %event.id, "Failed to serialize result: {}", e),
    }
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("CORRELATOR")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // Flat overrides for the settings operators change most
    if let Ok(path) = std::env::var("CORRELATOR_STORE_PATH") {
        config.store.path = path;
    }
    if let Ok(primary) = std::env::var("CORRELATOR_PRIMARY") {
        config.correlation.primary = primary == "1" || primary.eq_ignore_ascii_case("true");
    }
    if let Ok(timeout) = std::env::var("CORRELATOR_TIMEOUT_MS") {
        config.correlation.timeout_ms = timeout
            .parse()
            .context("CORRELATOR_TIMEOUT_MS must be a number of milliseconds")?;
    }

    info!(
        partition_prefix = %config.correlation.partition_prefix,
        backend = ?config.store.backend,
        timeout_ms = config.correlation.timeout_ms,
        primary = config.correlation.primary,
        "Loaded configuration"
    );

    Ok(config)
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
