#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use clap::Parser;
use excerpt_core::{
    Backends, ExcerptService,
    audit::TracingAuditSink,
    publish::HttpEventPublisher,
    signature::{HttpSignatureVerifier, SignatureVerifier, UnconfiguredVerifier},
    store::{FsObjectStore, InMemoryTemplateStore, SqliteRecordStore},
};
use server::config::{CliArgs, ServerConfig};
use server::telemetry::{TelemetryProviders, init_telemetry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(config.log_format)?;

    let service = ExcerptService::new(config.service.clone(), backends(&config).await?);

    let listener = TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server_addr))?;
    log_startup_info(&config);

    axum::serve(listener, server::http::router(service.clone()))
        .with_graceful_shutdown(shutdown_signal(service, providers))
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

async fn backends(config: &ServerConfig) -> anyhow::Result<Backends> {
    let raw = tokio::fs::read(&config.templates_path)
        .await
        .with_context(|| format!("failed to read {}", config.templates_path.display()))?;
    let templates = InMemoryTemplateStore::from_json(&raw)
        .with_context(|| format!("invalid template catalogue {}", config.templates_path.display()))?;
    if templates.is_empty() {
        tracing::warn!(path = %config.templates_path.display(), "Template catalogue is empty");
    }

    let verifier: Arc<dyn SignatureVerifier> = match &config.verifier_url {
        Some(url) => Arc::new(
            HttpSignatureVerifier::new(url.clone(), config.verifier_timeout)
                .context("failed to build verifier client")?,
        ),
        None => Arc::new(UnconfiguredVerifier),
    };
    let publisher =
        HttpEventPublisher::new(config.publisher_url.clone(), config.service.publish_timeout)
            .context("failed to build publisher client")?;

    let records = SqliteRecordStore::open(&config.database_path).with_context(|| {
        format!("failed to open record store {}", config.database_path.display())
    })?;

    // One filesystem root serves every bucket.
    let objects = Arc::new(FsObjectStore::new(config.storage_root.clone()));

    Ok(Backends {
        records: Arc::new(records),
        templates: Arc::new(templates),
        staging: objects.clone(),
        signatures: objects.clone(),
        artifacts: objects,
        verifier,
        publisher: Arc::new(publisher),
        audit: Arc::new(TracingAuditSink),
    })
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting excerpt service on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting excerpt service on {} with {} publish workers (signing {})",
            config.server_addr,
            config.service.num_publish_workers,
            if config.service.signature_enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
    }
}

async fn shutdown_signal(service: ExcerptService, providers: TelemetryProviders) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // Health turns DOWN and new generation requests are refused from here on,
    // while in-flight HTTP requests are still allowed to finish.
    service.shutdown().await;

    providers.shutdown();
}
