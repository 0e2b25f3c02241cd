// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Relay Core - Suspend/Resume Orchestration Engine
//!
//! The standalone server wires the run store, processor, HTTP trigger, task
//! API, and reconciler together. Service adapters are registered by products
//! embedding the engine; the standalone binary serves the protocol with an
//! empty registry, so every scheduled call fails with `UNKNOWN_SERVICE`
//! until adapters are plugged in.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use relay_core::api::TaskApiState;
use relay_core::config::Config;
use relay_core::executor::{RegistryExecutor, ServiceRegistry};
use relay_core::processor::StackProcessor;
use relay_core::reconciler::{Reconciler, ReconcilerConfig};
use relay_core::server::{self, AppState};
use relay_core::store::{PostgresRunStore, RunStore, SqliteRunStore};
use relay_core::trigger::{HttpTrigger, Trigger};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relay_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting Relay Core");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        http_addr = %config.http_addr,
        trigger_base_url = %config.trigger_base_url,
        stale_after_secs = config.stale_after.as_secs(),
        "Configuration loaded"
    );

    // Connect to the run store (migrations run inside the constructors)
    info!("Connecting to run store...");
    let store: Arc<dyn RunStore> = if config.database_url.starts_with("sqlite") {
        let path = config
            .database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        Arc::new(SqliteRunStore::from_path(path).await?)
    } else {
        Arc::new(PostgresRunStore::connect(&config.database_url).await?)
    };
    store.health_check().await?;
    info!("Run store connection established");

    // Chaining goes over HTTP back through this server's trigger endpoint.
    let trigger: Arc<dyn Trigger> = Arc::new(HttpTrigger::new(config.trigger_base_url.clone()));

    let executor = Arc::new(RegistryExecutor::new(ServiceRegistry::new()));
    let processor = Arc::new(StackProcessor::new(
        store.clone(),
        executor,
        trigger.clone(),
    ));

    // Reconciler: the safety net for lost triggers and crashed steps
    let reconciler = Reconciler::new(
        store.clone(),
        trigger.clone(),
        processor.clone(),
        ReconcilerConfig {
            poll_interval: config.reconcile_interval,
            stale_after: config.stale_after,
            max_trigger_attempts: config.max_trigger_attempts,
            ..ReconcilerConfig::default()
        },
    );
    let reconciler_shutdown = reconciler.shutdown_handle();
    let reconciler_handle = tokio::spawn(reconciler.run());

    info!("Relay Core initialized successfully");

    // Serve the task API + trigger endpoint until ctrl-c
    let state = Arc::new(AppState::new(
        TaskApiState::new(store.clone(), trigger.clone()),
        processor,
    ));
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(config.http_addr, state).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    reconciler_shutdown.notify_one();
    let _ = reconciler_handle.await;
    server_handle.abort();

    info!("Shutdown complete");

    Ok(())
}
