// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for relay-core.
//!
//! This module provides [`EngineRuntime`] which wires the store, executor,
//! processor, local trigger worker, and optional reconciler together inside
//! an existing tokio application, instead of running relay-core as a
//! standalone server.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use relay_core::runtime::EngineRuntime;
//! use relay_core::store::SqliteRunStore;
//! use relay_core::executor::{RegistryExecutor, ServiceRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteRunStore::from_path(".data/relay.db").await?);
//!     let executor = Arc::new(RegistryExecutor::new(ServiceRegistry::new()));
//!
//!     let runtime = EngineRuntime::builder()
//!         .store(store)
//!         .executor(executor)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... submit via runtime.api() ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::api::TaskApiState;
use crate::executor::Executor;
use crate::processor::StackProcessor;
use crate::reconciler::{Reconciler, ReconcilerConfig};
use crate::store::RunStore;
use crate::trigger::{LocalTrigger, Trigger};

/// Builder for creating an [`EngineRuntime`].
#[derive(Default)]
pub struct EngineRuntimeBuilder {
    store: Option<Arc<dyn RunStore>>,
    executor: Option<Arc<dyn Executor>>,
    reconciler: Option<ReconcilerConfig>,
}

impl std::fmt::Debug for EngineRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntimeBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("executor", &self.executor.as_ref().map(|_| "..."))
            .field("reconciler", &self.reconciler)
            .finish()
    }
}

impl EngineRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run store (required).
    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the executor adapter (required).
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Enable the background reconciler with the given configuration.
    ///
    /// Disabled by default; embedded tests usually drive
    /// [`Reconciler::run_once`] by hand instead.
    pub fn reconciler(mut self, config: ReconcilerConfig) -> Self {
        self.reconciler = Some(config);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<EngineRuntimeConfig> {
        let store = self.store.ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let executor = self
            .executor
            .ok_or_else(|| anyhow::anyhow!("executor is required"))?;

        Ok(EngineRuntimeConfig {
            store,
            executor,
            reconciler: self.reconciler,
        })
    }
}

/// Configuration for an [`EngineRuntime`].
pub struct EngineRuntimeConfig {
    store: Arc<dyn RunStore>,
    executor: Arc<dyn Executor>,
    reconciler: Option<ReconcilerConfig>,
}

impl std::fmt::Debug for EngineRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntimeConfig")
            .field("store", &"...")
            .field("executor", &"...")
            .field("reconciler", &self.reconciler)
            .finish()
    }
}

impl EngineRuntimeConfig {
    /// Start the runtime, spawning the trigger worker (and the reconciler
    /// when configured).
    pub async fn start(self) -> Result<EngineRuntime> {
        let (local_trigger, mut rx) = LocalTrigger::channel();
        let trigger: Arc<dyn Trigger> = Arc::new(local_trigger);

        let processor = Arc::new(StackProcessor::new(
            self.store.clone(),
            self.executor.clone(),
            trigger.clone(),
        ));
        let api = Arc::new(TaskApiState::new(self.store.clone(), trigger.clone()));

        let shutdown = Arc::new(Notify::new());

        // Trigger worker: drains the local channel and runs each processing
        // step as its own task, so unrelated causal chains progress
        // concurrently.
        let worker_processor = processor.clone();
        let worker_shutdown = shutdown.clone();
        let worker_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_shutdown.notified() => break,
                    delivered = rx.recv() => {
                        let Some(stack_run_id) = delivered else { break };
                        let processor = worker_processor.clone();
                        tokio::spawn(async move {
                            if let Err(e) = processor.process(&stack_run_id).await {
                                error!(%stack_run_id, error = %e, "Processing step failed");
                            }
                        });
                    }
                }
            }
        });

        let (reconciler_shutdown, reconciler_handle) = match self.reconciler {
            Some(config) => {
                let reconciler = Reconciler::new(
                    self.store.clone(),
                    trigger.clone(),
                    processor.clone(),
                    config,
                );
                let handle = reconciler.shutdown_handle();
                (Some(handle), Some(tokio::spawn(reconciler.run())))
            }
            None => (None, None),
        };

        info!("EngineRuntime started");

        Ok(EngineRuntime {
            store: self.store,
            api,
            processor,
            trigger,
            shutdown,
            worker_handle,
            reconciler_shutdown,
            reconciler_handle,
        })
    }
}

/// A running relay-core engine that can be embedded in an application.
///
/// The runtime manages the local trigger worker and, optionally, the
/// reconciler. Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct EngineRuntime {
    store: Arc<dyn RunStore>,
    api: Arc<TaskApiState>,
    processor: Arc<StackProcessor>,
    trigger: Arc<dyn Trigger>,
    shutdown: Arc<Notify>,
    worker_handle: JoinHandle<()>,
    reconciler_shutdown: Option<Arc<Notify>>,
    reconciler_handle: Option<JoinHandle<()>>,
}

impl EngineRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    /// Get a reference to the task API state.
    pub fn api(&self) -> &Arc<TaskApiState> {
        &self.api
    }

    /// Get a reference to the run store.
    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Get a reference to the processor.
    pub fn processor(&self) -> &Arc<StackProcessor> {
        &self.processor
    }

    /// Get a reference to the trigger transport.
    pub fn trigger(&self) -> &Arc<dyn Trigger> {
        &self.trigger
    }

    /// Check if the trigger worker is still running.
    pub fn is_running(&self) -> bool {
        !self.worker_handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("EngineRuntime shutting down...");

        self.shutdown.notify_one();
        if let Some(handle) = &self.reconciler_shutdown {
            handle.notify_one();
        }

        if let Err(e) = self.worker_handle.await {
            error!("Trigger worker task panicked: {}", e);
            return Err(anyhow::anyhow!("trigger worker panicked: {}", e));
        }
        if let Some(handle) = self.reconciler_handle {
            if let Err(e) = handle.await {
                error!("Reconciler task panicked: {}", e);
                return Err(anyhow::anyhow!("reconciler panicked: {}", e));
            }
        }

        info!("EngineRuntime shutdown complete");
        Ok(())
    }
}
