// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor adapter boundary.
//!
//! The executor is the seam between the engine and the excluded
//! interpreter/runtime: given one stack run, it executes one slice and
//! reports what happened. A single slice performs at most one external call
//! before returning [`Outcome::Suspended`] or finishing; that bound is what
//! makes causal ordering provable.
//!
//! Executors are PURE execution engines - they do NOT touch the run store.
//! Persisting outcomes and chaining triggers is the processor's job.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::error::EngineError;
use crate::store::StackRunRecord;

/// Errors from service adapter invocations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// The method does not exist on this service.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Arguments did not match the method's expectations.
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// The call was made and failed.
    #[error("{0}")]
    CallFailed(String),
}

/// Result of one slice of execution.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The slice ran to the end and produced a result.
    Completed {
        /// The result value.
        result: Value,
    },
    /// The slice raised an error.
    Failed {
        /// The error message, prefixed with a stable code where available.
        error: String,
    },
    /// The slice requested an external call and froze itself.
    Suspended {
        /// Service to call.
        service: String,
        /// Method on the service.
        method: String,
        /// Argument list for the call.
        args: Vec<Value>,
        /// Opaque continuation capturing the suspension point.
        continuation: Vec<u8>,
    },
}

/// Boundary to the excluded interpreter/runtime.
///
/// For a fresh run, `run` starts the call from scratch with its args. For a
/// resumed run (`continuation` and `resume_payload` both set on the record),
/// `run` decodes the continuation, injects the payload, and continues from
/// the exact suspension point.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute one slice of the given stack run.
    async fn run(&self, run: &StackRunRecord) -> Result<Outcome, EngineError>;
}

/// Uniform service boundary: every external service is invoked as
/// `(method, args) -> result | throws`. The engine does not know or care
/// what the service does.
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    /// Invoke a method on this service.
    async fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, ServiceError>;
}

/// Registry of service adapters keyed by service name.
#[derive(Default)]
pub struct ServiceRegistry {
    adapters: HashMap<String, Arc<dyn ServiceAdapter>>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under a service name, replacing any previous one.
    pub fn register(
        &mut self,
        service_name: impl Into<String>,
        adapter: Arc<dyn ServiceAdapter>,
    ) -> &mut Self {
        self.adapters.insert(service_name.into(), adapter);
        self
    }

    /// Look up an adapter by service name.
    pub fn get(&self, service_name: &str) -> Option<&Arc<dyn ServiceAdapter>> {
        self.adapters.get(service_name)
    }

    /// Registered service names, for diagnostics.
    pub fn service_names(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.service_names())
            .finish()
    }
}

/// Executor that dispatches stack runs to registered service adapters.
///
/// This covers every leaf call the engine schedules; adapters never suspend.
/// Task slices that can suspend come from an interpreter-backed [`Executor`]
/// layered on top (out of scope here, scripted in tests).
pub struct RegistryExecutor {
    registry: ServiceRegistry,
}

impl RegistryExecutor {
    /// Create an executor over the given registry.
    pub fn new(registry: ServiceRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Executor for RegistryExecutor {
    async fn run(&self, run: &StackRunRecord) -> Result<Outcome, EngineError> {
        let Some(adapter) = self.registry.get(&run.service_name) else {
            return Ok(Outcome::Failed {
                error: format!("UNKNOWN_SERVICE: no adapter registered for '{}'", run.service_name),
            });
        };

        match adapter.invoke(&run.method_name, &run.args.0).await {
            Ok(result) => Ok(Outcome::Completed { result }),
            Err(e) => Ok(Outcome::Failed {
                error: e.to_string(),
            }),
        }
    }
}
