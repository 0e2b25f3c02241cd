// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for relay-core integration tests.
//!
//! Provides a TestContext over a temporary SQLite database plus a scripted
//! executor that stands in for the sandboxed task interpreter: task slices
//! suspend through the real continuation codec, leaf calls go through the
//! service registry.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;

use relay_core::codec::{self, ContinuationEnvelope};
use relay_core::error::EngineError;
use relay_core::executor::{
    Executor, Outcome, RegistryExecutor, ServiceAdapter, ServiceError, ServiceRegistry,
};
use relay_core::runtime::{EngineRuntime, EngineRuntimeBuilder};
use relay_core::store::{RunStore, SqliteRunStore, TASKS_SERVICE, TaskRunRecord};

/// Echo service: returns its first argument unchanged.
pub struct EchoAdapter;

#[async_trait]
impl ServiceAdapter for EchoAdapter {
    async fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, ServiceError> {
        match method {
            "echo" => Ok(args.first().cloned().unwrap_or(Value::Null)),
            other => Err(ServiceError::MethodNotFound(other.to_string())),
        }
    }
}

/// Service whose every method fails with a fixed error.
pub struct FailingAdapter(pub &'static str);

#[async_trait]
impl ServiceAdapter for FailingAdapter {
    async fn invoke(&self, _method: &str, _args: &[Value]) -> Result<Value, ServiceError> {
        Err(ServiceError::CallFailed(self.0.to_string()))
    }
}

/// Behavior of one scripted task.
#[derive(Clone)]
pub enum TaskScript {
    /// Zero-call task: complete immediately with `f(input)`.
    Compute(Arc<dyn Fn(&Value) -> Value + Send + Sync>),
    /// Make the given external calls one at a time, then complete with
    /// `finish(collected results)`.
    CallChain {
        /// `(service, method, args)` triples issued in order.
        calls: Vec<(String, String, Vec<Value>)>,
        /// Builds the final result from the collected call results.
        finish: Arc<dyn Fn(&[Value]) -> Value + Send + Sync>,
    },
}

/// Continuation state used by the scripted executor: which task is running,
/// the call results collected so far, and the index of the next call.
pub fn chain_state(task: &str, results: &[Value], next: usize) -> Value {
    json!({ "task": task, "results": results, "next": next })
}

/// Encode the scripted executor's continuation for a slice awaiting a call.
pub fn chain_continuation(task: &str, results: &[Value], next: usize) -> Vec<u8> {
    codec::encode(&ContinuationEnvelope::new(chain_state(task, results, next)))
        .expect("continuation state is always encodable")
}

/// Stand-in for the sandboxed interpreter: executes scripted task slices
/// (which may suspend) and routes every other service through the registry.
pub struct ScriptedExecutor {
    tasks: HashMap<String, TaskScript>,
    services: RegistryExecutor,
    /// Number of `run` invocations, for duplicate-trigger assertions.
    pub invocations: AtomicUsize,
}

impl ScriptedExecutor {
    /// Executor with the default scripted tasks and services.
    pub fn new() -> Self {
        let mut registry = ServiceRegistry::new();
        registry.register("utils", Arc::new(EchoAdapter));
        registry.register("broken", Arc::new(FailingAdapter("E_BOOM")));

        let mut tasks: HashMap<String, TaskScript> = HashMap::new();

        // Zero external calls: completes in a single slice.
        tasks.insert(
            "double".to_string(),
            TaskScript::Compute(Arc::new(|input| {
                let x = input.get("x").and_then(Value::as_i64).unwrap_or(0);
                json!({ "doubled": x * 2 })
            })),
        );

        // One echo call, result passed through.
        tasks.insert(
            "echo-relay".to_string(),
            TaskScript::CallChain {
                calls: vec![(
                    "utils".to_string(),
                    "echo".to_string(),
                    vec![json!({"echoed": true})],
                )],
                finish: Arc::new(|results| results[0].clone()),
            },
        );

        // One call that always fails.
        tasks.insert(
            "call-broken".to_string(),
            TaskScript::CallChain {
                calls: vec![("broken".to_string(), "explode".to_string(), vec![])],
                finish: Arc::new(|results| results[0].clone()),
            },
        );

        // Two sequential calls: the suspend/resume loop repeats per call.
        tasks.insert(
            "echo-twice".to_string(),
            TaskScript::CallChain {
                calls: vec![
                    ("utils".to_string(), "echo".to_string(), vec![json!("first")]),
                    ("utils".to_string(), "echo".to_string(), vec![json!("second")]),
                ],
                finish: Arc::new(|results| json!({ "calls": results })),
            },
        );

        Self {
            tasks,
            services: RegistryExecutor::new(registry),
            invocations: AtomicUsize::new(0),
        }
    }

    /// Register an extra scripted task.
    pub fn with_task(mut self, task_id: &str, script: TaskScript) -> Self {
        self.tasks.insert(task_id.to_string(), script);
        self
    }

    fn run_task_slice(&self, run: &relay_core::store::StackRunRecord) -> Outcome {
        let Some(script) = self.tasks.get(&run.method_name) else {
            return Outcome::Failed {
                error: format!("UNKNOWN_TASK: no task '{}' published", run.method_name),
            };
        };

        if run.is_resumed() {
            return self.resume_task_slice(run, script);
        }

        let input = run.args.0.first().cloned().unwrap_or(Value::Null);
        match script {
            TaskScript::Compute(f) => Outcome::Completed { result: f(&input) },
            TaskScript::CallChain { calls, .. } => {
                let (service, method, args) = calls[0].clone();
                Outcome::Suspended {
                    service,
                    method,
                    args,
                    continuation: chain_continuation(&run.method_name, &[], 1),
                }
            }
        }
    }

    fn resume_task_slice(
        &self,
        run: &relay_core::store::StackRunRecord,
        script: &TaskScript,
    ) -> Outcome {
        let TaskScript::CallChain { calls, finish } = script else {
            return Outcome::Failed {
                error: "PROTOCOL: zero-call task resumed with a continuation".to_string(),
            };
        };

        let blob = run.continuation.as_deref().expect("resumed run has a blob");
        let payload = &run.resume_payload.as_ref().expect("resumed run has a payload").0;

        // Inject through the real codec path, exactly as an interpreter
        // adapter would.
        let envelope = match codec::inject_result(blob, payload).and_then(|b| codec::decode(&b)) {
            Ok(envelope) => envelope,
            Err(e) => {
                return Outcome::Failed {
                    error: format!("CONTINUATION_CORRUPT: {}", e),
                };
            }
        };

        let injected = envelope.injected.expect("payload was just injected");
        if let Some(error) = injected.get("error").and_then(Value::as_str) {
            return Outcome::Failed {
                error: error.to_string(),
            };
        }
        let call_result = injected.get("result").cloned().unwrap_or(Value::Null);

        let mut results: Vec<Value> = envelope
            .state
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        results.push(call_result);
        let next = envelope
            .state
            .get("next")
            .and_then(Value::as_u64)
            .unwrap_or(calls.len() as u64) as usize;

        if next < calls.len() {
            let (service, method, args) = calls[next].clone();
            Outcome::Suspended {
                service,
                method,
                args,
                continuation: chain_continuation(&run.method_name, &results, next + 1),
            }
        } else {
            Outcome::Completed {
                result: finish(&results),
            }
        }
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn run(
        &self,
        run: &relay_core::store::StackRunRecord,
    ) -> Result<Outcome, EngineError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if run.service_name == TASKS_SERVICE {
            Ok(self.run_task_slice(run))
        } else {
            self.services.run(run).await
        }
    }
}

/// Test context over a temp-file SQLite store and an embedded runtime.
pub struct TestContext {
    _dir: TempDir,
    /// The run store, shared with the runtime.
    pub store: Arc<SqliteRunStore>,
    /// The scripted executor, for invocation counting.
    pub executor: Arc<ScriptedExecutor>,
    /// The embedded engine runtime.
    pub runtime: EngineRuntime,
}

impl TestContext {
    /// Context with the default scripted executor.
    pub async fn new() -> Self {
        Self::with_executor(ScriptedExecutor::new()).await
    }

    /// Context with a custom scripted executor.
    pub async fn with_executor(executor: ScriptedExecutor) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = Arc::new(
            SqliteRunStore::from_path(dir.path().join("relay-test.db"))
                .await
                .expect("Failed to open test store"),
        );
        let executor = Arc::new(executor);

        let runtime = EngineRuntimeBuilder::new()
            .store(store.clone())
            .executor(executor.clone())
            .build()
            .expect("Failed to build runtime")
            .start()
            .await
            .expect("Failed to start runtime");

        Self {
            _dir: dir,
            store,
            executor,
            runtime,
        }
    }

    /// Submit a task through the API handlers and return the task run id.
    pub async fn submit(&self, task_id: &str, input: Value) -> String {
        let response = relay_core::api::handle_submit(
            self.runtime.api(),
            relay_core::api::SubmitRequest {
                task_id: task_id.to_string(),
                input,
            },
        )
        .await
        .expect("Submission failed");
        response.task_run_id
    }

    /// Poll until the task run reaches a terminal status (5s budget).
    pub async fn wait_for_terminal(&self, task_run_id: &str) -> TaskRunRecord {
        for _ in 0..500 {
            let run = self
                .store
                .get_task_run(task_run_id)
                .await
                .expect("Status read failed")
                .expect("Task run must exist");
            if run.run_status().is_some_and(|s| s.is_terminal()) {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Task run '{}' did not reach a terminal status", task_run_id);
    }

    /// Poll until the given stack run reaches a terminal status (5s budget).
    pub async fn wait_for_stack_terminal(
        &self,
        stack_run_id: &str,
    ) -> relay_core::store::StackRunRecord {
        for _ in 0..500 {
            let run = self
                .store
                .get_stack_run(stack_run_id)
                .await
                .expect("Stack run read failed")
                .expect("Stack run must exist");
            if run.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Stack run '{}' did not reach a terminal status", stack_run_id);
    }
}
