// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stack processor - the driver loop.
//!
//! One invocation of [`StackProcessor::process`] is one processing step:
//! claim a pending stack run, execute one slice through the executor
//! adapter, apply the suspension or completion protocol, and fire at most
//! one downstream trigger. Every step is stateless and short-lived; it reads
//! everything it needs from the run store and exits. That is what gives
//! tasks unbounded total duration despite each step running under a short
//! execution budget.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::error::EngineError;
use crate::executor::{Executor, Outcome};
use crate::store::{ChildCall, Claim, RunStore, StackRunRecord};
use crate::trigger::Trigger;

/// Drives stack runs through claim, execution, and chaining.
pub struct StackProcessor {
    store: Arc<dyn RunStore>,
    executor: Arc<dyn Executor>,
    trigger: Arc<dyn Trigger>,
}

impl StackProcessor {
    /// Create a processor over the given store, executor, and trigger.
    pub fn new(
        store: Arc<dyn RunStore>,
        executor: Arc<dyn Executor>,
        trigger: Arc<dyn Trigger>,
    ) -> Self {
        Self {
            store,
            executor,
            trigger,
        }
    }

    /// Run one processing step for a stack run.
    ///
    /// Duplicate triggers are idempotent no-ops: the atomic claim admits
    /// exactly one processor per run per generation. A trigger referencing a
    /// nonexistent run is a protocol violation and returns an error.
    #[instrument(skip(self), fields(stack_run_id = %stack_run_id))]
    pub async fn process(&self, stack_run_id: &str) -> Result<(), EngineError> {
        // 1. Claim. Losing the claim means another step owns this run.
        let run = match self.store.claim(stack_run_id).await? {
            Claim::Claimed(run) => run,
            Claim::AlreadyClaimed => {
                debug!("Duplicate trigger; run already claimed or settled");
                return Ok(());
            }
            Claim::NotFound => {
                warn!("Trigger referenced a nonexistent stack run");
                return Err(EngineError::RunNotFound {
                    run_id: stack_run_id.to_string(),
                });
            }
        };

        // 2. A root slice entering execution drives the task run status
        //    (queued -> processing on the first slice, suspended ->
        //    processing with resumed_at on later ones).
        if run.is_root() {
            self.store
                .mark_task_run_processing(&run.parent_task_run_id)
                .await?;
        }

        debug!(
            service = %run.service_name,
            method = %run.method_name,
            resumed = run.is_resumed(),
            "Executing slice"
        );

        // 3. Execute one slice. Executor errors (a continuation that fails
        //    to decode included) become Failed outcomes attributable to this
        //    run, never a processor crash.
        let outcome = match self.executor.run(&run).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Executor error; converting to failed outcome");
                Outcome::Failed {
                    error: format!("{}: {}", e.error_code(), e),
                }
            }
        };

        // 4. Apply the outcome.
        match outcome {
            Outcome::Completed { result } => {
                self.store.complete(&run.id, &result).await?;
                self.settle(&run, Some(&result), None).await
            }
            Outcome::Failed { error } => {
                self.store.fail(&run.id, &error).await?;
                self.settle(&run, None, Some(&error)).await
            }
            Outcome::Suspended {
                service,
                method,
                args,
                continuation,
            } => {
                self.handle_suspension(&run, service, method, args, continuation)
                    .await
            }
        }
    }

    /// Suspension protocol: one atomic store transition, then a trigger for
    /// the new child. The parent is inert until its child resolves.
    ///
    /// If the suspend transaction fails nothing is triggered and the run
    /// stays `processing`; the reconciler will retry the slice later.
    async fn handle_suspension(
        &self,
        run: &StackRunRecord,
        service: String,
        method: String,
        args: Vec<Value>,
        continuation: Vec<u8>,
    ) -> Result<(), EngineError> {
        let call = ChildCall {
            service_name: service,
            method_name: method,
            args,
        };
        let child = self.store.suspend(&run.id, &call, &continuation).await?;

        info!(
            child_id = %child.id,
            service = %child.service_name,
            method = %child.method_name,
            "Slice suspended on external call"
        );

        if run.is_root() {
            self.store
                .mark_task_run_suspended(&run.parent_task_run_id, &child.id)
                .await?;
        }

        self.trigger.fire(&child.id).await?;
        Ok(())
    }

    /// Completion logic: revive the waiting parent with this run's outcome,
    /// or, for the root, write the terminal outcome onto the task run.
    ///
    /// Errors flow through the same resume path as results; an error is just
    /// another terminal outcome.
    async fn settle(
        &self,
        run: &StackRunRecord,
        result: Option<&Value>,
        error: Option<&str>,
    ) -> Result<(), EngineError> {
        match self.store.find_waiter(&run.id).await? {
            Some(parent) => {
                let payload = match (result, error) {
                    (_, Some(e)) => json!({ "error": e }),
                    (Some(v), None) => json!({ "result": v }),
                    (None, None) => json!({ "result": null }),
                };
                self.store.resume(&parent.id, &payload).await?;
                debug!(parent_id = %parent.id, "Waiter revived with outcome");
                self.trigger.fire(&parent.id).await?;
            }
            None if run.is_root() => {
                self.store
                    .finish_task_run(&run.parent_task_run_id, result, error)
                    .await?;
                info!(
                    task_run_id = %run.parent_task_run_id,
                    failed = error.is_some(),
                    "Task run reached terminal status"
                );
            }
            None => {
                // The waiter was already failed (e.g. by the reconciler past
                // its retry budget) and its pointer cleared.
                warn!("No waiter for non-root stack run; outcome dropped");
            }
        }
        Ok(())
    }

    /// Fail a run and push the failure up the chain.
    ///
    /// Reconciler entry point for runs past their retry budget; follows the
    /// exact completion path a failed slice would.
    pub async fn fail_and_propagate(
        &self,
        stack_run_id: &str,
        error: &str,
    ) -> Result<(), EngineError> {
        let run = self
            .store
            .get_stack_run(stack_run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound {
                run_id: stack_run_id.to_string(),
            })?;

        self.store.fail(stack_run_id, error).await?;
        self.settle(&run, None, Some(error)).await
    }

    /// Re-deliver a terminal outcome whose completion trigger was lost.
    ///
    /// Reconciler entry point: the child already holds its result/error, the
    /// parent is still suspended on it.
    pub async fn redeliver_outcome(&self, child: &StackRunRecord) -> Result<(), EngineError> {
        let result = child.result.as_ref().map(|j| &j.0);
        self.settle(child, result, child.error.as_deref()).await
    }
}
