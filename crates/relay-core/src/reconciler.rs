// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciler for stuck runs.
//!
//! Periodic sweep, independent of the trigger chain, that detects runs stuck
//! past a liveness threshold and re-triggers or fails them. This bounds the
//! damage from a lost trigger or a crashed processing step. Re-triggering is
//! safe because claiming is idempotent; failing past the retry budget flows
//! through the normal completion path, so the timeout error propagates up
//! the chain like any other outcome.
//!
//! This is the only component allowed to change a run's status without an
//! executor invocation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::processor::StackProcessor;
use crate::store::{RunStore, StackRunRecord, StackRunStatus};
use crate::trigger::Trigger;

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often to sweep for stale runs.
    pub poll_interval: Duration,
    /// How long a run may go without an update before it counts as stale.
    pub stale_after: Duration,
    /// Maximum runs to reconcile per sweep.
    pub batch_size: i64,
    /// Re-trigger budget per stack run before it is failed with a timeout.
    pub max_trigger_attempts: i32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(30),
            batch_size: 25,
            max_trigger_attempts: 5,
        }
    }
}

/// Background sweep that rescues or fails stuck runs.
pub struct Reconciler {
    store: Arc<dyn RunStore>,
    trigger: Arc<dyn Trigger>,
    processor: Arc<StackProcessor>,
    config: ReconcilerConfig,
    shutdown: Arc<Notify>,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        store: Arc<dyn RunStore>,
        trigger: Arc<dyn Trigger>,
        processor: Arc<StackProcessor>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            trigger,
            processor,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the reconciler loop.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            batch_size = self.config.batch_size,
            "Reconciler started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Reconciler shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Reconciliation sweep failed");
                    }
                }
            }
        }
    }

    /// One reconciliation sweep. Exposed for embedding and tests.
    pub async fn run_once(&self) -> Result<(), EngineError> {
        let threshold = Utc::now()
            - chrono::Duration::from_std(self.config.stale_after).unwrap_or_else(|_| {
                chrono::Duration::seconds(30)
            });

        // Lost submission triggers: task runs still queued with a pending
        // root slice.
        let queued = self
            .store
            .list_stale_queued_task_runs(threshold, self.config.batch_size)
            .await?;
        for task_run in queued {
            if let Some(root) = self.store.get_root_stack_run(&task_run.id).await?
                && root.run_status() == Some(StackRunStatus::Pending)
            {
                info!(task_run_id = %task_run.id, root_id = %root.id, "Re-firing lost submission trigger");
                if let Err(e) = self.trigger.fire(&root.id).await {
                    error!(task_run_id = %task_run.id, error = %e, "Failed to re-fire submission trigger");
                }
            }
        }

        let stale = self
            .store
            .list_stale_stack_runs(threshold, self.config.batch_size)
            .await?;

        if stale.is_empty() {
            debug!("No stale stack runs");
            return Ok(());
        }

        info!(count = stale.len(), "Reconciling stale stack runs");

        for run in stale {
            if let Err(e) = self.reconcile_run(&run).await {
                error!(
                    stack_run_id = %run.id,
                    error = %e,
                    "Failed to reconcile stack run"
                );
                // Continue reconciling the other runs.
            }
        }

        Ok(())
    }

    /// Reconcile a single stale run.
    async fn reconcile_run(&self, run: &StackRunRecord) -> Result<(), EngineError> {
        match run.run_status() {
            // A crashed or stalled processing step: re-queue and re-fire
            // within budget, fail past it.
            Some(StackRunStatus::Processing) => {
                let attempts = self.store.record_trigger_attempt(&run.id).await?;
                if attempts > self.config.max_trigger_attempts {
                    warn!(
                        stack_run_id = %run.id,
                        attempts,
                        "Retry budget exhausted; failing run"
                    );
                    self.processor
                        .fail_and_propagate(
                            &run.id,
                            &format!(
                                "LIVENESS_TIMEOUT: stack run stalled in processing after {} attempts",
                                attempts
                            ),
                        )
                        .await?;
                } else if self.store.reset_for_retry(&run.id).await? {
                    info!(stack_run_id = %run.id, attempts, "Re-queued stalled run");
                    self.trigger.fire(&run.id).await?;
                }
            }

            // A suspended parent going stale means some link below it broke:
            // the child trigger was lost, or the child finished but its
            // completion trigger never revived us.
            Some(StackRunStatus::SuspendedWaitingChild) => {
                let Some(child_id) = run.waiting_on_stack_run_id.as_deref() else {
                    return self
                        .processor
                        .fail_and_propagate(
                            &run.id,
                            "LIVENESS_TIMEOUT: suspended without a waiting pointer",
                        )
                        .await;
                };

                match self.store.get_stack_run(child_id).await? {
                    Some(child) if child.is_terminal() => {
                        info!(
                            stack_run_id = %run.id,
                            child_id = %child.id,
                            "Re-delivering lost completion to waiter"
                        );
                        self.processor.redeliver_outcome(&child).await?;
                    }
                    Some(child) if child.run_status() == Some(StackRunStatus::Pending) => {
                        let attempts = self.store.record_trigger_attempt(&run.id).await?;
                        if attempts > self.config.max_trigger_attempts {
                            self.processor
                                .fail_and_propagate(
                                    &child.id,
                                    &format!(
                                        "LIVENESS_TIMEOUT: child never started after {} trigger attempts",
                                        attempts
                                    ),
                                )
                                .await?;
                        } else {
                            info!(stack_run_id = %run.id, child_id = %child.id, "Re-firing lost child trigger");
                            self.trigger.fire(&child.id).await?;
                        }
                    }
                    Some(_) => {
                        // Child is in flight; its own staleness governs.
                        debug!(stack_run_id = %run.id, child_id = %child_id, "Child still in flight");
                    }
                    None => {
                        self.processor
                            .fail_and_propagate(
                                &run.id,
                                "LIVENESS_TIMEOUT: waiting on a nonexistent child",
                            )
                            .await?;
                    }
                }
            }

            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.stale_after, Duration::from_secs(30));
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.max_trigger_attempts, 5);
    }
}
