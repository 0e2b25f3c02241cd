// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run store interfaces and backends for relay-core.
//!
//! This module defines the persistence abstraction over task runs and stack
//! runs, plus the backend implementations. All cross-run coordination goes
//! through the atomic operations defined here; no two steps of the same
//! logical task are guaranteed to execute in the same process.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresRunStore;
pub use self::sqlite::SqliteRunStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;

use crate::error::EngineError;

/// Status of a task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRunStatus {
    /// Created by the task API, root slice not yet claimed.
    Queued,
    /// The root causal chain is making progress.
    Processing,
    /// The root slice is frozen waiting for an external call to resolve.
    Suspended,
    /// Terminal: the root chain produced a result.
    Completed,
    /// Terminal: the root chain produced an error.
    Failed,
}

impl TaskRunStatus {
    /// Status string as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "suspended" => Some(Self::Suspended),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether this status is terminal and immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a stack run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackRunStatus {
    /// Ready to be claimed by a processor step.
    Pending,
    /// Claimed; exactly one processor step owns this run.
    Processing,
    /// Frozen with a continuation, waiting for its child to resolve.
    SuspendedWaitingChild,
    /// Terminal: slice produced a result.
    Completed,
    /// Terminal: slice produced an error.
    Failed,
}

impl StackRunStatus {
    /// Status string as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::SuspendedWaitingChild => "suspended_waiting_child",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "suspended_waiting_child" => Some(Self::SuspendedWaitingChild),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether this status is terminal and immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for StackRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task run record from the run store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRunRecord {
    /// Unique identifier for the task run.
    pub id: String,
    /// Identifier of the task definition this run executes.
    pub task_id: String,
    /// Input value the task was submitted with.
    pub input: Json<Value>,
    /// Current status (queued, processing, suspended, completed, failed).
    pub status: String,
    /// Terminal result value.
    pub result: Option<Json<Value>>,
    /// Terminal error message.
    pub error: Option<String>,
    /// Stack run the task is currently waiting on.
    pub waiting_on_stack_run_id: Option<String>,
    /// When the task run was created.
    pub created_at: DateTime<Utc>,
    /// When the task run was last touched.
    pub updated_at: DateTime<Utc>,
    /// When the root chain last suspended.
    pub suspended_at: Option<DateTime<Utc>>,
    /// When the root chain last resumed.
    pub resumed_at: Option<DateTime<Utc>>,
    /// When the task run reached a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
}

impl TaskRunRecord {
    /// Parsed status, `None` for unknown strings.
    pub fn run_status(&self) -> Option<TaskRunStatus> {
        TaskRunStatus::parse(&self.status)
    }
}

/// Stack run record from the run store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StackRunRecord {
    /// Unique identifier for the stack run.
    pub id: String,
    /// Parent stack run, `None` for the root slice of a task run.
    pub parent_stack_run_id: Option<String>,
    /// Owning task run (always set, also on nested calls).
    pub parent_task_run_id: String,
    /// Service being called ("tasks" for root slices).
    pub service_name: String,
    /// Method being called (the task id for root slices).
    pub method_name: String,
    /// Argument list for the call.
    pub args: Json<Vec<Value>>,
    /// Current status (pending, processing, suspended_waiting_child, completed, failed).
    pub status: String,
    /// Result value of a completed run.
    pub result: Option<Json<Value>>,
    /// Error message of a failed run.
    pub error: Option<String>,
    /// Opaque continuation blob of a suspended run. Stored and replayed
    /// verbatim; never inspected by the engine.
    pub continuation: Option<Vec<u8>>,
    /// Structured payload to inject on resume (child result or error).
    pub resume_payload: Option<Json<Value>>,
    /// Child stack run this run is waiting on.
    pub waiting_on_stack_run_id: Option<String>,
    /// Reconciler re-trigger count.
    pub attempts: i32,
    /// When the stack run was created.
    pub created_at: DateTime<Utc>,
    /// When the stack run was last touched.
    pub updated_at: DateTime<Utc>,
}

impl StackRunRecord {
    /// Parsed status, `None` for unknown strings.
    pub fn run_status(&self) -> Option<StackRunStatus> {
        StackRunStatus::parse(&self.status)
    }

    /// Whether this is the root slice of its task run.
    pub fn is_root(&self) -> bool {
        self.parent_stack_run_id.is_none()
    }

    /// Whether this run reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.run_status().is_some_and(|s| s.is_terminal())
    }

    /// Whether this run carries resume state (continuation plus payload).
    pub fn is_resumed(&self) -> bool {
        self.continuation.is_some() && self.resume_payload.is_some()
    }
}

/// Descriptor of the external call a suspending slice wants to make.
#[derive(Debug, Clone)]
pub struct ChildCall {
    /// Service to call.
    pub service_name: String,
    /// Method on the service.
    pub method_name: String,
    /// Argument list.
    pub args: Vec<Value>,
}

/// Result of an atomic claim attempt.
#[derive(Debug)]
pub enum Claim {
    /// This caller won the claim; the record is now `processing`.
    Claimed(StackRunRecord),
    /// Another caller holds the run, or it is not in a claimable state.
    AlreadyClaimed,
    /// No stack run with this id exists.
    NotFound,
}

/// Run store interface used by the processor, API, and reconciler.
///
/// All mutations are idempotent under retry: re-applying a terminal
/// transition to an already-terminal row is a no-op, never an error that
/// aborts the caller. Protocol violations (suspending a run that already
/// waits, resuming a run that never suspended) are rejected with typed
/// errors at this boundary.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a task run plus its root stack run in one transaction.
    ///
    /// The root slice is stored uniformly as a call:
    /// `("tasks", task_id, [input])`.
    async fn create_submission(
        &self,
        task_id: &str,
        input: &Value,
    ) -> Result<(TaskRunRecord, StackRunRecord), EngineError>;

    /// Look up a task run.
    async fn get_task_run(&self, task_run_id: &str) -> Result<Option<TaskRunRecord>, EngineError>;

    /// Look up a stack run.
    async fn get_stack_run(
        &self,
        stack_run_id: &str,
    ) -> Result<Option<StackRunRecord>, EngineError>;

    /// Root stack run of a task run.
    async fn get_root_stack_run(
        &self,
        task_run_id: &str,
    ) -> Result<Option<StackRunRecord>, EngineError>;

    /// Atomically claim a pending stack run for processing.
    ///
    /// Only succeeds if the status is `pending`; the transition to
    /// `processing` is a compare-and-set, so concurrent claims resolve to
    /// exactly one winner.
    async fn claim(&self, stack_run_id: &str) -> Result<Claim, EngineError>;

    /// Mark a stack run completed with a result. No-op on terminal rows.
    async fn complete(&self, stack_run_id: &str, result: &Value) -> Result<(), EngineError>;

    /// Mark a stack run failed with an error. No-op on terminal rows.
    async fn fail(&self, stack_run_id: &str, error: &str) -> Result<(), EngineError>;

    /// Suspend a processing run on a new child call.
    ///
    /// One transaction: insert the child `pending`, transition the parent to
    /// `suspended_waiting_child` with the continuation stored and
    /// `waiting_on_stack_run_id` pointing at the child. A crash can never
    /// leave a suspended parent without its child existing, or vice versa.
    /// Fails with [`EngineError::InvalidRunState`] if the parent is not
    /// `processing` or already waits on a child.
    async fn suspend(
        &self,
        parent_id: &str,
        call: &ChildCall,
        continuation: &[u8],
    ) -> Result<StackRunRecord, EngineError>;

    /// Revive a suspended parent: status back to `pending`, resume payload
    /// stored, waiting pointer cleared, continuation intact.
    ///
    /// A duplicate resume (parent no longer waiting) is a no-op.
    async fn resume(&self, parent_id: &str, resume_payload: &Value) -> Result<(), EngineError>;

    /// Reverse lookup: the stack run waiting on the given run, if any.
    async fn find_waiter(
        &self,
        stack_run_id: &str,
    ) -> Result<Option<StackRunRecord>, EngineError>;

    /// Transition a task run into `processing` when its root slice is
    /// claimed. Stamps `resumed_at` when leaving `suspended`.
    async fn mark_task_run_processing(&self, task_run_id: &str) -> Result<(), EngineError>;

    /// Transition a task run into `suspended`, recording the stack run the
    /// root chain now waits on.
    async fn mark_task_run_suspended(
        &self,
        task_run_id: &str,
        waiting_on: &str,
    ) -> Result<(), EngineError>;

    /// Write the terminal outcome of a task run. No-op on terminal rows.
    async fn finish_task_run(
        &self,
        task_run_id: &str,
        result: Option<&Value>,
        error: Option<&str>,
    ) -> Result<(), EngineError>;

    /// Stack runs in `processing` or `suspended_waiting_child` whose
    /// `updated_at` is older than the threshold, oldest first.
    async fn list_stale_stack_runs(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<StackRunRecord>, EngineError>;

    /// Task runs still `queued` past the threshold (lost submission trigger).
    async fn list_stale_queued_task_runs(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TaskRunRecord>, EngineError>;

    /// Bump and return the re-trigger attempt count for a stack run.
    async fn record_trigger_attempt(&self, stack_run_id: &str) -> Result<i32, EngineError>;

    /// Re-queue a stuck run: `processing` back to `pending`. Returns whether
    /// the compare-and-set applied.
    async fn reset_for_retry(&self, stack_run_id: &str) -> Result<bool, EngineError>;

    /// Number of non-terminal children of a stack run.
    async fn count_live_children(&self, parent_stack_run_id: &str) -> Result<i64, EngineError>;

    /// All stack runs of a task run, oldest first. Partial progress stays
    /// inspectable here even after the task run ends.
    async fn list_stack_runs_for_task(
        &self,
        task_run_id: &str,
    ) -> Result<Vec<StackRunRecord>, EngineError>;

    /// Cheap connectivity probe for health endpoints.
    async fn health_check(&self) -> Result<bool, EngineError>;
}

/// Service name under which root slices are stored.
pub const TASKS_SERVICE: &str = "tasks";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            StackRunStatus::Pending,
            StackRunStatus::Processing,
            StackRunStatus::SuspendedWaitingChild,
            StackRunStatus::Completed,
            StackRunStatus::Failed,
        ] {
            assert_eq!(StackRunStatus::parse(status.as_str()), Some(status));
        }
        for status in [
            TaskRunStatus::Queued,
            TaskRunStatus::Processing,
            TaskRunStatus::Suspended,
            TaskRunStatus::Completed,
            TaskRunStatus::Failed,
        ] {
            assert_eq!(TaskRunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(StackRunStatus::parse("bogus"), None);
        assert_eq!(TaskRunStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(StackRunStatus::Completed.is_terminal());
        assert!(StackRunStatus::Failed.is_terminal());
        assert!(!StackRunStatus::Pending.is_terminal());
        assert!(!StackRunStatus::Processing.is_terminal());
        assert!(!StackRunStatus::SuspendedWaitingChild.is_terminal());
    }
}
