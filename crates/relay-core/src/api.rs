// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task API handlers.
//!
//! The external-facing submission/status surface. Submission creates the
//! task run and its root stack run in one transaction and fires the first
//! trigger; it returns immediately without waiting for completion. Status is
//! a pure read from the run store and never triggers processing.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use crate::error::EngineError;
use crate::store::{RunStore, StackRunRecord};
use crate::trigger::Trigger;

/// Shared state for task API handlers.
pub struct TaskApiState {
    /// Run store.
    pub store: Arc<dyn RunStore>,
    /// Trigger transport used to kick off root slices.
    pub trigger: Arc<dyn Trigger>,
}

impl TaskApiState {
    /// Create a new task API state.
    pub fn new(store: Arc<dyn RunStore>, trigger: Arc<dyn Trigger>) -> Self {
        Self { store, trigger }
    }
}

/// Submission request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// Task definition to execute.
    pub task_id: String,
    /// Input value handed to the task.
    #[serde(default)]
    pub input: Value,
}

/// Submission response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    /// Identifier of the created task run.
    pub task_run_id: String,
}

/// Status response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Task run identifier.
    pub task_run_id: String,
    /// Current status string.
    pub status: String,
    /// Terminal result, when completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Terminal error, when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stack run the task currently waits on, when suspended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_on_stack_run_id: Option<String>,
}

/// One stack run in the partial-progress listing.
///
/// Which external calls completed before a failure stays inspectable here
/// even after the task run is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackRunSummary {
    /// Stack run identifier.
    pub id: String,
    /// Parent stack run, absent for the root slice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_stack_run_id: Option<String>,
    /// Service being called.
    pub service_name: String,
    /// Method being called.
    pub method_name: String,
    /// Argument list.
    pub args: Vec<Value>,
    /// Current status string.
    pub status: String,
    /// Result of a completed run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error of a failed run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Child this run waits on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_on_stack_run_id: Option<String>,
    /// Base64 of the persisted continuation blob, when suspended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// When the run was last touched.
    pub updated_at: DateTime<Utc>,
}

impl From<StackRunRecord> for StackRunSummary {
    fn from(record: StackRunRecord) -> Self {
        Self {
            id: record.id,
            parent_stack_run_id: record.parent_stack_run_id,
            service_name: record.service_name,
            method_name: record.method_name,
            args: record.args.0,
            status: record.status,
            result: record.result.map(|j| j.0),
            error: record.error,
            waiting_on_stack_run_id: record.waiting_on_stack_run_id,
            continuation: record.continuation.map(|blob| BASE64.encode(blob)),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Handle a task submission.
///
/// Creates the task run plus root stack run atomically, then fires the first
/// trigger. Returns the task run id; progress is observed via
/// [`handle_status`].
#[instrument(skip(state, request), fields(task_id = %request.task_id))]
pub async fn handle_submit(
    state: &TaskApiState,
    request: SubmitRequest,
) -> Result<SubmitResponse, EngineError> {
    if request.task_id.is_empty() {
        return Err(EngineError::ValidationError {
            field: "taskId".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    let (task_run, root) = state
        .store
        .create_submission(&request.task_id, &request.input)
        .await?;

    info!(
        task_run_id = %task_run.id,
        root_stack_run_id = %root.id,
        "Task submitted"
    );

    state.trigger.fire(&root.id).await?;

    Ok(SubmitResponse {
        task_run_id: task_run.id,
    })
}

/// Handle a status query. Pure read; never triggers processing.
#[instrument(skip(state), fields(task_run_id = %task_run_id))]
pub async fn handle_status(
    state: &TaskApiState,
    task_run_id: &str,
) -> Result<StatusResponse, EngineError> {
    let run = state
        .store
        .get_task_run(task_run_id)
        .await?
        .ok_or_else(|| EngineError::TaskRunNotFound {
            task_run_id: task_run_id.to_string(),
        })?;

    Ok(StatusResponse {
        task_run_id: run.id,
        status: run.status,
        result: run.result.map(|j| j.0),
        error: run.error,
        waiting_on_stack_run_id: run.waiting_on_stack_run_id,
    })
}

/// List the stack runs of a task run, oldest first.
#[instrument(skip(state), fields(task_run_id = %task_run_id))]
pub async fn handle_list_stack_runs(
    state: &TaskApiState,
    task_run_id: &str,
) -> Result<Vec<StackRunSummary>, EngineError> {
    if state.store.get_task_run(task_run_id).await?.is_none() {
        return Err(EngineError::TaskRunNotFound {
            task_run_id: task_run_id.to_string(),
        });
    }

    let runs = state.store.list_stack_runs_for_task(task_run_id).await?;
    Ok(runs.into_iter().map(StackRunSummary::from).collect())
}
