// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP server for the task API and the internal trigger endpoint.
//!
//! Routes:
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /tasks/execute` | Submit a task, returns `{taskRunId}` immediately |
//! | `GET /tasks/status/{task_run_id}` | Status/result/error, pure read |
//! | `GET /tasks/runs/{task_run_id}/stack` | Stack run listing (partial progress) |
//! | `POST /internal/runs/{stack_run_id}/process` | Fire-and-forget trigger delivery |
//! | `GET /health` | Run store connectivity probe |
//!
//! The trigger endpoint acknowledges with 202 before the processing step
//! runs; duplicate deliveries are idempotent at the claim.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;
use tracing::{info, warn};

use crate::api::{self, SubmitRequest, TaskApiState};
use crate::error::EngineError;
use crate::processor::StackProcessor;

/// Shared state for the HTTP server.
pub struct AppState {
    /// Task API handlers state.
    pub api: TaskApiState,
    /// Processor invoked by the internal trigger endpoint.
    pub processor: Arc<StackProcessor>,
}

impl AppState {
    /// Create the server state.
    pub fn new(api: TaskApiState, processor: Arc<StackProcessor>) -> Self {
        Self { api, processor }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::TaskRunNotFound { .. } | EngineError::RunNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            EngineError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            EngineError::InvalidRunState { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = axum::Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

/// Build the router over the given state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tasks/execute", post(execute_task))
        .route("/tasks/status/{task_run_id}", get(task_status))
        .route("/tasks/runs/{task_run_id}/stack", get(task_stack))
        .route("/internal/runs/{stack_run_id}/process", post(process_run))
        .route("/health", get(health))
        .with_state(state)
}

async fn execute_task(
    State(state): State<Arc<AppState>>,
    axum::Json(request): axum::Json<SubmitRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let response = api::handle_submit(&state.api, request).await?;
    Ok((StatusCode::ACCEPTED, axum::Json(response)))
}

async fn task_status(
    State(state): State<Arc<AppState>>,
    Path(task_run_id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let response = api::handle_status(&state.api, &task_run_id).await?;
    Ok(axum::Json(response))
}

async fn task_stack(
    State(state): State<Arc<AppState>>,
    Path(task_run_id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let response = api::handle_list_stack_runs(&state.api, &task_run_id).await?;
    Ok(axum::Json(response))
}

async fn process_run(
    State(state): State<Arc<AppState>>,
    Path(stack_run_id): Path<String>,
) -> StatusCode {
    // Acknowledge first, process after: the sender never waits on the step.
    let processor = state.processor.clone();
    tokio::spawn(async move {
        if let Err(e) = processor.process(&stack_run_id).await {
            warn!(%stack_run_id, error = %e, "Triggered processing step failed");
        }
    });
    StatusCode::ACCEPTED
}

async fn health(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, EngineError> {
    state.api.store.health_check().await?;
    Ok(axum::Json(json!({"status": "ok"})))
}

/// Bind and serve until the process is shut down.
pub async fn run_server(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
