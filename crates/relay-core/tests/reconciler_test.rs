// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciler recovery paths: stalled processing steps, lost triggers at
//! every link of the chain, and the retry budget.
//!
//! Each test wires a reconciler with a zero liveness threshold over the
//! embedded runtime and drives sweeps by hand via `run_once`.

mod common;

use std::time::Duration;

use common::*;
use relay_core::reconciler::{Reconciler, ReconcilerConfig};
use relay_core::store::{ChildCall, Claim, RunStore, StackRunStatus, TaskRunStatus};
use serde_json::{Value, json};

fn reconciler_for(ctx: &TestContext, max_trigger_attempts: i32) -> Reconciler {
    Reconciler::new(
        ctx.store.clone(),
        ctx.runtime.trigger().clone(),
        ctx.runtime.processor().clone(),
        ReconcilerConfig {
            stale_after: Duration::ZERO,
            max_trigger_attempts,
            ..ReconcilerConfig::default()
        },
    )
}

/// Claim a run or panic; simulates a processing step that then crashes.
async fn claim_or_panic(ctx: &TestContext, stack_run_id: &str) {
    let Claim::Claimed(_) = ctx.store.claim(stack_run_id).await.unwrap() else {
        panic!("Run '{}' must be claimable", stack_run_id);
    };
}

#[tokio::test]
async fn test_stalled_processing_run_is_rescued() {
    let ctx = TestContext::new().await;
    let reconciler = reconciler_for(&ctx, 5);

    // Submission whose trigger never fired, claimed by a step that died.
    let (task_run, root) = ctx.store.create_submission("double", &json!({"x": 3})).await.unwrap();
    claim_or_panic(&ctx, &root.id).await;

    reconciler.run_once().await.unwrap();

    // After the rescue, completion looks exactly as if nothing had stalled.
    let task_run = ctx.wait_for_terminal(&task_run.id).await;
    assert_eq!(task_run.run_status(), Some(TaskRunStatus::Completed));
    assert_eq!(task_run.result.as_ref().map(|j| &j.0), Some(&json!({"doubled": 6})));

    let root = ctx.store.get_stack_run(&root.id).await.unwrap().unwrap();
    assert_eq!(root.run_status(), Some(StackRunStatus::Completed));
    assert_eq!(root.attempts, 1);
}

#[tokio::test]
async fn test_retry_budget_exhaustion_fails_with_timeout() {
    let ctx = TestContext::new().await;
    let reconciler = reconciler_for(&ctx, 0);

    let (task_run, root) = ctx.store.create_submission("double", &json!({"x": 3})).await.unwrap();
    claim_or_panic(&ctx, &root.id).await;

    reconciler.run_once().await.unwrap();

    let task_run = ctx.wait_for_terminal(&task_run.id).await;
    assert_eq!(task_run.run_status(), Some(TaskRunStatus::Failed));
    assert!(task_run.error.as_deref().unwrap().contains("LIVENESS_TIMEOUT"));

    let root = ctx.store.get_stack_run(&root.id).await.unwrap().unwrap();
    assert_eq!(root.run_status(), Some(StackRunStatus::Failed));
}

#[tokio::test]
async fn test_lost_submission_trigger_is_refired() {
    let ctx = TestContext::new().await;
    let reconciler = reconciler_for(&ctx, 5);

    // Created directly on the store: the first trigger never existed.
    let (task_run, root) = ctx.store.create_submission("double", &json!({"x": 5})).await.unwrap();
    assert_eq!(root.run_status(), Some(StackRunStatus::Pending));

    reconciler.run_once().await.unwrap();

    let task_run = ctx.wait_for_terminal(&task_run.id).await;
    assert_eq!(task_run.run_status(), Some(TaskRunStatus::Completed));
    assert_eq!(task_run.result.as_ref().map(|j| &j.0), Some(&json!({"doubled": 10})));
}

#[tokio::test]
async fn test_lost_child_trigger_is_refired() {
    let ctx = TestContext::new().await;
    let reconciler = reconciler_for(&ctx, 5);

    // Root suspended on an echo call whose trigger was lost.
    let (task_run, root) = ctx.store.create_submission("echo-relay", &Value::Null).await.unwrap();
    claim_or_panic(&ctx, &root.id).await;
    let child = ctx
        .store
        .suspend(
            &root.id,
            &ChildCall {
                service_name: "utils".to_string(),
                method_name: "echo".to_string(),
                args: vec![json!({"echoed": true})],
            },
            &chain_continuation("echo-relay", &[], 1),
        )
        .await
        .unwrap();
    assert_eq!(child.run_status(), Some(StackRunStatus::Pending));

    reconciler.run_once().await.unwrap();

    // The re-fired child resolves and revives the parent through the normal
    // resume path.
    let task_run = ctx.wait_for_terminal(&task_run.id).await;
    assert_eq!(task_run.run_status(), Some(TaskRunStatus::Completed));
    assert_eq!(task_run.result.as_ref().map(|j| &j.0), Some(&json!({"echoed": true})));
}

#[tokio::test]
async fn test_lost_completion_is_redelivered_to_the_waiter() {
    let ctx = TestContext::new().await;
    let reconciler = reconciler_for(&ctx, 5);

    let (task_run, root) = ctx.store.create_submission("echo-relay", &Value::Null).await.unwrap();
    claim_or_panic(&ctx, &root.id).await;
    let child = ctx
        .store
        .suspend(
            &root.id,
            &ChildCall {
                service_name: "utils".to_string(),
                method_name: "echo".to_string(),
                args: vec![json!("lost-value")],
            },
            &chain_continuation("echo-relay", &[], 1),
        )
        .await
        .unwrap();

    // The child ran to completion but its completion trigger never revived
    // the parent.
    claim_or_panic(&ctx, &child.id).await;
    ctx.store.complete(&child.id, &json!("lost-value")).await.unwrap();

    reconciler.run_once().await.unwrap();

    let task_run = ctx.wait_for_terminal(&task_run.id).await;
    assert_eq!(task_run.run_status(), Some(TaskRunStatus::Completed));
    assert_eq!(task_run.result.as_ref().map(|j| &j.0), Some(&json!("lost-value")));
}

#[tokio::test]
async fn test_child_that_never_starts_exhausts_budget_and_propagates() {
    let ctx = TestContext::new().await;
    let reconciler = reconciler_for(&ctx, 0);

    let (task_run, root) = ctx.store.create_submission("echo-relay", &Value::Null).await.unwrap();
    claim_or_panic(&ctx, &root.id).await;
    let child = ctx
        .store
        .suspend(
            &root.id,
            &ChildCall {
                service_name: "utils".to_string(),
                method_name: "echo".to_string(),
                args: vec![json!("x")],
            },
            &chain_continuation("echo-relay", &[], 1),
        )
        .await
        .unwrap();

    reconciler.run_once().await.unwrap();

    // The child's timeout failure flows up through the ordinary resume path:
    // child failed -> parent revived with the error -> task failed.
    let task_run = ctx.wait_for_terminal(&task_run.id).await;
    assert_eq!(task_run.run_status(), Some(TaskRunStatus::Failed));
    assert!(task_run.error.as_deref().unwrap().contains("LIVENESS_TIMEOUT"));

    let child = ctx.store.get_stack_run(&child.id).await.unwrap().unwrap();
    assert_eq!(child.run_status(), Some(StackRunStatus::Failed));
}
