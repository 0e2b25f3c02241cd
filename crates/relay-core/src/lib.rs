// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Relay Core - Suspend/Resume Orchestration Engine
//!
//! This crate lets arbitrary task code make external calls without holding a
//! long-lived process for the duration of those calls. Each external call
//! pauses the calling unit of work, persists a continuation, and hands
//! control to a separate processing cycle; when the callee finishes, the
//! caller is revived with the callee's result and continues exactly where it
//! left off.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      External Clients                        │
//! └─────────────────────────────────────────────────────────────┘
//!                │ POST /tasks/execute          │ GET /tasks/status/{id}
//!                ▼                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Task API                             │
//! │         (create task run + root stack run, read status)      │
//! └─────────────────────────────────────────────────────────────┘
//!                │ trigger(root)
//!                ▼
//! ┌───────────────────────┐   run one slice    ┌─────────────────┐
//! │    Stack Processor    │───────────────────►│ Executor Adapter│
//! │  claim / apply / chain│◄───────────────────│  (interpreter / │
//! └───────────────────────┘  Completed/Failed/ │service adapters)│
//!        │          ▲          Suspended       └─────────────────┘
//!        │ trigger(child | parent)
//!        ▼          │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Run Store                             │
//! │     task_runs + stack_runs (SQLite / PostgreSQL, sqlx)       │
//! └─────────────────────────────────────────────────────────────┘
//!                   ▲
//!                   │ stale sweep
//! ┌───────────────────────┐
//! │       Reconciler      │
//! └───────────────────────┘
//! ```
//!
//! # Stack Run State Machine
//!
//! ```text
//!      ┌─────────┐   claim (CAS)   ┌────────────┐
//!      │ PENDING │────────────────►│ PROCESSING │
//!      └─────────┘                 └─────┬──────┘
//!           ▲                            │
//!           │ resume(child outcome)      │ external call
//!           │                            ▼
//!      ┌────┴──────────────────────────────────┐
//!      │       SUSPENDED_WAITING_CHILD          │
//!      └────────────────────────────────────────┘
//!                                        │
//!                 complete / fail        ▼
//!      ┌───────────┐              ┌──────────┐
//!      │ COMPLETED │              │  FAILED  │
//!      └───────────┘              └──────────┘
//! ```
//!
//! A slice performs at most one external call before suspending or
//! finishing, and a parent is `suspended_waiting_child` for exactly one
//! child at a time; together these give strict causal ordering within each
//! task run's chain. Progress across unrelated task runs is concurrent -
//! there is no global lock.
//!
//! No persistent worker owns a task: every processing step is a discrete,
//! freshly-triggered invocation that reads everything it needs from the run
//! store and exits after firing at most one downstream trigger. Lost
//! triggers and crashed steps are bounded by the [`reconciler`].
//!
//! # Modules
//!
//! - [`api`]: Task submission and status handlers
//! - [`codec`]: Continuation envelope encode/decode/inject
//! - [`config`]: Server configuration from environment variables
//! - [`error`]: Error types with stable error codes
//! - [`executor`]: Executor adapter boundary and service registry
//! - [`migrations`]: Embedded sqlx migrators for both backends
//! - [`processor`]: The claim/execute/chain driver loop
//! - [`reconciler`]: Stale-run sweep with retry budget
//! - [`runtime`]: Embeddable engine runtime
//! - [`store`]: Run store trait plus SQLite/PostgreSQL backends
//! - [`trigger`]: Trigger transports (in-process channel, HTTP)

#![deny(missing_docs)]

/// Task submission and status handlers.
pub mod api;

/// Continuation codec for suspended slices.
pub mod codec;

/// Server configuration loaded from environment variables.
pub mod config;

/// Error types for engine operations with stable error codes.
pub mod error;

/// Executor adapter boundary and the uniform service registry.
pub mod executor;

/// Embedded database migrations.
pub mod migrations;

/// Stack processor driving claim, execution, and chaining.
pub mod processor;

/// Reconciler sweep for stuck runs.
pub mod reconciler;

/// Embeddable engine runtime wiring.
pub mod runtime;

/// Run store interfaces and backends.
pub mod store;

/// Trigger transports for chaining.
pub mod trigger;

/// HTTP server for the task API and trigger endpoint.
#[cfg(feature = "server")]
pub mod server;
