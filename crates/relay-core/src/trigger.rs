// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trigger transport for chaining.
//!
//! The graph advances by firing an explicit trigger for the next run to
//! process, never by polling a timer. The protocol only requires
//! asynchronous, at-least-once delivery of a run id; the transport behind
//! that is pluggable: an in-process channel for embedded/test use, HTTP for
//! the distributed deployment. Lost deliveries are bounded by the
//! reconciler.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::EngineError;

/// Fire-and-forget delivery of a stack run id to a processor.
///
/// `fire` must return quickly: implementations enqueue or spawn, they do not
/// wait for the run to be processed. Errors mean the trigger could not even
/// be enqueued; delivery failures past that point are logged and left to the
/// reconciler.
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Request processing of the given stack run.
    async fn fire(&self, stack_run_id: &str) -> Result<(), EngineError>;
}

/// In-process trigger backed by an unbounded channel.
///
/// The receiving half is drained by the runtime's processing worker; see
/// [`crate::runtime`].
#[derive(Clone)]
pub struct LocalTrigger {
    tx: mpsc::UnboundedSender<String>,
}

impl LocalTrigger {
    /// Create a trigger plus the receiver its worker drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Trigger for LocalTrigger {
    async fn fire(&self, stack_run_id: &str) -> Result<(), EngineError> {
        self.tx
            .send(stack_run_id.to_string())
            .map_err(|e| EngineError::TriggerFailed {
                run_id: stack_run_id.to_string(),
                reason: format!("local trigger channel closed: {}", e),
            })
    }
}

/// HTTP trigger: fire-and-forget POST to the processor endpoint.
#[cfg(feature = "server")]
pub use self::http::HttpTrigger;

#[cfg(feature = "server")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use tracing::{debug, warn};

    use crate::error::EngineError;

    use super::Trigger;

    /// Trigger that POSTs the run id to a processor endpoint.
    ///
    /// Delivery is retried with bounded backoff; after the last attempt the
    /// failure is logged and the reconciler becomes the safety net.
    #[derive(Clone)]
    pub struct HttpTrigger {
        client: reqwest::Client,
        base_url: String,
        max_attempts: u32,
    }

    impl HttpTrigger {
        /// Create a trigger posting to `{base_url}/internal/runs/{id}/process`.
        pub fn new(base_url: impl Into<String>) -> Self {
            Self {
                client: reqwest::Client::new(),
                base_url: base_url.into().trim_end_matches('/').to_string(),
                max_attempts: 3,
            }
        }

        /// Override the delivery attempt budget.
        pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
            self.max_attempts = max_attempts.max(1);
            self
        }

        /// Processor endpoint for a stack run.
        pub fn endpoint_url(&self, stack_run_id: &str) -> String {
            format!("{}/internal/runs/{}/process", self.base_url, stack_run_id)
        }
    }

    #[async_trait]
    impl Trigger for HttpTrigger {
        async fn fire(&self, stack_run_id: &str) -> Result<(), EngineError> {
            let client = self.client.clone();
            let url = self.endpoint_url(stack_run_id);
            let run_id = stack_run_id.to_string();
            let max_attempts = self.max_attempts;

            tokio::spawn(async move {
                let mut backoff = Duration::from_millis(100);
                for attempt in 1..=max_attempts {
                    match client.post(&url).send().await {
                        Ok(resp) if resp.status().is_success() => {
                            debug!(%run_id, attempt, "Trigger delivered");
                            return;
                        }
                        Ok(resp) => {
                            warn!(%run_id, attempt, status = %resp.status(), "Trigger rejected");
                        }
                        Err(e) => {
                            warn!(%run_id, attempt, error = %e, "Trigger delivery failed");
                        }
                    }
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
                warn!(%run_id, "Trigger undelivered after {} attempts; reconciler will pick the run up", max_attempts);
            });

            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_endpoint_url() {
            let trigger = HttpTrigger::new("http://127.0.0.1:8080/");
            assert_eq!(
                trigger.endpoint_url("sr-1"),
                "http://127.0.0.1:8080/internal/runs/sr-1/process"
            );
        }

        #[test]
        fn test_max_attempts_floor() {
            let trigger = HttpTrigger::new("http://localhost").with_max_attempts(0);
            assert_eq!(trigger.max_attempts, 1);
        }
    }
}
