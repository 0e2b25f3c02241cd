// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Continuation codec.
//!
//! Serializes the resumable execution context attached to a suspended stack
//! run. The engine stores the blob verbatim and never inspects it; only the
//! executor boundary (and tests) go through this module. Correctness depends
//! on byte-for-byte round-trip fidelity, not on the envelope's internal shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors from continuation encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The blob is not a valid continuation envelope.
    #[error("continuation blob failed to decode: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// The resumable execution context of one suspended slice.
///
/// `state` is whatever the executor needs to continue from the suspension
/// point (serialized interpreter state, pending call-site identity);
/// `injected` carries the resolved child outcome once the slice is revived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationEnvelope {
    /// Executor-defined resume state.
    pub state: Value,
    /// Child outcome injected on resume, absent until then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injected: Option<Value>,
}

impl ContinuationEnvelope {
    /// Envelope for a fresh suspension (no injected result yet).
    pub fn new(state: Value) -> Self {
        Self {
            state,
            injected: None,
        }
    }
}

/// Encode an envelope into an opaque blob.
pub fn encode(envelope: &ContinuationEnvelope) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Decode a blob back into an envelope.
pub fn decode(blob: &[u8]) -> Result<ContinuationEnvelope, CodecError> {
    Ok(serde_json::from_slice(blob)?)
}

/// Inject a resume payload into an encoded continuation, yielding the blob
/// the revived slice continues from.
pub fn inject_result(blob: &[u8], resume_payload: &Value) -> Result<Vec<u8>, CodecError> {
    let mut envelope = decode(blob)?;
    envelope.injected = Some(resume_payload.clone());
    encode(&envelope)
}
