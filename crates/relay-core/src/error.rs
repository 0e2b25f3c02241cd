// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for relay-core.
//!
//! Provides a unified error type that maps to stable error codes surfaced
//! through the status API.

use std::fmt;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors that can occur while driving runs forward.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    /// Stack run was not found in the database.
    RunNotFound {
        /// The stack run ID that was not found.
        run_id: String,
    },

    /// Task run was not found in the database.
    TaskRunNotFound {
        /// The task run ID that was not found.
        task_run_id: String,
    },

    /// Run is in an invalid state for the requested transition.
    ///
    /// This is the protocol-violation error: e.g. suspending a run that
    /// already waits on a child, or resuming a run that never suspended.
    InvalidRunState {
        /// The run ID.
        run_id: String,
        /// The expected status.
        expected: String,
        /// The actual status.
        actual: String,
    },

    /// Continuation blob failed to decode.
    ContinuationCorrupt {
        /// The stack run whose continuation is unreadable.
        run_id: String,
        /// The decode failure.
        reason: String,
    },

    /// A downstream trigger could not be delivered.
    TriggerFailed {
        /// The stack run the trigger was for.
        run_id: String,
        /// The reason for failure.
        reason: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl EngineError {
    /// Get the stable error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RunNotFound { .. } => "RUN_NOT_FOUND",
            Self::TaskRunNotFound { .. } => "TASK_RUN_NOT_FOUND",
            Self::InvalidRunState { .. } => "INVALID_RUN_STATE",
            Self::ContinuationCorrupt { .. } => "CONTINUATION_CORRUPT",
            Self::TriggerFailed { .. } => "TRIGGER_FAILED",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunNotFound { run_id } => {
                write!(f, "Stack run '{}' not found", run_id)
            }
            Self::TaskRunNotFound { task_run_id } => {
                write!(f, "Task run '{}' not found", task_run_id)
            }
            Self::InvalidRunState {
                run_id,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Run '{}' is in invalid state: expected '{}', got '{}'",
                    run_id, expected, actual
                )
            }
            Self::ContinuationCorrupt { run_id, reason } => {
                write!(
                    f,
                    "Continuation for stack run '{}' failed to decode: {}",
                    run_id, reason
                )
            }
            Self::TriggerFailed { run_id, reason } => {
                write!(f, "Failed to deliver trigger for run '{}': {}", run_id, reason)
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_codes() {
        let test_cases = vec![
            (
                EngineError::RunNotFound {
                    run_id: "sr-1".to_string(),
                },
                "RUN_NOT_FOUND",
            ),
            (
                EngineError::TaskRunNotFound {
                    task_run_id: "tr-1".to_string(),
                },
                "TASK_RUN_NOT_FOUND",
            ),
            (
                EngineError::InvalidRunState {
                    run_id: "sr-1".to_string(),
                    expected: "processing".to_string(),
                    actual: "pending".to_string(),
                },
                "INVALID_RUN_STATE",
            ),
            (
                EngineError::ContinuationCorrupt {
                    run_id: "sr-1".to_string(),
                    reason: "truncated".to_string(),
                },
                "CONTINUATION_CORRUPT",
            ),
            (
                EngineError::TriggerFailed {
                    run_id: "sr-1".to_string(),
                    reason: "connection refused".to_string(),
                },
                "TRIGGER_FAILED",
            ),
            (
                EngineError::ValidationError {
                    field: "task_id".to_string(),
                    message: "must not be empty".to_string(),
                },
                "VALIDATION_ERROR",
            ),
            (
                EngineError::DatabaseError {
                    operation: "insert".to_string(),
                    details: "connection refused".to_string(),
                },
                "DATABASE_ERROR",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(
                error.error_code(),
                expected_code,
                "Error {:?} should have code {}",
                error,
                expected_code
            );
            assert!(!error.to_string().is_empty(), "Message should not be empty");
        }
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::RunNotFound {
            run_id: "abc-123".to_string(),
        };
        assert_eq!(err.to_string(), "Stack run 'abc-123' not found");

        let err = EngineError::InvalidRunState {
            run_id: "abc-123".to_string(),
            expected: "pending".to_string(),
            actual: "completed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Run 'abc-123' is in invalid state: expected 'pending', got 'completed'"
        );

        let err = EngineError::ValidationError {
            field: "task_id".to_string(),
            message: "must not be empty".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Validation error for 'task_id': must not be empty"
        );
    }

    #[test]
    fn test_from_sqlx_error() {
        let err: EngineError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }
}
