//! Error conversion utilities

use super::types::{RecoveryHint, SerializationOp, StoreError};
use std::path::PathBuf;
use std::time::Duration;

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let recovery_hint = match error.kind() {
            ErrorKind::PermissionDenied => RecoveryHint::CheckPermissions {
                path: PathBuf::from("."),
            },
            ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
                RecoveryHint::Retry {
                    after: Duration::from_millis(100),
                }
            }
            _ => RecoveryHint::Manual {
                instructions: "Check disk space and the data directory".to_string(),
            },
        };

        Self::Io {
            path: PathBuf::from("."),
            operation: "unknown",
            source: error,
            recovery_hint,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        let operation = if error.is_data() || error.is_syntax() || error.is_eof() {
            SerializationOp::Decode
        } else {
            SerializationOp::Encode
        };
        Self::serialization("JSON payload", operation, error)
    }
}

impl From<bincode::Error> for StoreError {
    fn from(error: bincode::Error) -> Self {
        Self::serialization("binary frame", SerializationOp::Decode, error)
    }
}

impl From<quotevault_core::Error> for StoreError {
    fn from(error: quotevault_core::Error) -> Self {
        match error {
            quotevault_core::Error::Validation { field, message } => {
                StoreError::validation(field, message)
            }
            quotevault_core::Error::FileSystem {
                path,
                operation,
                source,
            } => StoreError::Io {
                recovery_hint: RecoveryHint::CheckPermissions { path: path.clone() },
                path,
                operation: if operation.contains("rename") {
                    "atomic rename"
                } else {
                    "file write"
                },
                source,
            },
            other => StoreError::configuration(other.to_string()),
        }
    }
}

/// Convert store errors to core errors
impl From<StoreError> for quotevault_core::Error {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Validation { field, reason, .. } => {
                quotevault_core::Error::validation(field, reason)
            }
            other => quotevault_core::Error::storage(other.to_string()),
        }
    }
}

impl From<crate::journal::JournalError> for StoreError {
    fn from(error: crate::journal::JournalError) -> Self {
        use crate::journal::JournalError;

        match error {
            JournalError::Io(source) => StoreError::Io {
                path: PathBuf::from("."),
                operation: "journal I/O",
                recovery_hint: RecoveryHint::Retry {
                    after: Duration::from_millis(100),
                },
                source,
            },
            JournalError::Encode(source) => {
                StoreError::serialization("journal frame", SerializationOp::Encode, source)
            }
            other => StoreError::CorruptionDetected {
                location: "journal".to_string(),
                detail: other.to_string(),
                recovery_hint: RecoveryHint::RestoreBackup,
            },
        }
    }
}
