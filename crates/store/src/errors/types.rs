//! Core error types for the storage engine

use crate::backend::BackendFailure;
use quotevault_core::StoreName;
use std::path::PathBuf;
use std::time::Duration;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures surfaced by the storage engine
#[derive(Debug)]
pub enum StoreError {
    /// No backend of any kind is usable
    BackendUnavailable {
        reason: String,
        recovery_hint: RecoveryHint,
    },

    /// A backend operation failed after every recovery tier was tried
    OperationFailed {
        operation: &'static str,
        store: Option<StoreName>,
        failure: BackendFailure,
        recovery_hint: RecoveryHint,
    },

    /// Both the primary backend and the fallback medium are full
    StorageExhausted {
        store: StoreName,
        reason: String,
        recovery_hint: RecoveryHint,
    },

    /// Stored data could not be read back
    CorruptionDetected {
        /// Store name or file that held the damaged data
        location: String,
        detail: String,
        recovery_hint: RecoveryHint,
    },

    /// Corruption was found that no repair strategy could fix
    UnrepairableCorruption {
        issues: Vec<String>,
        recovery_hint: RecoveryHint,
    },

    /// Caller input rejected before any persistence attempt
    Validation {
        field: String,
        reason: String,
        recovery_hint: RecoveryHint,
    },

    /// A record or backup does not exist
    NotFound {
        what: String,
        recovery_hint: RecoveryHint,
    },

    /// The manager is closing or closed and accepts no new work
    Closed { recovery_hint: RecoveryHint },

    /// I/O errors outside a backend (backup channel, fallback file)
    Io {
        path: PathBuf,
        operation: &'static str,
        source: std::io::Error,
        recovery_hint: RecoveryHint,
    },

    /// Serialization/deserialization errors
    Serialization {
        context: String,
        operation: SerializationOp,
        source: Box<dyn std::error::Error + Send + Sync>,
        recovery_hint: RecoveryHint,
    },

    /// Configuration errors
    Configuration {
        message: String,
        recovery_hint: RecoveryHint,
    },
}

/// Recovery hints for error handling
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryHint {
    /// Retry the operation after a delay
    Retry { after: Duration },

    /// Close and reopen the backend connection
    Reconnect,

    /// Run retention cleanup to free space
    RunCleanup,

    /// Write to the degraded fallback medium
    UseFallback,

    /// Restore from the most recent backup
    RestoreBackup,

    /// Run an integrity check and repair
    VerifyIntegrity,

    /// Fix the caller input
    FixInput,

    /// Check file permissions
    CheckPermissions { path: PathBuf },

    /// No automated recovery possible
    Manual { instructions: String },

    /// No recovery possible
    NoRecovery,
}

/// Serialization operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationOp {
    Encode,
    Decode,
}

impl StoreError {
    /// Create a validation error
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
            recovery_hint: RecoveryHint::FixInput,
        }
    }

    /// Create a not-found error
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound {
            what: what.into(),
            recovery_hint: RecoveryHint::NoRecovery,
        }
    }

    /// Create a backend-unavailable error
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            reason: reason.into(),
            recovery_hint: RecoveryHint::Reconnect,
        }
    }

    /// Wrap a backend failure that exhausted recovery
    #[must_use]
    pub fn operation_failed(
        operation: &'static str,
        store: Option<StoreName>,
        failure: BackendFailure,
    ) -> Self {
        let recovery_hint = if failure.classify().is_transient() {
            RecoveryHint::Retry {
                after: Duration::from_secs(1),
            }
        } else {
            RecoveryHint::VerifyIntegrity
        };
        Self::OperationFailed {
            operation,
            store,
            failure,
            recovery_hint,
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, operation: &'static str, source: std::io::Error) -> Self {
        let path = path.into();
        Self::Io {
            recovery_hint: RecoveryHint::CheckPermissions { path: path.clone() },
            path,
            operation,
            source,
        }
    }

    /// Create an encode/decode error
    #[must_use]
    pub fn serialization(
        context: impl Into<String>,
        operation: SerializationOp,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Serialization {
            context: context.into(),
            operation,
            source: source.into(),
            recovery_hint: RecoveryHint::VerifyIntegrity,
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            recovery_hint: RecoveryHint::Manual {
                instructions: "Check the quotevault config file and environment".to_string(),
            },
        }
    }
}
