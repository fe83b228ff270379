//! Recovery utilities for store errors

use super::types::{RecoveryHint, StoreError};

impl StoreError {
    /// Get the recovery hint for this error
    #[must_use]
    pub const fn recovery_hint(&self) -> &RecoveryHint {
        match self {
            Self::BackendUnavailable { recovery_hint, .. }
            | Self::OperationFailed { recovery_hint, .. }
            | Self::StorageExhausted { recovery_hint, .. }
            | Self::CorruptionDetected { recovery_hint, .. }
            | Self::UnrepairableCorruption { recovery_hint, .. }
            | Self::Validation { recovery_hint, .. }
            | Self::NotFound { recovery_hint, .. }
            | Self::Closed { recovery_hint }
            | Self::Io { recovery_hint, .. }
            | Self::Serialization { recovery_hint, .. }
            | Self::Configuration { recovery_hint, .. } => recovery_hint,
        }
    }

    /// Check if this error is transient and can be retried
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self.recovery_hint(),
            RecoveryHint::Retry { .. } | RecoveryHint::Reconnect
        )
    }

    /// Check if this error indicates data corruption
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptionDetected { .. } | Self::UnrepairableCorruption { .. }
        )
    }

    /// Fatal errors must always reach the caller
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. }
                | Self::StorageExhausted { .. }
                | Self::UnrepairableCorruption { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendFailure;

    #[test]
    fn busy_failures_are_transient() {
        let err = StoreError::operation_failed("get", None, BackendFailure::Busy("x".into()));
        assert!(err.is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    fn exhaustion_is_fatal() {
        let err = StoreError::StorageExhausted {
            store: quotevault_core::StoreName::Quotes,
            reason: "full".into(),
            recovery_hint: RecoveryHint::RunCleanup,
        };
        assert!(err.is_fatal());
        assert!(!err.is_corruption());
    }
}
