//! Display implementations for store errors

use super::types::StoreError;
use std::fmt;

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BackendUnavailable { reason, .. } => {
                write!(f, "No storage backend available: {reason}")
            }
            Self::OperationFailed {
                operation,
                store: Some(store),
                failure,
                ..
            } => write!(f, "Operation '{operation}' on store '{store}' failed: {failure}"),
            Self::OperationFailed {
                operation,
                store: None,
                failure,
                ..
            } => write!(f, "Operation '{operation}' failed: {failure}"),
            Self::StorageExhausted { store, reason, .. } => write!(
                f,
                "Storage exhausted while writing to '{store}': {reason}"
            ),
            Self::CorruptionDetected {
                location, detail, ..
            } => write!(f, "Corruption detected in {location}: {detail}"),
            Self::UnrepairableCorruption { issues, .. } => write!(
                f,
                "Unrepairable corruption ({} unresolved issue(s)): {}",
                issues.len(),
                issues.join("; ")
            ),
            Self::Validation { field, reason, .. } => {
                write!(f, "Invalid {field}: {reason}")
            }
            Self::NotFound { what, .. } => write!(f, "Not found: {what}"),
            Self::Closed { .. } => write!(f, "Storage manager is closed"),
            Self::Io {
                path,
                operation,
                source,
                ..
            } => write!(
                f,
                "I/O error during {} on '{}': {}",
                operation,
                path.display(),
                source
            ),
            Self::Serialization {
                context,
                operation,
                source,
                ..
            } => write!(f, "Failed to {operation:?} {context}: {source}"),
            Self::Configuration { message, .. } => write!(f, "Configuration error: {message}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::OperationFailed { failure, .. } => Some(failure),
            Self::Io { source, .. } => Some(source),
            Self::Serialization { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::BackendFailure;
    use crate::errors::StoreError;
    use quotevault_core::StoreName;
    use std::error::Error;

    #[test]
    fn operation_failed_keeps_cause_chain() {
        let err = StoreError::operation_failed(
            "save",
            Some(StoreName::Quotes),
            BackendFailure::Other("disk on fire".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "Operation 'save' on store 'quotes' failed: disk on fire"
        );
        assert_eq!(err.source().unwrap().to_string(), "disk on fire");
    }

    #[test]
    fn unrepairable_lists_issues() {
        let err = StoreError::UnrepairableCorruption {
            issues: vec!["a".to_string(), "b".to_string()],
            recovery_hint: super::super::RecoveryHint::RestoreBackup,
        };
        assert!(err.to_string().contains("2 unresolved"));
        assert!(err.to_string().ends_with("a; b"));
    }
}
