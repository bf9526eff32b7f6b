//! Error types for record store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing record tables.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Blob not found. Read paths turn this into an empty table.
    #[error("blob not found: {key}")]
    NotFound { key: String },

    /// Conditional write lost against a concurrent writer.
    #[error("conflicting write to {key}: table changed since it was read")]
    Conflict { key: String },

    /// Access denied to the storage backend.
    #[error("access denied: {message}")]
    AccessDenied { message: String },

    /// Invalid store specification (URL parsing failed).
    #[error("invalid store spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    /// Email cannot be used as a table key.
    #[error("invalid email '{email}': {reason}")]
    InvalidEmail { email: String, reason: String },

    /// Storage backend is not configured.
    #[error("store not configured: {message}")]
    NotConfigured { message: String },

    /// Network or I/O error.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Table could not be encoded or decoded as CSV.
    #[error("CSV error in {key}: {source}")]
    Csv {
        key: String,
        #[source]
        source: csv::Error,
    },

    /// A cell held a value that does not fit the record shape.
    #[error("invalid record: {message}")]
    InvalidRecord { message: String },

    /// Generic error from the underlying object store.
    #[error("object store error: {0}")]
    ObjectStore(object_store::Error),
}

impl StoreError {
    /// Returns true if this error indicates the blob was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if a conditional write was rejected.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true if this is an access/permission error.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }

    /// Create from object_store error with context about the blob key.
    pub fn from_object_store(err: object_store::Error, key: &str) -> Self {
        match &err {
            object_store::Error::NotFound { .. } => StoreError::NotFound {
                key: key.to_string(),
            },
            object_store::Error::AlreadyExists { .. }
            | object_store::Error::Precondition { .. } => StoreError::Conflict {
                key: key.to_string(),
            },
            object_store::Error::PermissionDenied { .. }
            | object_store::Error::Unauthenticated { .. } => StoreError::AccessDenied {
                message: err.to_string(),
            },
            _ => StoreError::ObjectStore(err),
        }
    }

    pub(crate) fn csv(key: impl Into<String>, source: csv::Error) -> Self {
        StoreError::Csv {
            key: key.into(),
            source,
        }
    }
}

impl From<object_store::Error> for StoreError {
    fn from(err: object_store::Error) -> Self {
        StoreError::from_object_store(err, "unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_mapping() {
        let err = object_store::Error::NotFound {
            path: "answers/a@x.com_answers.csv".to_string(),
            source: "missing".into(),
        };
        let mapped = StoreError::from_object_store(err, "answers/a@x.com_answers.csv");
        assert!(mapped.is_not_found());
        assert_eq!(
            mapped.to_string(),
            "blob not found: answers/a@x.com_answers.csv"
        );
    }

    #[test]
    fn test_precondition_is_conflict() {
        let err = object_store::Error::Precondition {
            path: "k".to_string(),
            source: "etag mismatch".into(),
        };
        assert!(StoreError::from_object_store(err, "k").is_conflict());
    }

    #[test]
    fn test_generic_passthrough() {
        let err = object_store::Error::Generic {
            store: "S3",
            source: "boom".into(),
        };
        let mapped = StoreError::from(err);
        assert!(matches!(mapped, StoreError::ObjectStore(_)));
        assert!(!mapped.is_not_found());
    }
}
