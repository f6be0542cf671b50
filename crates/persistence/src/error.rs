//! Error types for the persistence layer.
//!
//! Errors are organised by category so callers can map them to responses
//! structurally instead of by message text: resource state (not found,
//! duplicates), malformed queries, transaction boundaries, cancellation and
//! opaque backend failures.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Resource state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Filter and query construction errors
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Transaction errors
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The request context was cancelled or its deadline passed.
    #[error("operation cancelled")]
    Cancelled,
}

/// Errors related to the state of stored documents.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The requested document does not exist or is outside the caller's scope.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// One or more unique fields collide with an existing document.
    #[error("duplicate {entity}: conflicting fields {}", fields.join(", "))]
    Duplicate {
        entity: &'static str,
        fields: Vec<String>,
    },
}

/// Errors raised while decoding or compiling a filter.
#[derive(Error, Debug)]
pub enum QueryError {
    /// A filter node is structurally invalid.
    #[error("invalid filter: {message}")]
    FilterInvalid { message: String },

    /// A property value could not be coerced for its operator.
    #[error("invalid filter property '{property}': {message}")]
    FilterPropertyInvalid { property: String, message: String },

    /// The encoded filter list could not be decoded.
    #[error("failed to decode filter: {message}")]
    FilterDecode { message: String },
}

/// Errors related to transactions.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// The backend refused to open a transaction.
    #[error("transaction start failed: {reason}")]
    StartFailed { reason: String },

    /// The transaction body succeeded but the commit did not.
    #[error("transaction commit failed: {reason}")]
    CommitFailed { reason: String },

    /// The transaction was used after completion.
    #[error("transaction no longer valid")]
    InvalidState,
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// Schema migration error.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// A backend failure annotated with the store operation that hit it.
    #[error("{action} {entity}: {source}")]
    Operation {
        entity: &'static str,
        action: &'static str,
        #[source]
        source: Box<BackendError>,
    },
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for filter compilation.
pub type QueryResult<T> = Result<T, QueryError>;

impl StorageError {
    /// Shorthand for a [`ResourceError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StorageError::Resource(ResourceError::NotFound {
            entity,
            id: id.into(),
        })
    }

    /// Shorthand for a [`ResourceError::Duplicate`].
    pub fn duplicate(entity: &'static str, fields: Vec<String>) -> Self {
        StorageError::Resource(ResourceError::Duplicate { entity, fields })
    }

    /// Returns `true` for not-found errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Resource(ResourceError::NotFound { .. }))
    }

    /// Returns `true` for uniqueness violations.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StorageError::Resource(ResourceError::Duplicate { .. }))
    }

    /// Returns the offending fields of a uniqueness violation.
    pub fn conflicting_fields(&self) -> Option<&[String]> {
        match self {
            StorageError::Resource(ResourceError::Duplicate { fields, .. }) => Some(fields),
            _ => None,
        }
    }

    /// Wraps backend failures with the entity and action that produced them.
    ///
    /// Every other category passes through untouched.
    pub fn in_operation(self, entity: &'static str, action: &'static str) -> Self {
        match self {
            StorageError::Backend(BackendError::Operation { .. }) => self,
            StorageError::Backend(source) => StorageError::Backend(BackendError::Operation {
                entity,
                action,
                source: Box::new(source),
            }),
            other => other,
        }
    }
}

/// Extension for annotating results with operation context.
pub trait OperationContext<T> {
    /// See [`StorageError::in_operation`].
    fn in_operation(self, entity: &'static str, action: &'static str) -> StorageResult<T>;
}

impl<T> OperationContext<T> for StorageResult<T> {
    fn in_operation(self, entity: &'static str, action: &'static str) -> StorageResult<T> {
        self.map_err(|e| e.in_operation(entity, action))
    }
}

pub(crate) fn serialization_error(message: impl Into<String>) -> StorageError {
    StorageError::Backend(BackendError::SerializationError {
        message: message.into(),
    })
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        serialization_error(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, _) = &err {
            if code.code == rusqlite::ErrorCode::OperationInterrupted {
                return StorageError::Cancelled;
            }
        }
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(_err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = StorageError::not_found("device", "abc");
        assert_eq!(err.to_string(), "device not found: abc");
        assert!(err.is_not_found());
        assert!(!err.is_duplicate());
    }

    #[test]
    fn test_duplicate_lists_fields() {
        let err = StorageError::duplicate("user", vec!["email".into(), "username".into()]);
        assert_eq!(
            err.to_string(),
            "duplicate user: conflicting fields email, username"
        );
        assert_eq!(
            err.conflicting_fields(),
            Some(&["email".to_string(), "username".to_string()][..])
        );
    }

    #[test]
    fn test_in_operation_wraps_backend_only() {
        let backend = StorageError::Backend(BackendError::SerializationError {
            message: "bad".into(),
        });
        let wrapped = backend.in_operation("tag", "create");
        assert!(matches!(
            wrapped,
            StorageError::Backend(BackendError::Operation {
                entity: "tag",
                action: "create",
                ..
            })
        ));
        assert_eq!(wrapped.to_string(), "create tag: serialization error: bad");

        let not_found = StorageError::not_found("tag", "x").in_operation("tag", "delete");
        assert!(not_found.is_not_found());
    }

    #[test]
    fn test_in_operation_does_not_double_wrap() {
        let err = StorageError::Backend(BackendError::MigrationError {
            message: "v2".into(),
        })
        .in_operation("device", "list")
        .in_operation("namespace", "delete");
        assert_eq!(err.to_string(), "list device: schema migration failed: v2");
    }

    #[test]
    fn test_query_error_display() {
        let err = QueryError::FilterPropertyInvalid {
            property: "online".into(),
            message: "not a boolean".into(),
        };
        assert!(err.to_string().contains("online"));
        let storage: StorageError = err.into();
        assert!(matches!(
            storage,
            StorageError::Query(QueryError::FilterPropertyInvalid { .. })
        ));
    }

    #[test]
    fn test_transaction_start_failed_is_distinct() {
        let err: StorageError = TransactionError::StartFailed {
            reason: "database is locked".into(),
        }
        .into();
        assert!(matches!(
            err,
            StorageError::Transaction(TransactionError::StartFailed { .. })
        ));
    }
}
