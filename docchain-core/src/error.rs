//! Error types and result types for document store operations.
//!
//! This module provides the error taxonomy shared by every terminal operation.
//! Use [`DocumentStoreResult<T>`] as the return type for fallible operations.

use bson::error::Error as BsonError;
use std::error::Error as StdError;
use thiserror::Error;

/// Boxed error raised by an underlying driver.
pub type BackendError = Box<dyn StdError + Send + Sync + 'static>;

/// Represents all possible errors that can occur when interacting with a document store.
///
/// Driver failures are carried unmodified in [`DocumentStoreError::Backend`] and can be
/// downcast back to the driver's own error type.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A named configuration entry is missing or could not be read.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A delete was attempted without a filter. Nothing was deleted.
    #[error("Refusing to delete every document in collection {0}: no filter set")]
    UnfilteredDelete(String),
    /// A document could not be decoded into the caller's target type.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// A single-document query matched nothing in the given collection.
    #[error("No document matched the filter in collection {0}")]
    NotFound(String),
    /// The operation did not complete before its deadline.
    #[error("Operation {0} timed out")]
    Timeout(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The document has an invalid structure for the requested operation.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// The backend does not interpret the given operator or stage.
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// An error reported by the underlying storage driver.
    #[error("Backend error: {0}")]
    Backend(#[source] BackendError),
}

impl DocumentStoreError {
    /// Wraps a driver error without altering it.
    pub fn backend<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        DocumentStoreError::Backend(Box::new(err))
    }

    /// Returns the driver error if this is a [`DocumentStoreError::Backend`] of type `E`.
    pub fn backend_source<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            DocumentStoreError::Backend(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for DocumentStoreError {
    fn from(err: toml::de::Error) -> Self {
        DocumentStoreError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct DuplicateKey;

    impl fmt::Display for DuplicateKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "E11000 duplicate key")
        }
    }

    impl StdError for DuplicateKey {}

    #[test]
    fn backend_errors_are_passed_through_unmodified() {
        let err = DocumentStoreError::backend(DuplicateKey);

        assert!(err.backend_source::<DuplicateKey>().is_some());
        assert_eq!(err.to_string(), "Backend error: E11000 duplicate key");
    }

    #[test]
    fn non_backend_errors_have_no_driver_source() {
        let err = DocumentStoreError::UnfilteredDelete("users".into());

        assert!(err.backend_source::<DuplicateKey>().is_none());
    }
}
