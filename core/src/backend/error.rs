//! Error types for backend facade operations.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors raised by a [`Backend`](super::Backend) or
/// [`Authenticator`](super::Authenticator) implementation.
///
/// Transport-level failures are normalised into this taxonomy at the
/// adapter boundary; callers never see raw HTTP client errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The requested record does not exist (or is hidden by access rules).
    #[error("Record not found in '{collection}': {id}")]
    NotFound {
        /// Collection that was queried
        collection: String,
        /// Identifier that was requested
        id: String,
    },

    /// No valid credentials were presented.
    #[error("Authentication required")]
    Unauthorized,

    /// Credentials were presented but the store refused the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The request did not complete within the configured bound.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Network or connection failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The store answered with an unexpected status.
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the store
        message: String,
    },

    /// The response could not be decoded.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The backend does not implement the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl BackendError {
    /// Shorthand for a [`BackendError::NotFound`].
    #[must_use]
    pub fn not_found(collection: &str, id: &str) -> Self {
        Self::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    /// Returns `true` if retrying the same request may succeed.
    ///
    /// # Examples
    ///
    /// ```
    /// # use guestpass_core::BackendError;
    /// # use std::time::Duration;
    /// assert!(BackendError::Timeout(Duration::from_secs(15)).is_connectivity());
    /// assert!(!BackendError::not_found("attendees", "a1").is_connectivity());
    /// ```
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }

    /// Returns `true` if the error means the record is absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
