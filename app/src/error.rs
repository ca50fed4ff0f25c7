//! Service-level error taxonomy.

use guestpass_core::backend::BackendError;
use guestpass_core::model::RecordError;
use guestpass_core::qr::MalformedPayload;
use guestpass_core::validation::ValidationErrors;
use thiserror::Error;

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors returned by the organizer and guard services.
///
/// Backend failures are converted at each call site; presentation code
/// never sees a raw transport error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// No valid session; the caller should send the user to the login screen.
    #[error("Not signed in")]
    Unauthenticated,

    /// The account is not allowed to use this app or operation.
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// A form failed client-side validation.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// No party matches the entered join code.
    #[error("Invalid code: {0}")]
    InvalidJoinCode(String),

    /// Scanned text is not a usable QR payload.
    #[error("Unrecognized QR code: {0}")]
    InvalidQr(#[from] MalformedPayload),

    /// The QR payload is valid but of the wrong kind for this screen.
    #[error("Expected a {expected} QR code, got {found}")]
    WrongQrType {
        /// Kind this operation accepts
        expected: &'static str,
        /// Kind that was scanned
        found: &'static str,
    },

    /// The addressed record does not exist.
    #[error("{collection} record '{id}' not found")]
    NotFound {
        /// Collection
        collection: String,
        /// Record id
        id: String,
    },

    /// Timeout or network failure; retrying may help.
    #[error("Connection problem: {0}")]
    Connectivity(BackendError),

    /// Every generated code collided with an existing one.
    #[error("Could not allocate a unique code after {attempts} attempts")]
    CodeSpaceExhausted {
        /// Attempts made
        attempts: usize,
    },

    /// A store record could not be interpreted.
    #[error("Malformed record: {0}")]
    Record(#[from] RecordError),

    /// Any other backend failure.
    #[error(transparent)]
    Backend(BackendError),
}

impl ServiceError {
    /// Returns `true` if repeating the operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

impl From<BackendError> for ServiceError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::NotFound { collection, id } => Self::NotFound { collection, id },
            BackendError::Unauthorized => Self::Unauthenticated,
            BackendError::Forbidden(message) => Self::Forbidden(message),
            error if error.is_connectivity() => Self::Connectivity(error),
            error => Self::Backend(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn backend_errors_are_classified() {
        assert_eq!(
            ServiceError::from(BackendError::Unauthorized),
            ServiceError::Unauthenticated
        );
        assert!(ServiceError::from(BackendError::Timeout(Duration::from_secs(15))).is_retryable());
        assert!(matches!(
            ServiceError::from(BackendError::not_found("parties", "e1")),
            ServiceError::NotFound { .. }
        ));
        assert!(matches!(
            ServiceError::from(BackendError::Malformed("bad json".to_string())),
            ServiceError::Backend(_)
        ));
    }
}
