//! Guest registration.

use crate::codes::CodeAllocator;
use crate::error::Result;
use guestpass_core::backend::{Backend, collections};
use guestpass_core::model::{Attendee, AttendeeId, NewAttendee, PartyId};
use guestpass_core::qr::{self, QrPayload};
use guestpass_core::validation::{AttendeeForm, Validate};
use std::sync::Arc;

/// Invitation operations for the organizer app.
#[derive(Clone)]
pub struct AttendeeService {
    backend: Arc<dyn Backend>,
    codes: CodeAllocator,
}

impl std::fmt::Debug for AttendeeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttendeeService")
            .field("codes", &self.codes)
            .finish_non_exhaustive()
    }
}

impl AttendeeService {
    /// Service with the default code allocator.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            codes: CodeAllocator::default(),
        }
    }

    /// Use `codes` for invitation-code allocation.
    #[must_use]
    pub fn with_codes(mut self, codes: CodeAllocator) -> Self {
        self.codes = codes;
        self
    }

    /// Register a guest for a party.
    ///
    /// The invitation starts unscanned and gets a code unique within the
    /// party.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Validation`](crate::ServiceError::Validation)
    ///   before any request if the form is invalid
    /// - [`ServiceError::NotFound`](crate::ServiceError::NotFound) if the
    ///   party does not exist
    /// - [`ServiceError::CodeSpaceExhausted`](crate::ServiceError::CodeSpaceExhausted)
    ///   if no free code was found
    pub async fn register_attendee(&self, party: &PartyId, form: &AttendeeForm) -> Result<Attendee> {
        form.validate()?;
        self.backend
            .get_one(collections::PARTIES, party.as_str())
            .await?;

        let code = self.codes.attendee_code(self.backend.as_ref(), party).await?;
        let fields = NewAttendee {
            name: form.name.trim().to_string(),
            phone: form.phone.trim().to_string(),
            party_id: party.clone(),
            code,
        }
        .to_fields();

        let record = self.backend.create(collections::ATTENDEES, fields).await?;
        let attendee = Attendee::from_record(&record)?;
        tracing::info!(party = %party, attendee = %attendee.id, "Guest registered");
        Ok(attendee)
    }

    /// Fetch one invitation.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`](crate::ServiceError::NotFound) if
    /// it does not exist.
    pub async fn get_attendee(&self, id: &AttendeeId) -> Result<Attendee> {
        let record = self
            .backend
            .get_one(collections::ATTENDEES, id.as_str())
            .await?;
        Ok(Attendee::from_record(&record)?)
    }

    /// QR text presented at the door.
    #[must_use]
    pub fn attendee_qr(&self, attendee: &Attendee) -> String {
        qr::encode(&QrPayload::from(attendee))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ServiceError;
    use guestpass_testing::{InMemoryBackend, fixtures};

    fn form(name: &str, phone: &str) -> AttendeeForm {
        AttendeeForm {
            name: name.to_string(),
            phone: phone.to_string(),
        }
    }

    #[tokio::test]
    async fn registers_unscanned_invitation_with_code() {
        let backend = InMemoryBackend::new();
        fixtures::party(&backend, "e1", "AB12CD", "o1");
        let service = AttendeeService::new(Arc::new(backend.clone()))
            .with_codes(CodeAllocator::new(1).with_generator(|| "K7Q2ZD".to_string()));

        let attendee = service
            .register_attendee(&PartyId::new("e1"), &form(" Ana ", "06 12 34 56 78"))
            .await
            .unwrap();

        assert_eq!(attendee.name, "Ana");
        assert_eq!(attendee.code, "K7Q2ZD");
        assert!(!attendee.scanned);
        assert_eq!(
            qr::decode(&service.attendee_qr(&attendee)).unwrap(),
            QrPayload::attendee(attendee.id.as_str(), "e1", Some("K7Q2ZD".to_string()))
        );
    }

    #[tokio::test]
    async fn unknown_party_is_not_found() {
        let backend = InMemoryBackend::new();
        let service = AttendeeService::new(Arc::new(backend.clone()));

        let result = service
            .register_attendee(&PartyId::new("missing"), &form("Ana", "0612345678"))
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound { .. })));
        assert!(backend.records(collections::ATTENDEES).is_empty());
    }

    #[tokio::test]
    async fn blank_form_is_rejected_locally() {
        let backend = InMemoryBackend::new();
        let service = AttendeeService::new(Arc::new(backend.clone()));

        let result = service
            .register_attendee(&PartyId::new("e1"), &form("  ", ""))
            .await;
        let errors = match result {
            Err(ServiceError::Validation(errors)) => Some(errors),
            _ => None,
        }
        .unwrap();
        assert_eq!(errors.errors().len(), 2);
        assert!(backend.calls().is_empty());
    }
}
