//! Organizer party management and party lookup.
//!
//! Deleting a party never removes its invitations implicitly; what happens
//! to them is chosen by [`CascadePolicy`].

use crate::codes::CodeAllocator;
use crate::error::{Result, ServiceError};
use crate::session::Session;
use chrono::{DateTime, Utc};
use guestpass_core::backend::{Backend, Filter, ListQuery, Record, collections};
use guestpass_core::code::JoinCode;
use guestpass_core::insights::party_share_link;
use guestpass_core::model::{NewParty, Party, PartyId, format_timestamp};
use guestpass_core::qr::{self, QrPayload};
use guestpass_core::validation::{PartyForm, Validate, ValidationErrors};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Page size used when sweeping dependent records.
const SWEEP_PAGE: u32 = 100;

/// What deleting a party does to its invitations and their scans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CascadePolicy {
    /// Leave invitations and scans in place, pointing at a missing party.
    #[default]
    Orphan,
    /// Delete scans, then invitations, then the party.
    Cascade,
}

impl CascadePolicy {
    /// Configuration value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Orphan => "orphan",
            Self::Cascade => "cascade",
        }
    }
}

impl fmt::Display for CascadePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CascadePolicy {
    type Err = ();

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "orphan" => Ok(Self::Orphan),
            "cascade" => Ok(Self::Cascade),
            _ => Err(()),
        }
    }
}

/// Records removed by [`PartyService::delete_party`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletedParty {
    /// Invitations deleted along with the party
    pub attendees: usize,
    /// Scan records deleted along with the party
    pub scans: usize,
}

/// Party operations for the organizer app, plus join-code lookup.
#[derive(Clone)]
pub struct PartyService {
    backend: Arc<dyn Backend>,
    codes: CodeAllocator,
    cascade: CascadePolicy,
    share_base_url: Option<String>,
}

impl fmt::Debug for PartyService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartyService")
            .field("codes", &self.codes)
            .field("cascade", &self.cascade)
            .field("share_base_url", &self.share_base_url)
            .finish_non_exhaustive()
    }
}

/// Validated form with its required date extracted.
fn checked(form: &PartyForm) -> Result<DateTime<Utc>> {
    form.validate()?;
    // validate() rejects a missing date
    form.date
        .ok_or_else(|| ServiceError::Validation(ValidationErrors::default()))
}

impl PartyService {
    /// Service with the orphaning delete policy and sharing disabled.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            codes: CodeAllocator::default(),
            cascade: CascadePolicy::default(),
            share_base_url: None,
        }
    }

    /// Use `codes` for join-code allocation.
    #[must_use]
    pub fn with_codes(mut self, codes: CodeAllocator) -> Self {
        self.codes = codes;
        self
    }

    /// Set the delete policy.
    #[must_use]
    pub const fn with_cascade(mut self, cascade: CascadePolicy) -> Self {
        self.cascade = cascade;
        self
    }

    /// Enable share links under `base_url`.
    #[must_use]
    pub fn with_share_base_url(mut self, base_url: Option<String>) -> Self {
        self.share_base_url = base_url;
        self
    }

    /// Create a party owned by the session's account.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] before any request if the form
    /// is invalid, [`ServiceError::CodeSpaceExhausted`] if no free join code
    /// was found, or the converted backend error.
    pub async fn create_party(&self, form: &PartyForm, session: &Session) -> Result<Party> {
        let date = checked(form)?;
        let join_code = self.codes.join_code(self.backend.as_ref()).await?;

        let fields = NewParty {
            title: form.title.trim().to_string(),
            description: form.description.trim().to_string(),
            date,
            location: form.location.trim().to_string(),
            join_code,
            organizer: session.account_id().clone(),
        }
        .to_fields();

        let record = self.backend.create(collections::PARTIES, fields).await?;
        let party = Party::from_record(&record)?;
        tracing::info!(party = %party.id, code = %party.join_code, "Party created");
        Ok(party)
    }

    /// Rewrite the editable fields of a party; its join code and organizer
    /// are kept.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] for an invalid form or
    /// [`ServiceError::NotFound`] if the party does not exist.
    pub async fn update_party(&self, id: &PartyId, form: &PartyForm) -> Result<Party> {
        let date = checked(form)?;

        let mut fields = Record::new();
        fields.insert("title".to_string(), Value::from(form.title.trim()));
        fields.insert("description".to_string(), Value::from(form.description.trim()));
        fields.insert("date".to_string(), Value::from(format_timestamp(date)));
        fields.insert("location".to_string(), Value::from(form.location.trim()));

        let record = self
            .backend
            .collection(collections::PARTIES)
            .update(id.as_str(), fields)
            .await?;
        tracing::info!(party = %id, "Party updated");
        Ok(Party::from_record(&record)?)
    }

    /// Fetch one party.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if it does not exist.
    pub async fn get_party(&self, id: &PartyId) -> Result<Party> {
        let record = self
            .backend
            .collection(collections::PARTIES)
            .get_one(id.as_str())
            .await?;
        Ok(Party::from_record(&record)?)
    }

    /// Delete a party, applying the configured [`CascadePolicy`].
    ///
    /// A cascade that fails part way leaves the party in place, so it can
    /// be retried.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if the party does not exist, or
    /// the first failing delete.
    pub async fn delete_party(&self, id: &PartyId) -> Result<DeletedParty> {
        let mut deleted = DeletedParty::default();

        if self.cascade == CascadePolicy::Cascade {
            // Fail early rather than sweeping for a party that is gone.
            self.backend
                .get_one(collections::PARTIES, id.as_str())
                .await?;

            let invitations = Filter::eq("partyId", id.as_str());
            while let Some(attendees) = self.first_page(collections::ATTENDEES, &invitations).await? {
                for attendee in attendees {
                    let scans = Filter::eq("attendeeId", attendee.as_str());
                    while let Some(batch) = self.first_page(collections::SCANS, &scans).await? {
                        for scan in batch {
                            self.backend.delete(collections::SCANS, &scan).await?;
                            deleted.scans += 1;
                        }
                    }
                    self.backend
                        .delete(collections::ATTENDEES, &attendee)
                        .await?;
                    deleted.attendees += 1;
                }
            }
        }

        self.backend
            .delete(collections::PARTIES, id.as_str())
            .await?;
        tracing::info!(
            party = %id,
            policy = %self.cascade,
            attendees = deleted.attendees,
            scans = deleted.scans,
            "Party deleted"
        );
        Ok(deleted)
    }

    /// Ids on the first page of `collection` matching `filter`, or `None`
    /// once nothing matches.
    async fn first_page(&self, collection: &str, filter: &Filter) -> Result<Option<Vec<String>>> {
        let query = ListQuery::new()
            .per_page(SWEEP_PAGE)
            .filter(filter.clone());
        let page = self.backend.get_list(collection, &query).await?;
        let ids: Vec<String> = page
            .items
            .iter()
            .filter_map(|record| guestpass_core::backend::record_id(record).map(str::to_string))
            .collect();
        Ok((!ids.is_empty()).then_some(ids))
    }

    /// Resolve a manually entered join code.
    ///
    /// Input is trimmed and upper-cased first.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidJoinCode`] if the input is not a
    /// well-formed code or no party uses it.
    pub async fn find_party_by_join_code(&self, raw: &str) -> Result<Party> {
        let code = JoinCode::normalize(raw).map_err(|error| {
            tracing::info!(input = raw, error = %error, "Rejected malformed join code");
            ServiceError::InvalidJoinCode(raw.trim().to_string())
        })?;

        let query = ListQuery::new()
            .per_page(2)
            .filter(Filter::eq("code", code.as_str()));
        let page = self.backend.get_list(collections::PARTIES, &query).await?;

        if page.total_items > 1 {
            tracing::warn!(
                code = %code,
                matches = page.total_items,
                "Join code shared by several parties, using the first"
            );
        }
        let Some(record) = page.items.first() else {
            tracing::info!(code = %code, "No party for join code");
            return Err(ServiceError::InvalidJoinCode(code.into_string()));
        };
        Ok(Party::from_record(record)?)
    }

    /// Resolve a scanned party QR code.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidQr`] for unreadable text,
    /// [`ServiceError::WrongQrType`] for an invitation QR code, or
    /// [`ServiceError::NotFound`] if the party no longer exists.
    pub async fn find_party_by_qr(&self, text: &str) -> Result<Party> {
        match qr::decode(text)? {
            QrPayload::Event { id, .. } => self.get_party(&PartyId::new(id)).await,
            other => Err(ServiceError::WrongQrType {
                expected: "event",
                found: other.kind(),
            }),
        }
    }

    /// QR text identifying a party.
    #[must_use]
    pub fn party_qr(&self, party: &Party) -> String {
        qr::encode(&QrPayload::from(party))
    }

    /// Share link for a party, when sharing is configured and the party
    /// has a join code.
    #[must_use]
    pub fn share_link(&self, party: &Party) -> Option<String> {
        let base = self.share_base_url.as_deref()?;
        (!party.join_code.is_empty()).then(|| party_share_link(base, &party.join_code))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use guestpass_testing::{InMemoryBackend, fixtures};

    fn service(backend: &InMemoryBackend) -> PartyService {
        PartyService::new(Arc::new(backend.clone()))
    }

    #[test]
    fn cascade_policy_parses() {
        assert_eq!("cascade".parse(), Ok(CascadePolicy::Cascade));
        assert_eq!(" Orphan ".parse(), Ok(CascadePolicy::Orphan));
        assert_eq!("purge".parse::<CascadePolicy>(), Err(()));
    }

    #[tokio::test]
    async fn join_code_is_normalized_before_lookup() {
        let backend = InMemoryBackend::new();
        fixtures::party(&backend, "e1", "AB12CD", "o1");

        let party = service(&backend)
            .find_party_by_join_code("  ab12cd ")
            .await
            .unwrap();
        assert_eq!(party.id.as_str(), "e1");
    }

    #[tokio::test]
    async fn malformed_join_code_sends_no_request() {
        let backend = InMemoryBackend::new();
        let result = service(&backend).find_party_by_join_code("AB-12").await;
        assert!(matches!(result, Err(ServiceError::InvalidJoinCode(_))));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn attendee_qr_is_the_wrong_type_for_party_lookup() {
        let backend = InMemoryBackend::new();
        let text = qr::encode(&QrPayload::attendee("a1", "e1", None));
        assert_eq!(
            service(&backend).find_party_by_qr(&text).await,
            Err(ServiceError::WrongQrType {
                expected: "event",
                found: "attendee"
            })
        );
    }

    #[tokio::test]
    async fn share_link_requires_base_url_and_code() {
        let backend = InMemoryBackend::new();
        let record = fixtures::party(&backend, "e1", "AB12CD", "o1");
        let party = Party::from_record(&record).unwrap();

        assert_eq!(service(&backend).share_link(&party), None);
        let sharing = service(&backend).with_share_base_url(Some("https://guestpass.example/".into()));
        assert_eq!(
            sharing.share_link(&party).as_deref(),
            Some("https://guestpass.example/party?code=AB12CD")
        );
    }
}
