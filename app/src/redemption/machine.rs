use super::WritePolicy;
use super::outcome::{NotFoundCause, PartialFailureStage, RedemptionOutcome, RedemptionWarning};
use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::session::Session;
use guestpass_core::backend::{Backend, BackendError, Filter, ListQuery, Record, collections};
use guestpass_core::environment::Clock;
use guestpass_core::model::{Attendee, NewScanRecord, Party, RecordError, ScanRecord};
use guestpass_core::qr::{self, QrPayload};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Failures that indicate an integration bug rather than an adverse but
/// expected condition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RedemptionError {
    /// The store returned a record that cannot be interpreted.
    #[error("Malformed record: {0}")]
    MalformedRecord(#[from] RecordError),

    /// The store answered in a way the client does not understand.
    #[error("Unexpected backend failure: {0}")]
    Backend(BackendError),
}

/// Runs the redemption state machine against a backend.
#[derive(Clone)]
pub struct Redeemer {
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    policy: WritePolicy,
    audit_retry: RetryPolicy,
}

impl std::fmt::Debug for Redeemer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redeemer")
            .field("policy", &self.policy)
            .field("audit_retry", &self.audit_retry)
            .finish_non_exhaustive()
    }
}

fn flag(value: bool) -> Record {
    let mut fields = Record::new();
    fields.insert("scanned".to_string(), Value::Bool(value));
    fields
}

/// Errors worth repeating the audit write for.
fn is_transient(error: &BackendError) -> bool {
    error.is_connectivity() || matches!(error, BackendError::Api { status, .. } if *status >= 500)
}

/// Where a claim whose reply never arrived left the invitation.
enum LostClaim {
    /// The claim landed and no audit entry exists yet.
    Landed(Attendee),
    /// Report this instead of continuing.
    Settled(RedemptionOutcome),
}

/// Map the failure of the first write; nothing has been persisted yet.
fn first_write_failure(error: BackendError) -> Result<RedemptionOutcome, RedemptionError> {
    match error {
        BackendError::NotFound { .. } => Ok(RedemptionOutcome::NotFound {
            cause: NotFoundCause::Missing,
        }),
        BackendError::Unauthorized => Ok(RedemptionOutcome::Unauthenticated),
        error @ (BackendError::Malformed(_) | BackendError::Unsupported(_)) => {
            Err(RedemptionError::Backend(error))
        },
        error => {
            tracing::warn!(error = %error, "Redemption write failed, nothing persisted");
            Ok(RedemptionOutcome::Connectivity { error })
        },
    }
}

impl Redeemer {
    /// Redeemer with the default write policy and audit retry.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            policy: WritePolicy::default(),
            audit_retry: RetryPolicy::default(),
        }
    }

    /// Set the write ordering.
    #[must_use]
    pub const fn with_policy(mut self, policy: WritePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set how the audit write is retried once an invitation is claimed.
    #[must_use]
    pub fn with_audit_retry(mut self, retry: RetryPolicy) -> Self {
        self.audit_retry = retry;
        self
    }

    /// Active write ordering.
    #[must_use]
    pub const fn policy(&self) -> WritePolicy {
        self.policy
    }

    fn authenticated<'s>(&self, session: Option<&'s Session>) -> Option<&'s Session> {
        session.filter(|s| s.is_valid(self.clock.now()))
    }

    /// Decode scanned text, then [`redeem`](Self::redeem) it.
    ///
    /// # Errors
    ///
    /// See [`redeem`](Self::redeem).
    pub async fn redeem_text(
        &self,
        text: &str,
        session: Option<&Session>,
    ) -> Result<RedemptionOutcome, RedemptionError> {
        match qr::decode(text) {
            Ok(payload) => self.redeem(&payload, session).await,
            Err(_) if self.authenticated(session).is_none() => {
                Ok(RedemptionOutcome::Unauthenticated)
            },
            Err(error) => {
                tracing::info!(error = %error, "Rejected unreadable QR code");
                Ok(RedemptionOutcome::Invalid {
                    reason: error.to_string(),
                })
            },
        }
    }

    /// Redeem a decoded payload on behalf of the session's guard.
    ///
    /// Checks run strictly in order: session, payload shape, invitation
    /// lookup, scanned flag, party lookup, then the two writes.
    ///
    /// Under [`WritePolicy::ClaimFirst`] a scanned invitation with no audit
    /// entry was claimed by a scan that never finished; its audit entry is
    /// written now and the guest admitted with
    /// [`RedemptionWarning::CompletedEarlierClaim`].
    ///
    /// # Errors
    ///
    /// Returns [`RedemptionError`] only when the store hands back something
    /// unreadable; every expected condition is a [`RedemptionOutcome`].
    #[tracing::instrument(skip(self, payload, session), fields(attendee = payload.id(), policy = %self.policy))]
    pub async fn redeem(
        &self,
        payload: &QrPayload,
        session: Option<&Session>,
    ) -> Result<RedemptionOutcome, RedemptionError> {
        let Some(session) = self.authenticated(session) else {
            tracing::info!("Redemption refused without a valid session");
            return Ok(RedemptionOutcome::Unauthenticated);
        };

        let (attendee_id, event_id) = match payload {
            QrPayload::Attendee {
                id,
                event_id: Some(event_id),
                ..
            } if !id.is_empty() && !event_id.is_empty() => (id.as_str(), event_id.as_str()),
            QrPayload::Attendee { .. } => {
                return Ok(RedemptionOutcome::Invalid {
                    reason: "attendee payload without event id".to_string(),
                });
            },
            QrPayload::Event { .. } => {
                return Ok(RedemptionOutcome::Invalid {
                    reason: format!("expected attendee QR code, got {}", payload.kind()),
                });
            },
        };

        let record = match self.backend.get_one(collections::ATTENDEES, attendee_id).await {
            Ok(record) => record,
            Err(BackendError::NotFound { .. }) => {
                tracing::info!("Invitation not found");
                return Ok(RedemptionOutcome::NotFound {
                    cause: NotFoundCause::Missing,
                });
            },
            Err(BackendError::Unauthorized) => return Ok(RedemptionOutcome::Unauthenticated),
            Err(error @ (BackendError::Malformed(_) | BackendError::Unsupported(_))) => {
                return Err(RedemptionError::Backend(error));
            },
            Err(error) => {
                tracing::warn!(error = %error, "Invitation lookup failed");
                return Ok(RedemptionOutcome::NotFound {
                    cause: NotFoundCause::Unreachable,
                });
            },
        };
        let attendee = Attendee::from_record(&record)?;

        if attendee.party_id.as_str() != event_id {
            tracing::warn!(
                payload_event = event_id,
                stored_event = %attendee.party_id,
                "QR code names a different party than the stored invitation"
            );
        }

        let scan = NewScanRecord {
            attendee_id: attendee.id.clone(),
            scanned_by: session.account_id().clone(),
            scanned_at: self.clock.now(),
        };

        let outcome = if attendee.scanned {
            if !self.claimed_without_audit(&attendee).await {
                tracing::info!("Invitation already scanned");
                return Ok(RedemptionOutcome::AlreadyScanned { attendee });
            }
            tracing::warn!("Invitation claimed by an interrupted scan, completing its audit entry");
            let (event, mut warnings) = self.fetch_event(&attendee).await;
            warnings.push(RedemptionWarning::CompletedEarlierClaim);
            self.audit_claimed(attendee, scan, event, warnings).await?
        } else {
            let (event, warnings) = self.fetch_event(&attendee).await;
            match self.policy {
                WritePolicy::ClaimFirst => {
                    self.claim_then_audit(attendee, scan, event, warnings).await?
                },
                WritePolicy::AuditFirst => {
                    self.audit_then_flag(attendee, scan, event, warnings).await?
                },
            }
        };

        match &outcome {
            RedemptionOutcome::Success { scan, .. } => {
                tracing::info!(scan = %scan.id, guard = %scan.scanned_by, "Invitation redeemed");
            },
            RedemptionOutcome::PartialFailure { stage, error, .. } => {
                tracing::error!(stage = ?stage, error = %error, "Redemption only partially recorded");
            },
            other => tracing::info!(outcome = other.label(), "Redemption not applied"),
        }
        Ok(outcome)
    }

    /// Party context for display; failure degrades to a warning.
    async fn fetch_event(&self, attendee: &Attendee) -> (Option<Party>, Vec<RedemptionWarning>) {
        let unavailable = (None, vec![RedemptionWarning::EventUnavailable]);
        if attendee.party_id.is_empty() {
            tracing::warn!("Invitation has no party");
            return unavailable;
        }

        match self
            .backend
            .get_one(collections::PARTIES, attendee.party_id.as_str())
            .await
        {
            Ok(record) => match Party::from_record(&record) {
                Ok(party) => (Some(party), Vec::new()),
                Err(error) => {
                    tracing::warn!(error = %error, "Party record unreadable");
                    unavailable
                },
            },
            Err(error) => {
                tracing::warn!(party = %attendee.party_id, error = %error, "Party details unavailable");
                unavailable
            },
        }
    }

    /// Audit entry already written for `attendee_id`, if any.
    async fn existing_audit(&self, attendee_id: &str) -> Result<Option<Record>, BackendError> {
        let query = ListQuery::new()
            .filter(Filter::eq("attendeeId", attendee_id))
            .per_page(1);
        let page = self.backend.get_list(collections::SCANS, &query).await?;
        Ok(page.items.into_iter().next())
    }

    /// Whether a scanned invitation was claimed by a scan that never wrote
    /// its audit entry.
    ///
    /// Only claim-first leaves that state behind. An unreadable audit
    /// collection counts as "no": the scan is refused rather than admitted
    /// twice.
    async fn claimed_without_audit(&self, attendee: &Attendee) -> bool {
        if self.policy != WritePolicy::ClaimFirst {
            return false;
        }
        match self.existing_audit(attendee.id.as_str()).await {
            Ok(existing) => existing.is_none(),
            Err(error) => {
                tracing::warn!(error = %error, "Audit lookup failed");
                false
            },
        }
    }

    /// Re-read an invitation after the claim reply was lost in transit.
    async fn settle_lost_claim(
        &self,
        attendee: &Attendee,
        error: BackendError,
    ) -> Result<LostClaim, RedemptionError> {
        let unknown =
            |error: BackendError| LostClaim::Settled(RedemptionOutcome::Connectivity { error });

        let record = match self
            .backend
            .get_one(collections::ATTENDEES, attendee.id.as_str())
            .await
        {
            Ok(record) => record,
            Err(reread) => {
                tracing::warn!(error = %reread, "Could not tell whether the claim landed");
                return Ok(unknown(error));
            },
        };
        let current = Attendee::from_record(&record)?;
        if !current.scanned {
            tracing::warn!(error = %error, "Claim did not land, nothing persisted");
            return Ok(unknown(error));
        }

        match self.existing_audit(current.id.as_str()).await {
            Ok(None) => {
                tracing::info!("Claim landed despite the lost reply");
                Ok(LostClaim::Landed(current))
            },
            Ok(Some(_)) => Ok(LostClaim::Settled(RedemptionOutcome::AlreadyScanned {
                attendee: current,
            })),
            Err(lookup) => {
                tracing::warn!(error = %lookup, "Audit lookup failed after a lost claim reply");
                Ok(unknown(error))
            },
        }
    }

    async fn claim_then_audit(
        &self,
        attendee: Attendee,
        scan: NewScanRecord,
        event: Option<Party>,
        warnings: Vec<RedemptionWarning>,
    ) -> Result<RedemptionOutcome, RedemptionError> {
        let guard = flag(false);
        let claimed = match self
            .backend
            .update_where(collections::ATTENDEES, attendee.id.as_str(), &guard, flag(true))
            .await
        {
            Ok(Some(record)) => Attendee::from_record(&record)?,
            Ok(None) => {
                tracing::info!("Lost the race, invitation claimed by another scan");
                return Ok(RedemptionOutcome::AlreadyScanned {
                    attendee: Attendee {
                        scanned: true,
                        ..attendee
                    },
                });
            },
            Err(error) if is_transient(&error) => {
                match self.settle_lost_claim(&attendee, error).await? {
                    LostClaim::Landed(claimed) => claimed,
                    LostClaim::Settled(outcome) => return Ok(outcome),
                }
            },
            Err(error) => return first_write_failure(error),
        };

        self.audit_claimed(claimed, scan, event, warnings).await
    }

    /// Write the audit entry for an invitation that is already claimed.
    ///
    /// Retries look for an entry left by an earlier attempt whose reply was
    /// lost before creating another.
    async fn audit_claimed(
        &self,
        claimed: Attendee,
        scan: NewScanRecord,
        event: Option<Party>,
        warnings: Vec<RedemptionWarning>,
    ) -> Result<RedemptionOutcome, RedemptionError> {
        let fields = scan.to_fields();
        let attendee_id = claimed.id.as_str();
        let mut attempts = 0_usize;
        let written = retry_with_predicate(
            &self.audit_retry,
            || {
                attempts += 1;
                let retrying = attempts > 1;
                let fields = fields.clone();
                async move {
                    if retrying {
                        if let Some(existing) = self.existing_audit(attendee_id).await? {
                            tracing::info!("Audit entry from an earlier attempt found");
                            return Ok(existing);
                        }
                    }
                    self.backend.create(collections::SCANS, fields).await
                }
            },
            is_transient,
        )
        .await;

        match written {
            Ok(record) => Ok(RedemptionOutcome::Success {
                attendee: claimed,
                event,
                scan: ScanRecord::from_record(&record)?,
                warnings,
            }),
            Err(error) => Ok(RedemptionOutcome::PartialFailure {
                attendee: claimed,
                stage: PartialFailureStage::AuditMissing,
                error,
            }),
        }
    }

    async fn audit_then_flag(
        &self,
        attendee: Attendee,
        scan: NewScanRecord,
        event: Option<Party>,
        warnings: Vec<RedemptionWarning>,
    ) -> Result<RedemptionOutcome, RedemptionError> {
        let scan = match self
            .backend
            .create(collections::SCANS, scan.to_fields())
            .await
        {
            Ok(record) => ScanRecord::from_record(&record)?,
            Err(error) => return first_write_failure(error),
        };

        match self
            .backend
            .update(collections::ATTENDEES, attendee.id.as_str(), flag(true))
            .await
        {
            Ok(record) => Ok(RedemptionOutcome::Success {
                attendee: Attendee::from_record(&record)?,
                event,
                scan,
                warnings,
            }),
            Err(error) => Ok(RedemptionOutcome::PartialFailure {
                attendee,
                stage: PartialFailureStage::FlagNotSet,
                error,
            }),
        }
    }
}
