//! Redemption outcomes and their presentation.

use guestpass_core::backend::BackendError;
use guestpass_core::model::{Attendee, Party, ScanRecord};
use serde::Serialize;

/// Why the invitation could not be looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundCause {
    /// The store has no such invitation.
    Missing,
    /// The lookup itself failed (timeout, network, server error).
    Unreachable,
}

/// Which half of the redemption is missing after a partial failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialFailureStage {
    /// The invitation is marked scanned but no audit entry was written.
    AuditMissing,
    /// An audit entry exists but the invitation is still unscanned.
    FlagNotSet,
}

/// Degraded context attached to a successful redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionWarning {
    /// The party could not be fetched; its details are not shown.
    EventUnavailable,
    /// The invitation had been claimed by a scan that never wrote its audit
    /// entry; this scan wrote it.
    CompletedEarlierClaim,
}

/// Result of one redemption attempt.
///
/// Every expected adverse condition is a variant here rather than an error;
/// only integration bugs surface as
/// [`RedemptionError`](super::RedemptionError).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionOutcome {
    /// Invitation redeemed: flag set and audit entry written.
    Success {
        /// Attendee, now scanned
        attendee: Attendee,
        /// Party, when it could be fetched
        event: Option<Party>,
        /// The audit entry just written
        scan: ScanRecord,
        /// Degraded-context notices
        warnings: Vec<RedemptionWarning>,
    },
    /// Invitation was already redeemed; nothing was written.
    AlreadyScanned {
        /// Attendee as stored
        attendee: Attendee,
    },
    /// The scanned code is not an attendee invitation.
    Invalid {
        /// Internal reason, for logs
        reason: String,
    },
    /// The invitation could not be looked up.
    NotFound {
        /// Missing record or failed lookup
        cause: NotFoundCause,
    },
    /// No valid session; send the user to the login screen.
    Unauthenticated,
    /// One write landed and the other did not.
    PartialFailure {
        /// Attendee concerned
        attendee: Attendee,
        /// Which half is missing
        stage: PartialFailureStage,
        /// Error of the failed write
        error: BackendError,
    },
    /// The store could not be reached and the invitation is not known to be
    /// claimed; scanning again is safe.
    Connectivity {
        /// Underlying failure
        error: BackendError,
    },
}

/// Colour of the result banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BannerKind {
    /// Let the guest in
    Pass,
    /// Refuse entry
    Fail,
    /// Let the guest in, but tell the operator something is off
    Warning,
    /// Nothing happened; try again
    Retry,
}

/// What the scan-result screen shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Banner {
    /// Banner colour
    pub kind: BannerKind,
    /// User-facing message
    pub message: String,
}

impl Banner {
    fn new(kind: BannerKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl RedemptionOutcome {
    /// Stable name for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::AlreadyScanned { .. } => "already_scanned",
            Self::Invalid { .. } => "invalid",
            Self::NotFound { .. } => "not_found",
            Self::Unauthenticated => "unauthenticated",
            Self::PartialFailure { .. } => "partial_failure",
            Self::Connectivity { .. } => "connectivity",
        }
    }

    /// Whether the guest should be let in.
    #[must_use]
    pub const fn admits(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::PartialFailure { .. })
    }

    /// Attendee details to display, if the invitation was found.
    #[must_use]
    pub const fn attendee(&self) -> Option<&Attendee> {
        match self {
            Self::Success { attendee, .. }
            | Self::AlreadyScanned { attendee }
            | Self::PartialFailure { attendee, .. } => Some(attendee),
            _ => None,
        }
    }

    /// Banner for the scan-result screen.
    ///
    /// Rejections use generic messages; internal reasons and backend
    /// errors are never shown.
    #[must_use]
    pub fn banner(&self) -> Banner {
        match self {
            Self::Success { warnings, .. } if warnings.is_empty() => {
                Banner::new(BannerKind::Pass, "Valid invitation")
            },
            Self::Success { warnings, .. }
                if warnings.contains(&RedemptionWarning::CompletedEarlierClaim) =>
            {
                Banner::new(
                    BannerKind::Warning,
                    "Valid invitation, completing an interrupted earlier scan",
                )
            },
            Self::Success { .. } => Banner::new(
                BannerKind::Pass,
                "Valid invitation (event details unavailable)",
            ),
            Self::AlreadyScanned { .. } => {
                Banner::new(BannerKind::Fail, "This invitation has already been scanned")
            },
            Self::Invalid { .. } => {
                Banner::new(BannerKind::Fail, "Invalid or unrecognized QR code")
            },
            Self::NotFound { .. } => Banner::new(
                BannerKind::Fail,
                "Invitation not found or processing error",
            ),
            Self::Unauthenticated => {
                Banner::new(BannerKind::Retry, "Session expired, please sign in again")
            },
            Self::PartialFailure {
                stage: PartialFailureStage::AuditMissing,
                ..
            } => Banner::new(
                BannerKind::Warning,
                "Valid invitation, but the scan could not be logged",
            ),
            Self::PartialFailure {
                stage: PartialFailureStage::FlagNotSet,
                ..
            } => Banner::new(
                BannerKind::Warning,
                "Valid invitation, but it could not be marked as used; a re-scan may be accepted",
            ),
            Self::Connectivity { .. } => {
                Banner::new(BannerKind::Retry, "Connection problem, please scan again")
            },
        }
    }
}
