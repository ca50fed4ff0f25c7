//! Invitation redemption.
//!
//! A guard scans an attendee QR code; the [`Redeemer`] decides whether the
//! invitation is valid and unused, flips it to scanned and appends a
//! [`ScanRecord`](guestpass_core::ScanRecord) audit entry.
//!
//! States per attendee are `Unscanned -> Scanned`; there is no way back.
//!
//! # Write ordering
//!
//! The store offers no transaction spanning the flag update and the audit
//! write, so the two writes are ordered by a [`WritePolicy`]:
//!
//! - [`WritePolicy::ClaimFirst`] claims the invitation with a conditional
//!   update (`scanned: false -> true`). Of two guards scanning the same code
//!   concurrently exactly one wins; the other sees
//!   [`RedemptionOutcome::AlreadyScanned`]. The audit write then follows and
//!   is retried until it lands or retries run out.
//! - [`WritePolicy::AuditFirst`] writes the audit entry, then sets the flag
//!   unconditionally. Two concurrent scans can both succeed and leave two
//!   audit entries.
//!
//! Either way a failure between the two writes is reported as
//! [`RedemptionOutcome::PartialFailure`].
//!
//! A claim can land even though its reply is lost. Claim-first re-reads the
//! invitation after a timeout or transport error and carries on with the
//! audit write when the flag is set and no audit entry exists. Audit retries
//! look for the entry of an earlier attempt before writing another, and a
//! later scan that finds the flag set without an audit entry writes the
//! missing entry.

mod machine;
mod outcome;

pub use machine::{RedemptionError, Redeemer};
pub use outcome::{
    Banner, BannerKind, NotFoundCause, PartialFailureStage, RedemptionOutcome, RedemptionWarning,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Order of the two redemption writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WritePolicy {
    /// Conditional flag update first, then the audit entry (retried).
    #[default]
    ClaimFirst,
    /// Audit entry first, then an unconditional flag update.
    AuditFirst,
}

impl WritePolicy {
    /// Configuration value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClaimFirst => "claim-first",
            Self::AuditFirst => "audit-first",
        }
    }
}

impl fmt::Display for WritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WritePolicy {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "claim-first" | "claim_first" => Ok(Self::ClaimFirst),
            "audit-first" | "audit_first" => Ok(Self::AuditFirst),
            _ => Err(()),
        }
    }
}
