//! # Guestpass Testing
//!
//! Test doubles for the guestpass apps.
//!
//! This crate provides:
//! - [`InMemoryBackend`]: the record store, with failure injection and read
//!   gates for reproducing races
//! - [`InMemoryAuthenticator`]: password sign-in issuing expiring tokens
//! - [`FixedClock`]: deterministic time
//! - [`fixtures`]: seed data shaped like real store records
//!
//! ## Example
//!
//! ```
//! use guestpass_testing::{InMemoryBackend, fixtures};
//!
//! let backend = InMemoryBackend::new();
//! fixtures::party(&backend, "e1", "AB12CD", "o1");
//! fixtures::attendee(&backend, "a1", "e1", false);
//! assert_eq!(backend.records("attendees").len(), 1);
//! ```

use chrono::{DateTime, Utc};
use guestpass_core::environment::Clock;

mod auth;
mod backend;

pub use auth::InMemoryAuthenticator;
pub use backend::{Call, InMemoryBackend, Operation};

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use guestpass_testing::mocks::FixedClock;
    /// use guestpass_core::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Default fixed clock for tests (2025-06-21 20:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(1_750_536_000))
    }
}

/// Seed data shaped like records written by the apps.
pub mod fixtures {
    use crate::InMemoryBackend;
    use guestpass_core::backend::{Record, collections};
    use serde_json::json;

    /// Seed a party with a join code.
    pub fn party(backend: &InMemoryBackend, id: &str, join_code: &str, organizer: &str) -> Record {
        backend.seed(
            collections::PARTIES,
            json!({
                "id": id,
                "title": format!("Party {id}"),
                "description": "Rooftop, bring a coat",
                "date": "2025-07-14 21:00:00.000Z",
                "location": "Quai 9",
                "code": join_code,
                "organizer": organizer,
            }),
        )
    }

    /// Seed an invitation.
    pub fn attendee(backend: &InMemoryBackend, id: &str, party_id: &str, scanned: bool) -> Record {
        backend.seed(
            collections::ATTENDEES,
            json!({
                "id": id,
                "name": format!("Guest {id}"),
                "phone": "0612345678",
                "partyId": party_id,
                "code": format!("{:0>6}", id.to_uppercase()),
                "scanned": scanned,
            }),
        )
    }

    /// Seed an audit entry.
    pub fn scan(
        backend: &InMemoryBackend,
        attendee_id: &str,
        scanned_by: &str,
        scanned_at: &str,
    ) -> Record {
        backend.seed(
            collections::SCANS,
            json!({
                "attendeeId": attendee_id,
                "scannedBy": scanned_by,
                "scannedAt": scanned_at,
            }),
        )
    }
}

/// Install a test-friendly tracing subscriber.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guestpass=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub use mocks::{FixedClock, test_clock};
