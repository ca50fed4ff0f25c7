//! # Guestpass
//!
//! Services behind the two guestpass apps:
//!
//! - **Organizer**: creates parties ([`parties`]), registers guests
//!   ([`attendees`]) and follows attendance ([`views`])
//! - **Guard**: scans invitations at the door ([`redemption`]) and reviews
//!   its scan history ([`views`])
//!
//! Both apps sign in through a [`SessionContext`] that admits only the
//! app's role, and reach the record store through an [`AppContext`] that
//! bounds every call by one request timeout.
//!
//! ## Example
//!
//! ```
//! use guestpass::{AppContext, Config, RedemptionOutcome, SessionContext};
//! use guestpass_core::{LoginForm, Role, qr};
//! use guestpass_testing::{InMemoryAuthenticator, InMemoryBackend, fixtures, test_clock};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = InMemoryBackend::new();
//! fixtures::party(&backend, "e1", "AB12CD", "o1");
//! fixtures::attendee(&backend, "a1", "e1", false);
//!
//! let clock = Arc::new(test_clock());
//! let auth = InMemoryAuthenticator::new(clock.clone());
//! auth.register("g1", "door@example.com", "secret", Some(Role::Guard));
//!
//! let context = AppContext::new(Arc::new(backend), Arc::new(auth), clock, Config::default());
//! let mut sessions = SessionContext::new();
//! let session = context
//!     .sign_in(&mut sessions, &LoginForm::new("door@example.com", "secret"), Role::Guard)
//!     .await?;
//!
//! let text = qr::encode(&qr::QrPayload::attendee("a1", "e1", None));
//! let outcome = context.redeemer().redeem_text(&text, Some(&session)).await?;
//! assert!(matches!(outcome, RedemptionOutcome::Success { .. }));
//! # Ok(())
//! # }
//! ```

pub mod attendees;
pub mod codes;
pub mod config;
pub mod context;
pub mod error;
pub mod parties;
pub mod redemption;
pub mod retry;
pub mod session;
pub mod telemetry;
pub mod timeout;
pub mod views;

pub use attendees::AttendeeService;
pub use codes::CodeAllocator;
pub use config::{Config, ConfigError};
pub use context::AppContext;
pub use error::{Result, ServiceError};
pub use parties::{CascadePolicy, DeletedParty, PartyService};
pub use redemption::{
    Banner, BannerKind, NotFoundCause, PartialFailureStage, RedemptionError, RedemptionOutcome,
    RedemptionWarning, Redeemer, WritePolicy,
};
pub use session::{Session, SessionContext};
pub use views::{PartyOrder, ScanHistoryEntry, Views, WatchHandle};
