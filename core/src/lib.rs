//! # Guestpass Core
//!
//! Domain types and contracts shared by the organizer and guard apps.
//!
//! Both apps are thin clients over a hosted record store. This crate holds
//! everything that does not touch the network:
//!
//! - **Model**: `Party`, `Attendee`, `ScanRecord`, `Account` and their
//!   decoding from loosely-typed store records
//! - **Backend**: the facade traits the apps consume ([`backend::Backend`],
//!   [`backend::Authenticator`]) plus the typed query language
//! - **Code**: join-code and attendee-code generation
//! - **QR**: the payload carried by invitation and party QR codes
//! - **Validation**: form checks performed before any request is sent
//! - **Insights**: attendance statistics and search
//! - **Environment**: injected clock
//!
//! ## Example
//!
//! ```
//! use guestpass_core::qr::{self, QrPayload};
//!
//! let payload = QrPayload::attendee("a1", "e1", Some("K7Q2ZD".to_string()));
//! let text = qr::encode(&payload);
//! assert_eq!(qr::decode(&text).ok(), Some(payload));
//! ```

pub use chrono::{DateTime, Utc};

pub mod backend;
pub mod code;
pub mod environment;
pub mod insights;
pub mod model;
pub mod qr;
pub mod validation;

pub use backend::{
    AuthGrant, Authenticator, Backend, BackendError, CollectionRef, Filter, ListQuery, Page,
    Record, RecordAction, RecordEvent, Sort, Subscription,
};
pub use code::{JoinCode, generate_code};
pub use environment::{Clock, SystemClock};
pub use model::{
    Account, AccountId, Attendee, AttendeeId, Party, PartyId, RecordError, Role, ScanId,
    ScanRecord,
};
pub use qr::{MalformedPayload, QrPayload};
pub use validation::{
    AttendeeForm, LoginForm, PartyForm, Validate, ValidationError, ValidationErrors,
};
