//! # Guestpass PocketBase
//!
//! Binding of the guestpass backend facade to a PocketBase server.
//!
//! [`PocketBaseClient`] implements both [`Backend`](guestpass_core::Backend)
//! and [`Authenticator`](guestpass_core::Authenticator):
//!
//! - Records API: `GET/POST/PATCH/DELETE /api/collections/{name}/records`
//! - Password auth: `POST /api/collections/users/auth-with-password`
//! - Realtime: server-sent events from `/api/realtime`
//!
//! Every HTTP failure is mapped into [`BackendError`](guestpass_core::BackendError)
//! before it leaves this crate.
//!
//! ## Server setup
//!
//! Conditional updates are only atomic when the collection's update rule
//! encodes the guard. For attendees that rule is [`ATTENDEE_UPDATE_RULE`],
//! installed by `pb_migrations/1760745600_guard_attendee_claims.js` at the
//! workspace root; copy it into the server's `pb_migrations` directory.
//!
//! ## Example
//!
//! ```no_run
//! use guestpass_core::{Authenticator, Backend};
//! use guestpass_pocketbase::{DEFAULT_TIMEOUT, PocketBaseClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = PocketBaseClient::new("http://127.0.0.1:8090", DEFAULT_TIMEOUT)?;
//!     client.sign_in_with_password("door@example.com", "secret").await?;
//!
//!     let attendee = client.get_one("attendees", "a1").await?;
//!     println!("{attendee:?}");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod sse;

pub use client::{DEFAULT_TIMEOUT, PocketBaseClient};

/// Attendees update rule that makes claiming an invitation atomic.
///
/// Any signed-in user may edit an invitation, but `scanned` can only be
/// written while it is still `false`, so of two concurrent claims the
/// server answers the second with 404.
pub const ATTENDEE_UPDATE_RULE: &str =
    "@request.auth.id != '' && (scanned = false || @request.body.scanned:isset = false)";
