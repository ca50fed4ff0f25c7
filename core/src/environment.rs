//! Injected dependencies that are not part of the backend facade.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// Redemption stamps audit entries and checks session expiry through this
/// trait, so tests can pin the current time.
///
/// # Examples
///
/// ```
/// use guestpass_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let before = clock.now();
/// assert!(clock.now() >= before);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
