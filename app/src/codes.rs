//! Collision-checked code allocation.
//!
//! Six characters from `A-Z0-9` give about 2.2 billion codes, so collisions
//! are rare, but nothing in the store enforces uniqueness. Before a code is
//! used the allocator looks it up and draws again if it is taken.

use crate::error::{Result, ServiceError};
use guestpass_core::backend::{Backend, Filter, ListQuery, collections};
use guestpass_core::code::generate_code;
use guestpass_core::model::PartyId;
use std::fmt;
use std::sync::Arc;

/// Attempts made before giving up.
pub const DEFAULT_CODE_ATTEMPTS: usize = 5;

type Generator = Arc<dyn Fn() -> String + Send + Sync>;

/// Draws codes until one is not yet in use.
#[derive(Clone)]
pub struct CodeAllocator {
    attempts: usize,
    generator: Generator,
}

impl Default for CodeAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_ATTEMPTS)
    }
}

impl fmt::Debug for CodeAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeAllocator")
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl CodeAllocator {
    /// Allocator using the random generator; `attempts` is at least 1.
    #[must_use]
    pub fn new(attempts: usize) -> Self {
        Self {
            attempts: attempts.max(1),
            generator: Arc::new(generate_code),
        }
    }

    /// Replace the code source (deterministic tests).
    #[must_use]
    pub fn with_generator(mut self, generator: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    /// Maximum number of draws.
    #[must_use]
    pub const fn attempts(&self) -> usize {
        self.attempts
    }

    /// Allocate a join code no party uses yet.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::CodeSpaceExhausted`] if every draw collided,
    /// or the backend error of a failed lookup.
    pub async fn join_code(&self, backend: &dyn Backend) -> Result<String> {
        self.allocate(backend, collections::PARTIES, |code| Filter::eq("code", code))
            .await
    }

    /// Allocate an invitation code unused within `party`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::CodeSpaceExhausted`] if every draw collided,
    /// or the backend error of a failed lookup.
    pub async fn attendee_code(&self, backend: &dyn Backend, party: &PartyId) -> Result<String> {
        self.allocate(backend, collections::ATTENDEES, |code| {
            Filter::eq("partyId", party.as_str()).and(Filter::eq("code", code))
        })
        .await
    }

    async fn allocate(
        &self,
        backend: &dyn Backend,
        collection: &str,
        filter: impl Fn(&str) -> Filter,
    ) -> Result<String> {
        for attempt in 1..=self.attempts {
            let code = (self.generator)();
            let query = ListQuery::new().filter(filter(&code)).count_only();
            let taken = backend.get_list(collection, &query).await?.total_items > 0;
            if !taken {
                return Ok(code);
            }
            tracing::warn!(collection, attempt, "Generated code already in use, drawing again");
        }
        tracing::error!(collection, attempts = self.attempts, "Could not allocate a unique code");
        Err(ServiceError::CodeSpaceExhausted {
            attempts: self.attempts,
        })
    }
}
