//! Uniform request timeout.

use guestpass_core::backend::{
    Backend, BackendError, BackendFuture, ListQuery, Page, Record, Result, Subscription,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Bound a backend call; an elapsed bound becomes [`BackendError::Timeout`].
///
/// # Errors
///
/// Returns the call's own error, or a timeout.
pub async fn bounded<T>(limit: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(BackendError::Timeout(limit)))
}

/// [`Backend`] decorator applying one timeout to every call.
///
/// For subscriptions the bound covers establishing the channel, not its
/// lifetime.
#[derive(Clone)]
pub struct TimeoutBackend {
    inner: Arc<dyn Backend>,
    limit: Duration,
}

impl TimeoutBackend {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Backend>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    /// Configured bound.
    #[must_use]
    pub const fn limit(&self) -> Duration {
        self.limit
    }
}

impl std::fmt::Debug for TimeoutBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutBackend")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl Backend for TimeoutBackend {
    fn get_one<'a>(&'a self, collection: &'a str, id: &'a str) -> BackendFuture<'a, Record> {
        Box::pin(bounded(self.limit, self.inner.get_one(collection, id)))
    }

    fn get_list<'a>(
        &'a self,
        collection: &'a str,
        query: &'a ListQuery,
    ) -> BackendFuture<'a, Page> {
        Box::pin(bounded(self.limit, self.inner.get_list(collection, query)))
    }

    fn create<'a>(&'a self, collection: &'a str, fields: Record) -> BackendFuture<'a, Record> {
        Box::pin(bounded(self.limit, self.inner.create(collection, fields)))
    }

    fn update<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        fields: Record,
    ) -> BackendFuture<'a, Record> {
        Box::pin(bounded(self.limit, self.inner.update(collection, id, fields)))
    }

    fn update_where<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        guard: &'a Record,
        fields: Record,
    ) -> BackendFuture<'a, Option<Record>> {
        Box::pin(bounded(
            self.limit,
            self.inner.update_where(collection, id, guard, fields),
        ))
    }

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(bounded(self.limit, self.inner.delete(collection, id)))
    }

    fn subscribe<'a>(
        &'a self,
        collection: &'a str,
        topic: &'a str,
    ) -> BackendFuture<'a, Subscription> {
        Box::pin(bounded(self.limit, self.inner.subscribe(collection, topic)))
    }
}
