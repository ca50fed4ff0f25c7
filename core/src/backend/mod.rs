//! Backend facade consumed by both apps.
//!
//! The hosted record store provides storage, filtered listing, realtime
//! change feeds and password authentication. The apps only ever talk to it
//! through the [`Backend`] and [`Authenticator`] traits defined here, so the
//! production HTTP adapter and the in-memory test double are interchangeable.
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures instead of using `async fn` so the traits
//! can be used as `Arc<dyn Backend>`; services hold the backend that way and
//! hand clones of it to background watch tasks.

mod error;
mod query;
mod subscription;

pub use error::{BackendError, Result};
pub use query::{DEFAULT_PER_PAGE, Filter, ListQuery, Page, Sort, guard_holds};
pub use subscription::{ALL_RECORDS, RecordAction, RecordEvent, Subscription, topic_matches};

use crate::model::Account;
use std::future::Future;
use std::pin::Pin;

/// A loosely-typed store record.
///
/// Every record carries a store-assigned `id` plus `created`/`updated`
/// timestamps; the remaining fields depend on the collection.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Boxed future returned by facade methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Collection names used by the apps.
pub mod collections {
    /// Events ("parties")
    pub const PARTIES: &str = "parties";
    /// Invitations
    pub const ATTENDEES: &str = "attendees";
    /// Redemption audit entries
    pub const SCANS: &str = "scans";
    /// Accounts (auth collection)
    pub const USERS: &str = "users";
}

/// Identifier of a record, if present and non-empty.
#[must_use]
pub fn record_id(record: &Record) -> Option<&str> {
    record
        .get("id")
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Collection-scoped CRUD, listing and realtime access to the record store.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// service of an app and by background watch tasks.
pub trait Backend: Send + Sync {
    /// Fetch one record by id.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotFound`] if no such record is visible.
    fn get_one<'a>(&'a self, collection: &'a str, id: &'a str) -> BackendFuture<'a, Record>;

    /// Fetch one page of records matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the filter is rejected.
    fn get_list<'a>(&'a self, collection: &'a str, query: &'a ListQuery)
    -> BackendFuture<'a, Page>;

    /// Create a record. The store assigns `id`, `created` and `updated`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the fields or the request fails.
    fn create<'a>(&'a self, collection: &'a str, fields: Record) -> BackendFuture<'a, Record>;

    /// Patch a record; fields absent from `fields` are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotFound`] if the record does not exist.
    fn update<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        fields: Record,
    ) -> BackendFuture<'a, Record>;

    /// Patch a record only if every field in `guard` currently holds the
    /// given value.
    ///
    /// Returns `Ok(None)` when the guard does not hold; the record is then
    /// left untouched. This is the compare-and-swap primitive used to make
    /// "first writer wins" redemption possible.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotFound`] if the record does not exist, or
    /// [`BackendError::Unsupported`] if the store cannot express the guard.
    fn update_where<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        guard: &'a Record,
        fields: Record,
    ) -> BackendFuture<'a, Option<Record>>;

    /// Delete a record.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotFound`] if the record does not exist.
    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> BackendFuture<'a, ()>;

    /// Subscribe to changes of `collection` matching `topic` (`*` or a
    /// record id).
    ///
    /// # Errors
    ///
    /// Returns an error if the realtime channel cannot be established.
    fn subscribe<'a>(&'a self, collection: &'a str, topic: &'a str)
    -> BackendFuture<'a, Subscription>;
}

impl dyn Backend {
    /// Scope subsequent calls to one collection.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let attendee = backend.collection("attendees").get_one("a1").await?;
    /// ```
    #[must_use]
    pub fn collection<'a>(&'a self, name: &'a str) -> CollectionRef<'a> {
        CollectionRef {
            backend: self,
            name,
        }
    }
}

/// Borrowed handle to one collection of a [`Backend`].
#[derive(Clone, Copy)]
pub struct CollectionRef<'a> {
    backend: &'a dyn Backend,
    name: &'a str,
}

impl<'a> CollectionRef<'a> {
    /// Collection name.
    #[must_use]
    pub const fn name(&self) -> &'a str {
        self.name
    }

    /// See [`Backend::get_one`].
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn get_one(&self, id: &str) -> Result<Record> {
        self.backend.get_one(self.name, id).await
    }

    /// See [`Backend::get_list`].
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn get_list(&self, query: &ListQuery) -> Result<Page> {
        self.backend.get_list(self.name, query).await
    }

    /// See [`Backend::create`].
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn create(&self, fields: Record) -> Result<Record> {
        self.backend.create(self.name, fields).await
    }

    /// See [`Backend::update`].
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn update(&self, id: &str, fields: Record) -> Result<Record> {
        self.backend.update(self.name, id, fields).await
    }

    /// See [`Backend::update_where`].
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn update_where(
        &self,
        id: &str,
        guard: &Record,
        fields: Record,
    ) -> Result<Option<Record>> {
        self.backend.update_where(self.name, id, guard, fields).await
    }

    /// See [`Backend::delete`].
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.backend.delete(self.name, id).await
    }

    /// See [`Backend::subscribe`].
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        self.backend.subscribe(self.name, topic).await
    }
}

/// Result of a successful password sign-in.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthGrant {
    /// Bearer token to present on subsequent requests
    pub token: String,
    /// The authenticated account
    pub account: Account,
}

/// Password authentication against the store's account collection.
///
/// Account provisioning and role assignment happen outside the apps; this
/// trait only exchanges credentials for a token.
pub trait Authenticator: Send + Sync {
    /// Exchange email and password for a token.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Unauthorized`] for wrong credentials.
    fn sign_in_with_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BackendFuture<'a, AuthGrant>;

    /// Exchange a still-valid token for a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Unauthorized`] if the token is no longer
    /// accepted.
    fn refresh<'a>(&'a self, token: &'a str) -> BackendFuture<'a, AuthGrant>;
}
