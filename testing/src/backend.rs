//! In-memory record store.
//!
//! [`InMemoryBackend`] implements the full [`Backend`] contract against a
//! `HashMap` of collections so services can be tested without a server:
//!
//! - Store-assigned `id`, `created` and `updated` fields
//! - Filtering, sorting, pagination, count-only queries and relation expand
//! - Conditional updates (`update_where`)
//! - Realtime events delivered to [`Subscription`]s
//! - Failure injection, lost replies, hung calls and read gates for race
//!   tests
//! - Dropped realtime connections
//! - A call log for asserting which writes happened

use chrono::{DateTime, Duration, Utc};
use futures::future;
use guestpass_core::backend::{
    BackendError, BackendFuture, ListQuery, Page, Record, RecordAction, RecordEvent, Result,
    Subscription, collections, guard_holds, topic_matches,
};
use guestpass_core::model::format_timestamp;
use guestpass_core::Backend;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Barrier, broadcast, watch};

/// Facade operation, used to target injected failures and to log calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `get_one`
    GetOne,
    /// `get_list`
    GetList,
    /// `create`
    Create,
    /// `update` and `update_where`
    Update,
    /// `delete`
    Delete,
    /// `subscribe`
    Subscribe,
}

impl Operation {
    /// Returns `true` for operations that change stored data.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

/// One facade call as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Operation
    pub operation: Operation,
    /// Target collection
    pub collection: String,
    /// Target record, when the operation addresses one
    pub id: Option<String>,
}

#[derive(Debug, Clone)]
enum Fault {
    Fail(BackendError),
    Hang,
    /// Apply the call, then fail as if the reply never arrived.
    LoseReply(BackendError),
}

/// What the caller hears once a call has been applied.
#[must_use]
struct Delivery(Option<BackendError>);

impl Delivery {
    fn deliver<T>(self, value: T) -> Result<T> {
        match self.0 {
            Some(error) => Err(error),
            None => Ok(value),
        }
    }
}

#[derive(Debug, Clone)]
struct FaultRule {
    operation: Operation,
    collection: String,
    fault: Fault,
    /// Remaining triggers; `None` means every call
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct Store {
    collections: HashMap<String, Vec<Record>>,
    sequence: u64,
    faults: Vec<FaultRule>,
    gates: HashMap<String, Arc<Barrier>>,
    calls: Vec<Call>,
}

impl Store {
    fn rows(&mut self, collection: &str) -> &mut Vec<Record> {
        self.collections.entry(collection.to_string()).or_default()
    }

    fn position(&self, collection: &str, id: &str) -> Option<usize> {
        self.collections
            .get(collection)?
            .iter()
            .position(|r| r.get("id").and_then(Value::as_str) == Some(id))
    }

    fn find(&self, collection: &str, id: &str) -> Option<&Record> {
        let index = self.position(collection, id)?;
        self.collections.get(collection)?.get(index)
    }

    fn take_fault(&mut self, operation: Operation, collection: &str) -> Option<Fault> {
        let index = self
            .faults
            .iter()
            .position(|rule| rule.operation == operation && rule.collection == collection)?;
        let rule = &mut self.faults[index];
        let fault = rule.fault.clone();
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.faults.remove(index);
            }
        }
        Some(fault)
    }
}

/// Base of the synthetic `created` clock.
fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_089)
}

/// Relation fields expanded by default, keyed by `(collection, field)`.
fn default_relations() -> HashMap<(String, String), String> {
    [
        (collections::SCANS, "attendeeId", collections::ATTENDEES),
        (collections::SCANS, "scannedBy", collections::USERS),
        (collections::ATTENDEES, "partyId", collections::PARTIES),
        (collections::PARTIES, "organizer", collections::USERS),
    ]
    .into_iter()
    .map(|(source, field, target)| ((source.to_string(), field.to_string()), target.to_string()))
    .collect()
}

/// In-memory implementation of [`Backend`].
///
/// Cloning is cheap and clones share the same data, so a test can keep a
/// handle for assertions while services own another.
///
/// # Example
///
/// ```
/// use guestpass_core::{Backend, ListQuery, Filter};
/// use guestpass_testing::InMemoryBackend;
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let backend = InMemoryBackend::new();
/// backend.seed("attendees", json!({"id": "a1", "partyId": "e1", "scanned": false}));
///
/// let page = backend
///     .get_list("attendees", &ListQuery::new().filter(Filter::eq("partyId", "e1")))
///     .await
///     .unwrap_or_default();
/// assert_eq!(page.total_items, 1);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    store: Arc<Mutex<Store>>,
    relations: Arc<HashMap<(String, String), String>>,
    events: broadcast::Sender<(String, RecordEvent)>,
    disconnects: Arc<watch::Sender<u64>>,
    active_subscriptions: Arc<AtomicUsize>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        let (disconnects, _) = watch::channel(0);
        let disconnects = Arc::new(disconnects);
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            relations: Arc::new(default_relations()),
            events,
            disconnects,
            active_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Store>> {
        self.store
            .lock()
            .map_err(|_| BackendError::Transport("in-memory store lock poisoned".to_string()))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Test setup
    // ═══════════════════════════════════════════════════════════════════

    /// Insert a record directly, bypassing faults and the call log.
    ///
    /// Missing `id`/`created`/`updated` fields are filled in. Non-object
    /// values are ignored.
    pub fn seed(&self, collection: &str, value: Value) -> Record {
        let Value::Object(fields) = value else {
            return Record::new();
        };
        let Ok(mut store) = self.lock() else {
            return Record::new();
        };
        let record = stamp(&mut store, collection, fields);
        store.rows(collection).push(record.clone());
        record
    }

    /// Fail the next `times` calls of `operation` on `collection`.
    pub fn fail_next(
        &self,
        operation: Operation,
        collection: &str,
        times: usize,
        error: BackendError,
    ) {
        self.add_fault(operation, collection, Fault::Fail(error), Some(times));
    }

    /// Fail every call of `operation` on `collection`.
    pub fn fail_always(&self, operation: Operation, collection: &str, error: BackendError) {
        self.add_fault(operation, collection, Fault::Fail(error), None);
    }

    /// Apply the next `times` calls of `operation` on `collection`, then
    /// fail them with `error` as if the reply had been lost in transit.
    pub fn lose_reply_next(
        &self,
        operation: Operation,
        collection: &str,
        times: usize,
        error: BackendError,
    ) {
        self.add_fault(operation, collection, Fault::LoseReply(error), Some(times));
    }

    /// End every open subscription stream, as a dropped realtime
    /// connection would.
    pub fn disconnect_subscribers(&self) {
        self.disconnects.send_modify(|generation| *generation += 1);
    }

    /// Make every call of `operation` on `collection` never complete.
    pub fn hang(&self, operation: Operation, collection: &str) {
        self.add_fault(operation, collection, Fault::Hang, None);
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        if let Ok(mut store) = self.lock() {
            store.faults.clear();
        }
    }

    fn add_fault(
        &self,
        operation: Operation,
        collection: &str,
        fault: Fault,
        remaining: Option<usize>,
    ) {
        if remaining == Some(0) {
            return;
        }
        if let Ok(mut store) = self.lock() {
            store.faults.push(FaultRule {
                operation,
                collection: collection.to_string(),
                fault,
                remaining,
            });
        }
    }

    /// Hold every `get_one` on `collection` at `barrier` until enough
    /// callers have arrived.
    ///
    /// Two concurrent workflows gated this way both read before either
    /// writes, which reproduces a check-then-act race deterministically.
    pub fn gate_reads(&self, collection: &str, barrier: Arc<Barrier>) {
        if let Ok(mut store) = self.lock() {
            store.gates.insert(collection.to_string(), barrier);
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Inspection
    // ═══════════════════════════════════════════════════════════════════

    /// Snapshot of one record.
    #[must_use]
    pub fn record(&self, collection: &str, id: &str) -> Option<Record> {
        self.lock().ok()?.find(collection, id).cloned()
    }

    /// Snapshot of a whole collection in insertion order.
    #[must_use]
    pub fn records(&self, collection: &str) -> Vec<Record> {
        self.lock()
            .ok()
            .and_then(|store| store.collections.get(collection).cloned())
            .unwrap_or_default()
    }

    /// Every call received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.lock().map(|store| store.calls.clone()).unwrap_or_default()
    }

    /// Calls that changed (or tried to change) stored data.
    #[must_use]
    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.operation.is_write())
            .collect()
    }

    /// Number of subscriptions not yet released.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.active_subscriptions.load(AtomicOrdering::SeqCst)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════

    /// Log the call and apply any injected fault.
    ///
    /// A lost reply is handed back as a [`Delivery`] for the caller to apply
    /// after doing the work.
    async fn enter(
        &self,
        operation: Operation,
        collection: &str,
        id: Option<&str>,
    ) -> Result<Delivery> {
        let (fault, gate) = {
            let mut store = self.lock()?;
            store.calls.push(Call {
                operation,
                collection: collection.to_string(),
                id: id.map(str::to_string),
            });
            let gate = if operation == Operation::GetOne {
                store.gates.get(collection).cloned()
            } else {
                None
            };
            (store.take_fault(operation, collection), gate)
        };

        if let Some(barrier) = gate {
            barrier.wait().await;
        }
        match fault {
            None => Ok(Delivery(None)),
            Some(Fault::LoseReply(error)) => Ok(Delivery(Some(error))),
            Some(Fault::Fail(error)) => Err(error),
            Some(Fault::Hang) => future::pending().await,
        }
    }

    fn publish(&self, collection: &str, action: RecordAction, record: &Record) {
        // No receivers is not an error.
        let _ = self.events.send((
            collection.to_string(),
            RecordEvent {
                action,
                record: record.clone(),
            },
        ));
    }

    fn expand(&self, store: &Store, collection: &str, record: &mut Record, fields: &[String]) {
        let mut expanded = Record::new();
        for field in fields {
            let Some(target) = self
                .relations
                .get(&(collection.to_string(), field.clone()))
            else {
                continue;
            };
            let Some(id) = record.get(field).and_then(Value::as_str) else {
                continue;
            };
            if let Some(related) = store.find(target, id) {
                expanded.insert(field.clone(), Value::Object(related.clone()));
            }
        }
        if !expanded.is_empty() {
            record.insert("expand".to_string(), Value::Object(expanded));
        }
    }

    fn list(&self, collection: &str, query: &ListQuery) -> Result<Page> {
        let store = self.lock()?;
        let mut matching: Vec<Record> = store
            .collections
            .get(collection)
            .map(|rows| {
                rows.iter()
                    .filter(|r| query.filter.as_ref().is_none_or(|f| f.matches(r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        matching.sort_by(|a, b| {
            query
                .sort
                .iter()
                .map(|key| {
                    let order = compare_values(a.get(&key.field), b.get(&key.field));
                    if key.descending { order.reverse() } else { order }
                })
                .find(|order| order.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        let per_page = query.per_page.max(1);
        let total_items = matching.len() as u64;
        let total_pages = total_items.div_ceil(u64::from(per_page));

        let items = if query.count_only {
            Vec::new()
        } else {
            let skip = (query.page.max(1) as usize - 1) * per_page as usize;
            matching
                .into_iter()
                .skip(skip)
                .take(per_page as usize)
                .map(|mut record| {
                    self.expand(&store, collection, &mut record, &query.expand);
                    record
                })
                .collect()
        };

        Ok(Page {
            page: query.page.max(1),
            per_page,
            total_items,
            total_pages,
            items,
        })
    }

    fn patch(
        &self,
        collection: &str,
        id: &str,
        guard: Option<&Record>,
        fields: Record,
    ) -> Result<Option<Record>> {
        let updated = {
            let mut store = self.lock()?;
            let index = store
                .position(collection, id)
                .ok_or_else(|| BackendError::not_found(collection, id))?;
            store.sequence += 1;
            let now = format_timestamp(epoch() + Duration::seconds(seq_offset(store.sequence)));
            let rows = store.rows(collection);
            let record = &mut rows[index];

            let current: &Record = record;
            let holds = guard.is_none_or(|guard| guard_holds(current, guard));
            if !holds {
                return Ok(None);
            }
            for (key, value) in fields {
                if key != "id" {
                    record.insert(key, value);
                }
            }
            record.insert("updated".to_string(), Value::from(now));
            record.clone()
        };
        self.publish(collection, RecordAction::Update, &updated);
        Ok(Some(updated))
    }
}

fn seq_offset(sequence: u64) -> i64 {
    i64::try_from(sequence).unwrap_or(i64::MAX / 2)
}

/// Fill in store-assigned fields.
fn stamp(store: &mut Store, collection: &str, mut fields: Record) -> Record {
    store.sequence += 1;
    let now = format_timestamp(epoch() + Duration::seconds(seq_offset(store.sequence)));
    let has_id = fields
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty());
    if !has_id {
        let prefix: String = collection.chars().take(3).collect();
        fields.insert(
            "id".to_string(),
            Value::from(format!("{prefix}{:012}", store.sequence)),
        );
    }
    fields
        .entry("created".to_string())
        .or_insert_with(|| Value::from(now.clone()));
    fields
        .entry("updated".to_string())
        .or_insert_with(|| Value::from(now));
    fields
}

/// Order JSON values the way the store sorts columns: nulls first, then
/// booleans, numbers and strings.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

impl Backend for InMemoryBackend {
    fn get_one<'a>(&'a self, collection: &'a str, id: &'a str) -> BackendFuture<'a, Record> {
        Box::pin(async move {
            let delivery = self.enter(Operation::GetOne, collection, Some(id)).await?;
            let record = self
                .lock()?
                .find(collection, id)
                .cloned()
                .ok_or_else(|| BackendError::not_found(collection, id))?;
            delivery.deliver(record)
        })
    }

    fn get_list<'a>(
        &'a self,
        collection: &'a str,
        query: &'a ListQuery,
    ) -> BackendFuture<'a, Page> {
        Box::pin(async move {
            let delivery = self.enter(Operation::GetList, collection, None).await?;
            let page = self.list(collection, query)?;
            delivery.deliver(page)
        })
    }

    fn create<'a>(&'a self, collection: &'a str, fields: Record) -> BackendFuture<'a, Record> {
        Box::pin(async move {
            let delivery = self.enter(Operation::Create, collection, None).await?;
            let record = {
                let mut store = self.lock()?;
                let mut fields = fields;
                fields.remove("id");
                let record = stamp(&mut store, collection, fields);
                store.rows(collection).push(record.clone());
                record
            };
            self.publish(collection, RecordAction::Create, &record);
            delivery.deliver(record)
        })
    }

    fn update<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        fields: Record,
    ) -> BackendFuture<'a, Record> {
        Box::pin(async move {
            let delivery = self.enter(Operation::Update, collection, Some(id)).await?;
            let record = self
                .patch(collection, id, None, fields)?
                .ok_or_else(|| BackendError::not_found(collection, id))?;
            delivery.deliver(record)
        })
    }

    fn update_where<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        guard: &'a Record,
        fields: Record,
    ) -> BackendFuture<'a, Option<Record>> {
        Box::pin(async move {
            let delivery = self.enter(Operation::Update, collection, Some(id)).await?;
            let claimed = self.patch(collection, id, Some(guard), fields)?;
            delivery.deliver(claimed)
        })
    }

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let delivery = self.enter(Operation::Delete, collection, Some(id)).await?;
            let removed = {
                let mut store = self.lock()?;
                let index = store
                    .position(collection, id)
                    .ok_or_else(|| BackendError::not_found(collection, id))?;
                store.rows(collection).remove(index)
            };
            self.publish(collection, RecordAction::Delete, &removed);
            delivery.deliver(())
        })
    }

    fn subscribe<'a>(
        &'a self,
        collection: &'a str,
        topic: &'a str,
    ) -> BackendFuture<'a, Subscription> {
        Box::pin(async move {
            let delivery = self.enter(Operation::Subscribe, collection, None).await?;

            let mut receiver = self.events.subscribe();
            let mut disconnected = self.disconnects.subscribe();
            disconnected.mark_unchanged();
            let wanted = collection.to_string();
            let filter_topic = topic.to_string();
            let events = async_stream::stream! {
                loop {
                    let received = tokio::select! {
                        _ = disconnected.changed() => None,
                        received = receiver.recv() => Some(received),
                    };
                    let Some(received) = received else {
                        break;
                    };
                    match received {
                        Ok((source, event)) => {
                            if source == wanted && topic_matches(&filter_topic, &event.record) {
                                yield event;
                            }
                        },
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "in-memory subscriber lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            };

            self.active_subscriptions.fetch_add(1, AtomicOrdering::SeqCst);
            let active = Arc::clone(&self.active_subscriptions);
            let subscription = Subscription::new(collection, topic, events, move || {
                active.fetch_sub(1, AtomicOrdering::SeqCst);
            });
            delivery.deliver(subscription)
        })
    }
}
