//! Read-side views and live watches.
//!
//! Every view tolerates odd rows: a record that cannot be decoded is logged
//! and skipped, and missing optional fields are defaulted by the model, so
//! one bad row never empties a whole list.
//!
//! A `watch_*` variant subscribes to the underlying collection, runs the
//! query once, then re-runs it on every relevant change and hands each
//! fresh result to the caller's handler. The returned [`WatchHandle`] owns
//! the background task; cancelling or dropping it releases the
//! subscription. If the store ends the subscription, the handler receives a
//! final connectivity error and the watch stops.

use crate::error::Result;
use futures::StreamExt;
use futures::future::join_all;
use guestpass_core::backend::{
    ALL_RECORDS, Backend, BackendError, Filter, ListQuery, Record, RecordEvent, Sort, collections,
};
use guestpass_core::insights::AttendeeStats;
use guestpass_core::model::{
    AccountId, Attendee, Party, PartyId, RecordError, ScanRecord, UNTITLED,
};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Parties shown on the organizer home screen.
const PARTY_LIST_SIZE: u32 = 50;
/// Attendees shown for one party.
const ATTENDEE_LIST_SIZE: u32 = 100;
/// Entries shown in a guard's scan history.
const HISTORY_SIZE: u32 = 50;

/// Ordering of the organizer's party list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PartyOrder {
    /// Soonest date first
    Upcoming,
    /// Most recently created first
    #[default]
    Newest,
}

impl PartyOrder {
    fn sort(self) -> Sort {
        match self {
            Self::Upcoming => Sort::asc("date"),
            Self::Newest => Sort::desc("created"),
        }
    }
}

/// One line of a guard's scan history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanHistoryEntry {
    /// The audit entry
    pub scan: ScanRecord,
    /// Redeemed invitation
    pub attendee: Attendee,
    /// Title of the invitation's party, [`UNTITLED`] if it is gone
    pub party_title: String,
}

/// Handle to a running watch.
///
/// Dropping the handle stops the watch.
#[derive(Debug)]
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Stop the watch and release its subscription.
    pub fn cancel(self) {
        self.task.abort();
    }

    /// Whether the watch has ended (cancelled, or its channel closed).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Decode every record, skipping (and logging) the ones that do not fit.
fn decode_all<T>(
    collection: &str,
    records: &[Record],
    decode: impl Fn(&Record) -> std::result::Result<T, RecordError>,
) -> Vec<T> {
    records
        .iter()
        .filter_map(|record| match decode(record) {
            Ok(item) => Some(item),
            Err(error) => {
                tracing::warn!(collection, error = %error, "Skipping unreadable record");
                None
            },
        })
        .collect()
}

fn count(total: u64) -> usize {
    usize::try_from(total).unwrap_or(usize::MAX)
}

/// Query views over the record store.
#[derive(Clone)]
pub struct Views {
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Views {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Views").finish_non_exhaustive()
    }
}

impl Views {
    /// Views over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Parties created by `organizer`.
    ///
    /// # Errors
    ///
    /// Returns the converted backend error.
    pub async fn organizer_parties(
        &self,
        organizer: &AccountId,
        order: PartyOrder,
    ) -> Result<Vec<Party>> {
        let query = ListQuery::new()
            .per_page(PARTY_LIST_SIZE)
            .filter(Filter::eq("organizer", organizer.as_str()))
            .sort(order.sort());
        let page = self.backend.get_list(collections::PARTIES, &query).await?;
        Ok(decode_all(collections::PARTIES, &page.items, Party::from_record))
    }

    /// Invitations of one party, newest first.
    ///
    /// # Errors
    ///
    /// Returns the converted backend error.
    pub async fn party_attendees(&self, party: &PartyId) -> Result<Vec<Attendee>> {
        let query = ListQuery::new()
            .per_page(ATTENDEE_LIST_SIZE)
            .filter(Filter::eq("partyId", party.as_str()))
            .sort(Sort::desc("created"));
        let page = self.backend.get_list(collections::ATTENDEES, &query).await?;
        Ok(decode_all(collections::ATTENDEES, &page.items, Attendee::from_record))
    }

    /// Number of invitations of one party, without fetching them.
    ///
    /// # Errors
    ///
    /// Returns the converted backend error.
    pub async fn attendee_count(&self, party: &PartyId) -> Result<usize> {
        let query = ListQuery::new()
            .filter(Filter::eq("partyId", party.as_str()))
            .count_only();
        let page = self.backend.get_list(collections::ATTENDEES, &query).await?;
        Ok(count(page.total_items))
    }

    /// Attendance figures of one party, from two count queries.
    ///
    /// # Errors
    ///
    /// Returns the converted backend error.
    pub async fn party_stats(&self, party: &PartyId) -> Result<AttendeeStats> {
        let invited = Filter::eq("partyId", party.as_str());
        let total = ListQuery::new().filter(invited.clone()).count_only();
        let scanned = ListQuery::new()
            .filter(invited.and(Filter::eq("scanned", true)))
            .count_only();

        let total = self.backend.get_list(collections::ATTENDEES, &total).await?;
        let scanned = self.backend.get_list(collections::ATTENDEES, &scanned).await?;
        Ok(AttendeeStats::from_counts(
            count(total.total_items),
            count(scanned.total_items),
        ))
    }

    /// Latest redemptions performed by `scanner`, newest first.
    ///
    /// Entries whose invitation no longer exists are dropped.
    ///
    /// # Errors
    ///
    /// Returns the converted backend error of the history query. Failed
    /// party lookups only degrade the title.
    pub async fn scan_history(&self, scanner: &AccountId) -> Result<Vec<ScanHistoryEntry>> {
        let query = ListQuery::new()
            .per_page(HISTORY_SIZE)
            .filter(Filter::eq("scannedBy", scanner.as_str()))
            .sort(Sort::desc("scannedAt"))
            .expand("attendeeId");
        let page = self.backend.get_list(collections::SCANS, &query).await?;

        let mut resolved = Vec::with_capacity(page.items.len());
        for record in &page.items {
            let scan = match ScanRecord::from_record(record) {
                Ok(scan) => scan,
                Err(error) => {
                    tracing::warn!(error = %error, "Skipping unreadable scan record");
                    continue;
                },
            };
            let attendee = record
                .get("expand")
                .and_then(|expand| expand.get("attendeeId"))
                .and_then(Value::as_object)
                .and_then(|attendee| Attendee::from_record(attendee).ok());
            match attendee {
                Some(attendee) => resolved.push((scan, attendee)),
                None => tracing::debug!(scan = %scan.id, "Dropping scan of a missing invitation"),
            }
        }

        let titles = self.party_titles(resolved.iter().map(|(_, a)| &a.party_id)).await;
        Ok(resolved
            .into_iter()
            .map(|(scan, attendee)| {
                let party_title = titles
                    .get(&attendee.party_id)
                    .cloned()
                    .unwrap_or_else(|| UNTITLED.to_string());
                ScanHistoryEntry {
                    scan,
                    attendee,
                    party_title,
                }
            })
            .collect())
    }

    /// Titles of the given parties, fetched concurrently, once per party.
    async fn party_titles<'a>(
        &self,
        parties: impl Iterator<Item = &'a PartyId>,
    ) -> HashMap<PartyId, String> {
        let mut distinct: Vec<&PartyId> = parties.filter(|id| !id.is_empty()).collect();
        distinct.sort();
        distinct.dedup();

        let lookups = distinct.into_iter().map(|id| async move {
            match self.backend.get_one(collections::PARTIES, id.as_str()).await {
                Ok(record) => Party::from_record(&record)
                    .ok()
                    .map(|party| (id.clone(), party.title)),
                Err(error) => {
                    tracing::warn!(party = %id, error = %error, "Party title unavailable");
                    None
                },
            }
        });
        join_all(lookups).await.into_iter().flatten().collect()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Watches
    // ═══════════════════════════════════════════════════════════════════

    /// Live [`organizer_parties`](Self::organizer_parties).
    pub fn watch_organizer_parties(
        &self,
        organizer: &AccountId,
        order: PartyOrder,
        handler: impl FnMut(Result<Vec<Party>>) + Send + 'static,
    ) -> WatchHandle {
        let organizer = organizer.clone();
        let relevant = Filter::eq("organizer", organizer.as_str());
        self.watch(collections::PARTIES, relevant, handler, move |views| {
            let organizer = organizer.clone();
            async move { views.organizer_parties(&organizer, order).await }
        })
    }

    /// Live [`party_attendees`](Self::party_attendees).
    pub fn watch_party_attendees(
        &self,
        party: &PartyId,
        handler: impl FnMut(Result<Vec<Attendee>>) + Send + 'static,
    ) -> WatchHandle {
        let party = party.clone();
        let relevant = Filter::eq("partyId", party.as_str());
        self.watch(collections::ATTENDEES, relevant, handler, move |views| {
            let party = party.clone();
            async move { views.party_attendees(&party).await }
        })
    }

    /// Live [`attendee_count`](Self::attendee_count).
    pub fn watch_attendee_count(
        &self,
        party: &PartyId,
        handler: impl FnMut(Result<usize>) + Send + 'static,
    ) -> WatchHandle {
        let party = party.clone();
        let relevant = Filter::eq("partyId", party.as_str());
        self.watch(collections::ATTENDEES, relevant, handler, move |views| {
            let party = party.clone();
            async move { views.attendee_count(&party).await }
        })
    }

    /// Live [`party_stats`](Self::party_stats).
    pub fn watch_party_stats(
        &self,
        party: &PartyId,
        handler: impl FnMut(Result<AttendeeStats>) + Send + 'static,
    ) -> WatchHandle {
        let party = party.clone();
        let relevant = Filter::eq("partyId", party.as_str());
        self.watch(collections::ATTENDEES, relevant, handler, move |views| {
            let party = party.clone();
            async move { views.party_stats(&party).await }
        })
    }

    /// Live [`scan_history`](Self::scan_history).
    pub fn watch_scan_history(
        &self,
        scanner: &AccountId,
        handler: impl FnMut(Result<Vec<ScanHistoryEntry>>) + Send + 'static,
    ) -> WatchHandle {
        let scanner = scanner.clone();
        let relevant = Filter::eq("scannedBy", scanner.as_str());
        self.watch(collections::SCANS, relevant, handler, move |views| {
            let scanner = scanner.clone();
            async move { views.scan_history(&scanner).await }
        })
    }

    /// Subscribe first, then load, so no change between the two is missed.
    fn watch<T, H, Q, Fut>(
        &self,
        collection: &'static str,
        relevant: Filter,
        mut handler: H,
        query: Q,
    ) -> WatchHandle
    where
        T: Send + 'static,
        H: FnMut(Result<T>) + Send + 'static,
        Q: Fn(Self) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send,
    {
        let views = self.clone();
        let task = tokio::spawn(async move {
            let mut subscription = match views.backend.subscribe(collection, ALL_RECORDS).await {
                Ok(subscription) => subscription,
                Err(error) => {
                    tracing::warn!(collection, error = %error, "Watch could not subscribe");
                    handler(Err(error.into()));
                    return;
                },
            };
            tracing::debug!(collection, "Watch started");

            handler(query(views.clone()).await);
            while let Some(event) = subscription.next().await {
                if is_relevant(&relevant, &event) {
                    handler(query(views.clone()).await);
                }
            }
            tracing::warn!(collection, "Watch subscription ended");
            let closed = BackendError::Transport("realtime subscription closed".to_string());
            handler(Err(closed.into()));
        });
        WatchHandle { task }
    }
}

fn is_relevant(filter: &Filter, event: &RecordEvent) -> bool {
    filter.matches(&event.record)
}
