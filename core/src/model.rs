//! Domain entities and their mapping to store records.
//!
//! Records coming back from the store are loosely typed and, for older
//! rows, sometimes incomplete. Decoding therefore only insists on an `id`;
//! every other field falls back to a sensible default so one odd row never
//! breaks a whole list.

use crate::backend::{Record, record_id};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════
// ID Types
// ═══════════════════════════════════════════════════════════════════════

macro_rules! record_id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a store-assigned identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns `true` if the identifier is empty (unset relation).
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

record_id_type!(
    /// Identifier of a [`Party`].
    PartyId
);
record_id_type!(
    /// Identifier of an [`Attendee`].
    AttendeeId
);
record_id_type!(
    /// Identifier of a [`ScanRecord`].
    ScanId
);
record_id_type!(
    /// Identifier of an [`Account`].
    AccountId
);

/// Failure to interpret a store record as a domain entity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The record has no usable `id`.
    #[error("record has no id")]
    MissingId,

    /// A field is present but has the wrong type.
    #[error("field '{field}' is invalid: {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// What was wrong
        reason: String,
    },
}

// ═══════════════════════════════════════════════════════════════════════
// Field helpers
// ═══════════════════════════════════════════════════════════════════════

fn required_id(record: &Record) -> Result<String, RecordError> {
    record_id(record)
        .map(str::to_string)
        .ok_or(RecordError::MissingId)
}

/// Non-empty text value of `key`.
fn text(record: &Record, key: &str) -> Option<String> {
    match record.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn text_or_default(record: &Record, key: &str) -> String {
    text(record, key).unwrap_or_default()
}

fn flag(record: &Record, key: &'static str) -> Result<bool, RecordError> {
    match record.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(RecordError::InvalidField {
            field: key,
            reason: format!("expected boolean, got {other}"),
        }),
    }
}

fn timestamp(record: &Record, key: &str) -> Option<DateTime<Utc>> {
    record
        .get(key)
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
}

/// Parse a store timestamp.
///
/// Accepts RFC 3339 as well as the store's own `YYYY-MM-DD HH:MM:SS.sssZ`
/// layout. Empty or unparseable input yields `None`.
///
/// # Examples
///
/// ```
/// use guestpass_core::model::parse_timestamp;
///
/// assert!(parse_timestamp("2025-03-18 21:30:00.000Z").is_some());
/// assert!(parse_timestamp("2025-03-18T21:30:00Z").is_some());
/// assert!(parse_timestamp("").is_none());
/// ```
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.fZ")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Render a timestamp in the store's layout.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.3fZ").to_string()
}

fn insert(fields: &mut Record, key: &str, value: impl Into<Value>) {
    fields.insert(key.to_string(), value.into());
}

// ═══════════════════════════════════════════════════════════════════════
// Accounts
// ═══════════════════════════════════════════════════════════════════════

/// Role of an account, provisioned outside the apps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Creates events and registers guests
    #[serde(rename = "organisateur", alias = "organizer")]
    Organizer,
    /// Scans invitations at the door
    #[serde(rename = "vigile", alias = "guard")]
    Guard,
}

impl Role {
    /// Parse the stored role value.
    ///
    /// # Examples
    ///
    /// ```
    /// use guestpass_core::Role;
    ///
    /// assert_eq!(Role::parse("organisateur"), Some(Role::Organizer));
    /// assert_eq!(Role::parse("Guard"), Some(Role::Guard));
    /// assert_eq!(Role::parse("admin"), None);
    /// ```
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "organisateur" | "organizer" => Some(Self::Organizer),
            "vigile" | "guard" => Some(Self::Guard),
            _ => None,
        }
    }

    /// Value stored in the account record.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Organizer => "organisateur",
            Self::Guard => "vigile",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier
    pub id: AccountId,
    /// Login email
    pub email: String,
    /// Display name, may be empty
    pub name: String,
    /// Role; `None` when the stored value is missing or unknown
    pub role: Option<Role>,
}

impl Account {
    /// Decode an account record.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MissingId`] if the record has no id.
    pub fn from_record(record: &Record) -> Result<Self, RecordError> {
        Ok(Self {
            id: AccountId::new(required_id(record)?),
            email: text_or_default(record, "email"),
            name: text_or_default(record, "name"),
            role: text(record, "role").as_deref().and_then(Role::parse),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parties
// ═══════════════════════════════════════════════════════════════════════

/// Title shown for a party whose record has neither `title` nor `name`.
pub const UNTITLED: &str = "Untitled";

/// An organizer-created event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// Party identifier
    pub id: PartyId,
    /// Title, never empty
    pub title: String,
    /// Free-text description
    pub description: String,
    /// When the party takes place
    pub date: Option<DateTime<Utc>>,
    /// Where the party takes place
    pub location: String,
    /// Six-character code for manual entry; empty on legacy rows
    pub join_code: String,
    /// Creating organizer
    pub organizer: AccountId,
    /// Creation time assigned by the store
    pub created: Option<DateTime<Utc>>,
}

impl Party {
    /// Decode a party record.
    ///
    /// `title` falls back to `name` and then [`UNTITLED`]; `location` falls
    /// back to `link`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MissingId`] if the record has no id.
    pub fn from_record(record: &Record) -> Result<Self, RecordError> {
        Ok(Self {
            id: PartyId::new(required_id(record)?),
            title: text(record, "title")
                .or_else(|| text(record, "name"))
                .unwrap_or_else(|| UNTITLED.to_string()),
            description: text_or_default(record, "description"),
            date: timestamp(record, "date"),
            location: text(record, "location")
                .or_else(|| text(record, "link"))
                .unwrap_or_default(),
            join_code: text_or_default(record, "code"),
            organizer: AccountId::new(text_or_default(record, "organizer")),
            created: timestamp(record, "created"),
        })
    }
}

/// Fields of a party about to be created or rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewParty {
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Date
    pub date: DateTime<Utc>,
    /// Location
    pub location: String,
    /// Join code
    pub join_code: String,
    /// Creating organizer
    pub organizer: AccountId,
}

impl NewParty {
    /// Record fields for `create`.
    #[must_use]
    pub fn to_fields(&self) -> Record {
        let mut fields = Record::new();
        insert(&mut fields, "title", self.title.as_str());
        insert(&mut fields, "description", self.description.as_str());
        insert(&mut fields, "date", format_timestamp(self.date));
        insert(&mut fields, "location", self.location.as_str());
        insert(&mut fields, "code", self.join_code.as_str());
        insert(&mut fields, "organizer", self.organizer.as_str());
        fields
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Attendees
// ═══════════════════════════════════════════════════════════════════════

/// An invitation for one guest to one party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    /// Invitation identifier
    pub id: AttendeeId,
    /// Guest name
    pub name: String,
    /// Guest phone number
    pub phone: String,
    /// Party the invitation belongs to
    pub party_id: PartyId,
    /// Human-readable code, unique within the party
    pub code: String,
    /// Whether the invitation has been redeemed
    pub scanned: bool,
    /// Creation time assigned by the store
    pub created: Option<DateTime<Utc>>,
}

impl Attendee {
    /// Decode an attendee record.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MissingId`] if the record has no id, or
    /// [`RecordError::InvalidField`] if `scanned` is not a boolean.
    pub fn from_record(record: &Record) -> Result<Self, RecordError> {
        Ok(Self {
            id: AttendeeId::new(required_id(record)?),
            name: text_or_default(record, "name"),
            phone: text_or_default(record, "phone"),
            party_id: PartyId::new(text_or_default(record, "partyId")),
            code: text_or_default(record, "code"),
            scanned: flag(record, "scanned")?,
            created: timestamp(record, "created"),
        })
    }
}

/// Fields of an invitation about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttendee {
    /// Guest name
    pub name: String,
    /// Guest phone number
    pub phone: String,
    /// Party
    pub party_id: PartyId,
    /// Invitation code
    pub code: String,
}

impl NewAttendee {
    /// Record fields for `create`; new invitations start unscanned.
    #[must_use]
    pub fn to_fields(&self) -> Record {
        let mut fields = Record::new();
        insert(&mut fields, "name", self.name.as_str());
        insert(&mut fields, "phone", self.phone.as_str());
        insert(&mut fields, "partyId", self.party_id.as_str());
        insert(&mut fields, "code", self.code.as_str());
        insert(&mut fields, "scanned", false);
        fields
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Scan records
// ═══════════════════════════════════════════════════════════════════════

/// Append-only audit entry written on each redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Entry identifier
    pub id: ScanId,
    /// Redeemed invitation
    pub attendee_id: AttendeeId,
    /// Guard who scanned it
    pub scanned_by: AccountId,
    /// When it was scanned; falls back to the record's creation time
    pub scanned_at: Option<DateTime<Utc>>,
}

impl ScanRecord {
    /// Decode a scan record.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MissingId`] if the record has no id.
    pub fn from_record(record: &Record) -> Result<Self, RecordError> {
        Ok(Self {
            id: ScanId::new(required_id(record)?),
            attendee_id: AttendeeId::new(text_or_default(record, "attendeeId")),
            scanned_by: AccountId::new(text_or_default(record, "scannedBy")),
            scanned_at: timestamp(record, "scannedAt").or_else(|| timestamp(record, "created")),
        })
    }
}

/// Fields of an audit entry about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScanRecord {
    /// Redeemed invitation
    pub attendee_id: AttendeeId,
    /// Guard account
    pub scanned_by: AccountId,
    /// Scan time
    pub scanned_at: DateTime<Utc>,
}

impl NewScanRecord {
    /// Record fields for `create`.
    #[must_use]
    pub fn to_fields(&self) -> Record {
        let mut fields = Record::new();
        insert(&mut fields, "attendeeId", self.attendee_id.as_str());
        insert(&mut fields, "scannedBy", self.scanned_by.as_str());
        insert(&mut fields, "scannedAt", format_timestamp(self.scanned_at));
        fields
    }
}
