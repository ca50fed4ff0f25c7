//! QR code payloads.
//!
//! A QR code carries a compact JSON object tagged by `type`:
//!
//! ```text
//! {"type":"attendee","id":"a1","eventId":"e1","code":"K7Q2ZD"}
//! {"type":"event","id":"e1","code":"AB12CD"}
//! ```
//!
//! Earlier clients wrote `"party"` / `"partyId"`; both spellings are still
//! accepted on decode. Unknown fields are ignored so newer payloads stay
//! readable by older scanners.
//!
//! Decoding never panics: garbage in a QR code is an everyday occurrence
//! and is reported as [`MalformedPayload`].

use crate::model::{Attendee, Party};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Why scanned text is not a usable payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedPayload {
    /// Not a JSON object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// No `type` field.
    #[error("payload has no type")]
    MissingType,

    /// A `type` outside the known set.
    #[error("unknown payload type '{0}'")]
    UnknownType(String),

    /// No usable `id` field.
    #[error("payload has no id")]
    MissingId,

    /// Known type but fields of the wrong shape.
    #[error("invalid payload: {0}")]
    InvalidShape(String),
}

/// Identity carried by a QR code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QrPayload {
    /// A party, shared so guests can find it.
    #[serde(alias = "party")]
    Event {
        /// Party id
        id: String,
        /// Join code
        #[serde(default)]
        code: Option<String>,
    },
    /// An invitation, presented at the door.
    Attendee {
        /// Attendee id
        id: String,
        /// Party the invitation belongs to
        #[serde(default, rename = "eventId", alias = "partyId")]
        event_id: Option<String>,
        /// Invitation code
        #[serde(default)]
        code: Option<String>,
    },
}

const KNOWN_TYPES: [&str; 3] = ["event", "party", "attendee"];

impl QrPayload {
    /// Payload for an invitation.
    #[must_use]
    pub fn attendee(
        id: impl Into<String>,
        event_id: impl Into<String>,
        code: Option<String>,
    ) -> Self {
        Self::Attendee {
            id: id.into(),
            event_id: Some(event_id.into()),
            code,
        }
    }

    /// Payload for a party.
    #[must_use]
    pub fn event(id: impl Into<String>, code: Option<String>) -> Self {
        Self::Event {
            id: id.into(),
            code,
        }
    }

    /// Wire value of the `type` field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Event { .. } => "event",
            Self::Attendee { .. } => "attendee",
        }
    }

    /// Identifier of the referenced entity.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Event { id, .. } | Self::Attendee { id, .. } => id,
        }
    }
}

impl From<&Party> for QrPayload {
    fn from(party: &Party) -> Self {
        Self::event(
            party.id.as_str(),
            Some(party.join_code.clone()).filter(|c| !c.is_empty()),
        )
    }
}

impl From<&Attendee> for QrPayload {
    fn from(attendee: &Attendee) -> Self {
        Self::attendee(
            attendee.id.as_str(),
            attendee.party_id.as_str(),
            Some(attendee.code.clone()).filter(|c| !c.is_empty()),
        )
    }
}

/// Serialise a payload to QR text.
#[must_use]
pub fn encode(payload: &QrPayload) -> String {
    let mut object = Map::new();
    object.insert("type".to_string(), Value::from(payload.kind()));
    object.insert("id".to_string(), Value::from(payload.id()));
    let (event_id, code) = match payload {
        QrPayload::Event { code, .. } => (None, code),
        QrPayload::Attendee { event_id, code, .. } => (event_id.as_ref(), code),
    };
    if let Some(event_id) = event_id {
        object.insert("eventId".to_string(), Value::from(event_id.as_str()));
    }
    if let Some(code) = code {
        object.insert("code".to_string(), Value::from(code.as_str()));
    }
    Value::Object(object).to_string()
}

/// Parse QR text into a payload.
///
/// # Errors
///
/// Returns [`MalformedPayload`] if the text is not a JSON object, has no
/// recognised `type`, or lacks a non-empty `id`.
///
/// # Examples
///
/// ```
/// use guestpass_core::qr::{decode, MalformedPayload};
///
/// assert_eq!(decode("not json at all"), Err(MalformedPayload::NotAnObject));
/// assert!(decode(r#"{"type":"party","id":"e1","partyCode":"x"}"#).is_ok());
/// ```
pub fn decode(text: &str) -> Result<QrPayload, MalformedPayload> {
    let value: Value =
        serde_json::from_str(text.trim()).map_err(|_| MalformedPayload::NotAnObject)?;
    let Value::Object(object) = &value else {
        return Err(MalformedPayload::NotAnObject);
    };

    let kind = match object.get("type") {
        None | Some(Value::Null) => return Err(MalformedPayload::MissingType),
        Some(Value::String(kind)) => kind.as_str(),
        Some(other) => return Err(MalformedPayload::UnknownType(other.to_string())),
    };
    if !KNOWN_TYPES.contains(&kind) {
        return Err(MalformedPayload::UnknownType(kind.to_string()));
    }
    match object.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => {},
        _ => return Err(MalformedPayload::MissingId),
    }

    QrPayload::deserialize(value).map_err(|e| MalformedPayload::InvalidShape(e.to_string()))
}
