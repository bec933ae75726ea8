//! Event envelope routed by the bus.
//!
//! An event is immutable once built. Status events produced while
//! reconciling a command point back at it through `parent_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payload::{Action, Payload, PayloadKind};

/// Routing key for a payload: `Kind` or `Kind:action`.
#[must_use]
pub fn event_name(kind: PayloadKind, action: Option<Action>) -> String {
    match action {
        Some(action) => format!("{}:{}", kind.as_str(), action.as_str()),
        None => kind.as_str().to_string(),
    }
}

/// Typed message exchanged between producers, the bus and reconcilers.
///
/// `name` and `payloadKind` are written on the wire for consumers but
/// always recomputed from the payload when decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawEvent")]
pub struct Event {
    id: Uuid,
    #[serde(default)]
    parent_id: Option<Uuid>,
    name: String,
    payload: Payload,
    payload_kind: PayloadKind,
    #[serde(default)]
    error: Option<String>,
    created_at: DateTime<Utc>,
}

/// Decoded form of an event before its routing key is derived
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    id: Uuid,
    #[serde(default)]
    parent_id: Option<Uuid>,
    payload: Payload,
    #[serde(default)]
    error: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<RawEvent> for Event {
    fn from(raw: RawEvent) -> Self {
        let kind = raw.payload.kind();
        Self {
            id: raw.id,
            parent_id: raw.parent_id,
            name: event_name(kind, raw.payload.action()),
            payload: raw.payload,
            payload_kind: kind,
            error: raw.error,
            created_at: raw.created_at,
        }
    }
}

impl Event {
    /// Wrap a payload in a new root event
    #[must_use]
    pub fn new(payload: impl Into<Payload>) -> Self {
        let payload = payload.into();
        let kind = payload.kind();
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            name: event_name(kind, payload.action()),
            payload,
            payload_kind: kind,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Build an event caused by `self`
    #[must_use]
    pub fn child(&self, payload: impl Into<Payload>) -> Self {
        let mut event = Self::new(payload);
        event.parent_id = Some(self.id);
        event
    }

    /// Attach an error message
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Unique event id
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Id of the event that caused this one
    #[must_use]
    pub fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }

    /// Routing key
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Carried payload
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consume the event, keeping the payload
    #[must_use]
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Payload kind
    #[must_use]
    pub fn payload_kind(&self) -> PayloadKind {
        self.payload_kind
    }

    /// Error message, set on failure reports
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Creation time
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether a subscription key selects this event
    #[must_use]
    pub fn matches(&self, subscription: &str) -> bool {
        subscription == self.name || subscription == self.payload_kind.as_str()
    }
}
