//! Domain events: the only thing that moves a case
//!
//! An event is a name plus a JSON payload. Transition conditions read
//! event-specific keys from the payload; the runtime reads the case id
//! (or an already-resolved case) from it.

use crate::{Case, CaseId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event payload: a JSON object
pub type Payload = serde_json::Map<String, Value>;

/// Payload key conventionally holding the case identifier
pub const CASE_ID_KEY: &str = "case_id";

/// Unique identifier for a published event
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named domain event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Identifier used to recognise redeliveries
    pub id: EventId,
    /// Event name subscribers register for
    pub name: String,
    /// Event data
    #[serde(default)]
    pub payload: Payload,
    /// A case the publisher already holds, to skip the store lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case: Option<Case>,
    /// When the event was created
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    /// Create an event with an empty payload
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EventId::generate(),
            name: name.into(),
            payload: Payload::new(),
            case: None,
            occurred_at: Utc::now(),
        }
    }

    /// Create an event addressed to a case by id
    pub fn for_case(name: impl Into<String>, case_id: &CaseId) -> Self {
        Self::new(name).with(CASE_ID_KEY, case_id.as_str())
    }

    /// Add a payload entry
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Replace the whole payload
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Attach an already-resolved case
    pub fn with_case(mut self, case: Case) -> Self {
        self.case = Some(case);
        self
    }

    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = id;
        self
    }

    /// Read a payload entry
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Read the case id stored under `key`. Strings and integers are accepted.
    pub fn case_id(&self, key: &str) -> Option<CaseId> {
        match self.payload.get(key)? {
            Value::String(s) if !s.is_empty() => Some(CaseId::new(s.as_str())),
            Value::Number(n) => Some(CaseId::new(n.to_string())),
            _ => None,
        }
    }
}
