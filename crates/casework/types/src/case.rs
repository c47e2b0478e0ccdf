//! Cases: the persisted entities a business process advances
//!
//! A Case tracks where it is in its process (`current_step`) and
//! whether it is still open. The runtime never owns cases; it loads
//! them from a store, mutates them, and saves them back.

use crate::{Payload, END_STEP};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Case Identifier ──────────────────────────────────────────────────

/// Unique identifier for a case
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseId(pub String);

impl CaseId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CaseId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ── Case ─────────────────────────────────────────────────────────────

/// A case whose lifecycle is driven by a business process
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Case {
    /// Unique case identifier
    pub id: CaseId,
    /// The kind of case (e.g. "passport_application")
    pub kind: String,
    /// The step the case currently sits at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Open or closed
    pub status: CaseStatus,
    /// Case data readable by steps
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: Payload,
    /// When the case was created
    pub created_at: DateTime<Utc>,
    /// When the case was last changed
    pub updated_at: DateTime<Utc>,
}

impl Case {
    /// Create a new open case with a generated id
    pub fn new(kind: impl Into<String>) -> Self {
        Self::with_id(CaseId::generate(), kind)
    }

    /// Create a new open case with a known id
    pub fn with_id(id: CaseId, kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: kind.into(),
            current_step: None,
            status: CaseStatus::Open,
            attributes: Payload::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn at_step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(step.into());
        self
    }

    /// The step this case is at, if the process has started
    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    /// Move the case to a step
    pub fn set_current_step(&mut self, step: impl Into<String>) {
        self.current_step = Some(step.into());
        self.updated_at = Utc::now();
    }

    /// Close the case. The current step becomes [`END_STEP`].
    pub fn close(&mut self) {
        self.status = CaseStatus::Closed;
        self.current_step = Some(END_STEP.to_string());
        self.updated_at = Utc::now();
    }

    /// Reopen a closed case without moving it
    pub fn reopen(&mut self) {
        self.status = CaseStatus::Open;
        self.updated_at = Utc::now();
    }

    pub fn is_open(&self) -> bool {
        self.status == CaseStatus::Open
    }

    pub fn is_closed(&self) -> bool {
        self.status == CaseStatus::Closed
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
        self.updated_at = Utc::now();
    }
}

/// Lifecycle status of a case
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    #[default]
    Open,
    Closed,
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
