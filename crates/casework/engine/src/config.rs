//! Configuration for the business process runtime

use casework_types::CASE_ID_KEY;
use serde::{Deserialize, Serialize};

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Payload key holding the case id
    pub case_id_key: String,
    /// Ignore an event id already applied to the same case
    pub deduplicate_events: bool,
    /// Keep a per-case audit trail in the provenance tracker
    pub record_provenance: bool,
    /// Most recent event ids remembered for deduplication; 0 remembers none
    pub dedupe_window: usize,
    /// Most cases whose audit trail is kept; the oldest case is dropped first
    pub provenance_case_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            case_id_key: CASE_ID_KEY.to_string(),
            deduplicate_events: true,
            record_provenance: true,
            dedupe_window: 10_000,
            provenance_case_limit: 1_000,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn with_case_id_key(mut self, key: impl Into<String>) -> Self {
        self.case_id_key = key.into();
        self
    }

    pub fn with_deduplication(mut self, enabled: bool) -> Self {
        self.deduplicate_events = enabled;
        self
    }

    pub fn with_provenance(mut self, enabled: bool) -> Self {
        self.record_provenance = enabled;
        self
    }

    pub fn with_dedupe_window(mut self, window: usize) -> Self {
        self.dedupe_window = window;
        self
    }

    pub fn with_provenance_case_limit(mut self, limit: usize) -> Self {
        self.provenance_case_limit = limit;
        self
    }
}
