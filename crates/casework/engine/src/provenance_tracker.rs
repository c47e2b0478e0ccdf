//! Provenance tracker: records what the runtime did to each case
//!
//! Every start, step execution, transition, condition failure and close
//! is appended to an ordered per-case chain that can be read back to
//! explain how a case reached its current step.
//!
//! A tracker built with [`ProvenanceTracker::with_case_limit`] keeps chains
//! for at most that many cases and drops the oldest case's chain first.

use casework_types::{CaseId, EventId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Tracks provenance records per case
#[derive(Clone, Debug, Default)]
pub struct ProvenanceTracker {
    events: HashMap<CaseId, Vec<ProvenanceRecord>>,
    /// Cases in the order their first record arrived
    order: VecDeque<CaseId>,
    /// `None` keeps every case
    case_limit: Option<usize>,
}

impl ProvenanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep chains for at most `limit` cases; 0 keeps none
    pub fn with_case_limit(limit: usize) -> Self {
        Self {
            case_limit: Some(limit),
            ..Self::default()
        }
    }

    /// Record a provenance event
    pub fn record(&mut self, case_id: &CaseId, record: ProvenanceRecord) {
        tracing::trace!(
            case_id = %case_id,
            event = %record.event_type,
            "Provenance recorded"
        );
        if let Some(chain) = self.events.get_mut(case_id) {
            chain.push(record);
            return;
        }
        if self.case_limit == Some(0) {
            return;
        }
        self.events.insert(case_id.clone(), vec![record]);
        self.order.push_back(case_id.clone());
        self.evict();
    }

    fn evict(&mut self) {
        let Some(limit) = self.case_limit else {
            return;
        };
        while self.order.len() > limit {
            if let Some(oldest) = self.order.pop_front() {
                tracing::debug!(case_id = %oldest, "Provenance evicted");
                self.events.remove(&oldest);
            }
        }
    }

    /// Record that a start trigger placed the case at its start step
    pub fn record_started(&mut self, case_id: &CaseId, event_id: &EventId, step: &str) {
        self.record(
            case_id,
            ProvenanceRecord::new(
                ProvenanceEventType::ProcessStarted {
                    step: step.to_string(),
                },
                format!("Process started at step '{}'", step),
            )
            .with_event(event_id.clone()),
        );
    }

    /// Record a step execution
    pub fn record_step_executed(&mut self, case_id: &CaseId, step: &str) {
        self.record(
            case_id,
            ProvenanceRecord::new(
                ProvenanceEventType::StepExecuted {
                    step: step.to_string(),
                },
                format!("Step '{}' executed", step),
            ),
        );
    }

    /// Record a fired transition
    pub fn record_transition(
        &mut self,
        case_id: &CaseId,
        event_id: &EventId,
        event_name: &str,
        from: &str,
        to: &str,
    ) {
        self.record(
            case_id,
            ProvenanceRecord::new(
                ProvenanceEventType::TransitionFired {
                    from: from.to_string(),
                    to: to.to_string(),
                    event_name: event_name.to_string(),
                },
                format!("Transition fired on '{}': {} -> {}", event_name, from, to),
            )
            .with_event(event_id.clone()),
        );
    }

    /// Record a condition whose predicate raised
    pub fn record_condition_failed(
        &mut self,
        case_id: &CaseId,
        event_id: &EventId,
        condition: &str,
        error: &str,
    ) {
        self.record(
            case_id,
            ProvenanceRecord::new(
                ProvenanceEventType::ConditionFailed {
                    condition: condition.to_string(),
                    error: error.to_string(),
                },
                format!("Condition '{}' failed: {}", condition, error),
            )
            .with_event(event_id.clone()),
        );
    }

    /// Record the case being closed
    pub fn record_closed(&mut self, case_id: &CaseId, event_id: &EventId, from: &str) {
        self.record(
            case_id,
            ProvenanceRecord::new(
                ProvenanceEventType::CaseClosed {
                    from: from.to_string(),
                },
                format!("Case closed from step '{}'", from),
            )
            .with_event(event_id.clone()),
        );
    }

    /// Record an event that was delivered but changed nothing
    pub fn record_ignored(&mut self, case_id: &CaseId, event_id: &EventId, reason: &str) {
        self.record(
            case_id,
            ProvenanceRecord::new(
                ProvenanceEventType::EventIgnored {
                    reason: reason.to_string(),
                },
                format!("Event ignored: {}", reason),
            )
            .with_event(event_id.clone()),
        );
    }

    // ── Query methods ────────────────────────────────────────────────

    /// All records for a case, oldest first
    pub fn events_for(&self, case_id: &CaseId) -> Vec<&ProvenanceRecord> {
        self.events
            .get(case_id)
            .map(|v| v.iter().collect())
            .unwrap_or_default()
    }

    pub fn event_count(&self, case_id: &CaseId) -> usize {
        self.events.get(case_id).map(|v| v.len()).unwrap_or(0)
    }

    /// The step path a case took, from transitions and starts
    pub fn path_for(&self, case_id: &CaseId) -> Vec<String> {
        self.events_for(case_id)
            .into_iter()
            .filter_map(|r| match &r.event_type {
                ProvenanceEventType::ProcessStarted { step } => Some(step.clone()),
                ProvenanceEventType::TransitionFired { to, .. } => Some(to.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drop the chain for a case
    pub fn clear(&mut self, case_id: &CaseId) {
        self.events.remove(case_id);
        self.order.retain(|id| id != case_id);
    }

    /// Number of cases with a chain
    pub fn case_count(&self) -> usize {
        self.events.len()
    }

    pub fn total_events(&self) -> usize {
        self.events.values().map(|v| v.len()).sum()
    }
}

/// A single provenance record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub event_type: ProvenanceEventType,
    pub description: String,
    /// The domain event that caused this record, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<EventId>,
    pub timestamp: DateTime<Utc>,
}

impl ProvenanceRecord {
    pub fn new(event_type: ProvenanceEventType, description: impl Into<String>) -> Self {
        Self {
            event_type,
            description: description.into(),
            caused_by: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_event(mut self, event_id: EventId) -> Self {
        self.caused_by = Some(event_id);
        self
    }
}

/// What a provenance record describes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvenanceEventType {
    ProcessStarted {
        step: String,
    },
    StepExecuted {
        step: String,
    },
    TransitionFired {
        from: String,
        to: String,
        event_name: String,
    },
    ConditionFailed {
        condition: String,
        error: String,
    },
    CaseClosed {
        from: String,
    },
    EventIgnored {
        reason: String,
    },
}

impl std::fmt::Display for ProvenanceEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessStarted { .. } => write!(f, "process_started"),
            Self::StepExecuted { .. } => write!(f, "step_executed"),
            Self::TransitionFired { .. } => write!(f, "transition_fired"),
            Self::ConditionFailed { .. } => write!(f, "condition_failed"),
            Self::CaseClosed { .. } => write!(f, "case_closed"),
            Self::EventIgnored { .. } => write!(f, "event_ignored"),
        }
    }
}
