//! Transitions: (step, event) -> next step, optionally guarded
//!
//! Candidates for the same `(from_step, event_name)` key are kept in
//! declaration order. A candidate without a condition always matches,
//! so it belongs last as the fallback.

use casework_types::{Event, END_STEP};
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&Event) -> anyhow::Result<bool> + Send + Sync>;

/// A named guard on a transition
#[derive(Clone)]
pub struct Condition {
    name: String,
    predicate: Predicate,
}

impl Condition {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Event) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the predicate with the event
    pub fn evaluate(&self, event: &Event) -> anyhow::Result<bool> {
        (self.predicate)(event)
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condition").field("name", &self.name).finish()
    }
}

/// One entry of a process's transition table
#[derive(Clone, Debug)]
pub struct TransitionCandidate {
    pub from_step: String,
    pub event_name: String,
    pub to_step: String,
    pub condition: Option<Condition>,
}

impl TransitionCandidate {
    /// Unconditional transition
    pub fn new(
        from_step: impl Into<String>,
        event_name: impl Into<String>,
        to_step: impl Into<String>,
    ) -> Self {
        Self {
            from_step: from_step.into(),
            event_name: event_name.into(),
            to_step: to_step.into(),
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Whether this candidate is keyed by `(from, event)`
    pub fn applies_to(&self, from: &str, event: &str) -> bool {
        self.from_step == from && self.event_name == event
    }

    pub fn is_unconditional(&self) -> bool {
        self.condition.is_none()
    }

    /// Whether taking this transition closes the case
    pub fn closes_case(&self) -> bool {
        self.to_step == END_STEP
    }

    pub fn condition_name(&self) -> Option<&str> {
        self.condition.as_ref().map(Condition::name)
    }
}
