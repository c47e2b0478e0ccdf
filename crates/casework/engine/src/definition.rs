//! Business process definitions: the blueprint a runtime executes
//!
//! A definition is a graph where:
//! - Nodes are named [`Step`]s
//! - Edges are ordered [`TransitionCandidate`]s keyed by (step, event)
//!
//! Definitions are immutable once built. The builder validates every
//! step reference up front so a bad graph fails at startup, not when
//! the first event arrives.

use crate::step::Step;
use crate::transition::{Condition, TransitionCandidate};
use casework_types::{Case, Event, WorkflowError, WorkflowResult, END_STEP};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Resolves or constructs the case for a start-trigger event
pub type StartHandler = Arc<dyn Fn(&Event) -> anyhow::Result<Case> + Send + Sync>;

// ── Builder ──────────────────────────────────────────────────────────

/// Declares a business process
pub struct BusinessProcessBuilder {
    name: String,
    case_kind: String,
    start_step: Option<String>,
    steps: Vec<(String, Arc<dyn Step>)>,
    transitions: Vec<TransitionCandidate>,
    start_triggers: Vec<(String, StartHandler)>,
}

impl BusinessProcessBuilder {
    pub fn new(name: impl Into<String>, case_kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            case_kind: case_kind.into(),
            start_step: None,
            steps: Vec::new(),
            transitions: Vec::new(),
            start_triggers: Vec::new(),
        }
    }

    /// Set the step a case enters when the process starts
    pub fn start(mut self, step_name: impl Into<String>) -> Self {
        self.start_step = Some(step_name.into());
        self
    }

    /// Register a step under `name`, which must equal `step.name()`
    pub fn step(mut self, name: impl Into<String>, step: impl Step + 'static) -> Self {
        self.steps.push((name.into(), Arc::new(step)));
        self
    }

    /// Register a step that is already shared
    pub fn shared_step(mut self, name: impl Into<String>, step: Arc<dyn Step>) -> Self {
        self.steps.push((name.into(), step));
        self
    }

    /// Append an unconditional transition. Register it after any
    /// conditional transitions for the same (step, event) so it acts
    /// as the fallback.
    pub fn transition(
        mut self,
        from: impl Into<String>,
        event_name: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.transitions
            .push(TransitionCandidate::new(from, event_name, to));
        self
    }

    /// Append a transition guarded by a named predicate on the event
    pub fn transition_if<F>(
        mut self,
        from: impl Into<String>,
        event_name: impl Into<String>,
        to: impl Into<String>,
        condition_name: impl Into<String>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&Event) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.transitions.push(
            TransitionCandidate::new(from, event_name, to)
                .with_condition(Condition::new(condition_name, predicate)),
        );
        self
    }

    /// Append a prebuilt transition
    pub fn transition_candidate(mut self, candidate: TransitionCandidate) -> Self {
        self.transitions.push(candidate);
        self
    }

    /// Register how a case is resolved when `event_name` starts the process
    pub fn start_on<F>(mut self, event_name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Event) -> anyhow::Result<Case> + Send + Sync + 'static,
    {
        self.start_triggers
            .push((event_name.into(), Arc::new(handler)));
        self
    }

    /// Validate and freeze the definition
    pub fn build(self) -> WorkflowResult<BusinessProcessDefinition> {
        let mut steps: HashMap<String, Arc<dyn Step>> = HashMap::new();
        let mut step_order = Vec::new();
        for (name, step) in self.steps {
            if name == END_STEP {
                return Err(WorkflowError::ReservedStepName(name));
            }
            if steps.contains_key(&name) {
                return Err(WorkflowError::DuplicateStep(name));
            }
            if step.name() != name {
                return Err(WorkflowError::StepNameMismatch {
                    registered: name,
                    step: step.name().to_string(),
                });
            }
            step_order.push(name.clone());
            steps.insert(name, step);
        }

        let start_step = self
            .start_step
            .ok_or_else(|| WorkflowError::NoStartStep(self.name.clone()))?;
        if !steps.contains_key(&start_step) {
            return Err(WorkflowError::StepNotFound(start_step));
        }

        for t in &self.transitions {
            if !steps.contains_key(&t.from_step) {
                return Err(WorkflowError::UnknownTransitionSource {
                    from: t.from_step.clone(),
                    event: t.event_name.clone(),
                });
            }
            if t.to_step != END_STEP && !steps.contains_key(&t.to_step) {
                return Err(WorkflowError::UnknownTransitionTarget {
                    from: t.from_step.clone(),
                    event: t.event_name.clone(),
                    to: t.to_step.clone(),
                });
            }
        }

        let mut start_triggers = Vec::new();
        for (event_name, handler) in self.start_triggers {
            if event_name.trim().is_empty() {
                return Err(WorkflowError::EmptyStartEvent);
            }
            // Later registration for the same event replaces the earlier one
            start_triggers.retain(|(e, _): &(String, StartHandler)| e != &event_name);
            start_triggers.push((event_name, handler));
        }

        tracing::debug!(
            process = %self.name,
            steps = steps.len(),
            transitions = self.transitions.len(),
            start_triggers = start_triggers.len(),
            "Business process built"
        );

        Ok(BusinessProcessDefinition {
            name: self.name,
            case_kind: self.case_kind,
            start_step,
            steps,
            step_order,
            transitions: self.transitions,
            start_triggers,
        })
    }
}

// ── Definition ───────────────────────────────────────────────────────

/// A validated, immutable business process
pub struct BusinessProcessDefinition {
    name: String,
    case_kind: String,
    start_step: String,
    steps: HashMap<String, Arc<dyn Step>>,
    step_order: Vec<String>,
    transitions: Vec<TransitionCandidate>,
    start_triggers: Vec<(String, StartHandler)>,
}

impl BusinessProcessDefinition {
    pub fn builder(name: impl Into<String>, case_kind: impl Into<String>) -> BusinessProcessBuilder {
        BusinessProcessBuilder::new(name, case_kind)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn case_kind(&self) -> &str {
        &self.case_kind
    }

    pub fn start_step(&self) -> &str {
        &self.start_step
    }

    /// Get a step by name
    pub fn step(&self, name: &str) -> Option<&Arc<dyn Step>> {
        self.steps.get(name)
    }

    /// Step names in declaration order
    pub fn step_names(&self) -> &[String] {
        &self.step_order
    }

    /// All transitions in declaration order
    pub fn transitions(&self) -> &[TransitionCandidate] {
        &self.transitions
    }

    /// Candidates for `(from, event)`, in declaration order
    pub fn candidates(&self, from: &str, event_name: &str) -> Vec<&TransitionCandidate> {
        self.transitions
            .iter()
            .filter(|t| t.applies_to(from, event_name))
            .collect()
    }

    /// Start handler registered for an event, if any
    pub fn start_handler(&self, event_name: &str) -> Option<&StartHandler> {
        self.start_triggers
            .iter()
            .find(|(e, _)| e == event_name)
            .map(|(_, h)| h)
    }

    /// Event names that start this process
    pub fn start_events(&self) -> Vec<&str> {
        self.start_triggers.iter().map(|(e, _)| e.as_str()).collect()
    }

    /// Every event name the runtime must listen to: start triggers
    /// first, then transition events, without duplicates.
    pub fn subscribed_events(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.start_triggers
            .iter()
            .map(|(e, _)| e)
            .chain(self.transitions.iter().map(|t| &t.event_name))
            .filter(|e| seen.insert(e.as_str()))
            .cloned()
            .collect()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }
}

impl std::fmt::Debug for BusinessProcessDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusinessProcessDefinition")
            .field("name", &self.name)
            .field("case_kind", &self.case_kind)
            .field("start_step", &self.start_step)
            .field("steps", &self.step_order)
            .field("transitions", &self.transitions)
            .field("start_events", &self.start_events())
            .finish()
    }
}
