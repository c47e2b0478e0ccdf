//! Business process runtime: the event-driven driver of a process
//!
//! The runtime subscribes one handler per relevant event name on the
//! [`EventBus`]. For each delivered event it:
//! 1. Starts a case (start-trigger events), or resolves an existing one
//! 2. Looks up transition candidates for (current step, event)
//! 3. Picks the first matching candidate via the [`StateMachine`]
//! 4. Executes the target step (or closes the case on `end`)
//! 5. Saves the case
//!
//! Events this runtime receives while it is already handling an event on
//! the same thread (a step publishing a follow-up for its own case) are
//! queued and handled, in order, after the current case is saved. A
//! queued event that carries a case is refreshed from the store first, so
//! it sees everything the step wrote. If handling fails, queued follow-ups
//! are dropped with it.
//!
//! Delivery from different threads is assumed to be serialized per case.
//! Nothing guards `current_step` against two threads racing on one case.

use crate::config::RuntimeConfig;
use crate::definition::{BusinessProcessDefinition, StartHandler};
use crate::event_bus::{EventBus, SubscriptionHandle};
use crate::provenance_tracker::{ProvenanceRecord, ProvenanceTracker};
use crate::state_machine::StateMachine;
use crate::step::Step;
use crate::store::CaseStore;
use casework_types::{Case, CaseId, Event, EventId, WorkflowError, WorkflowResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

/// Whether a runtime currently holds bus subscriptions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerState {
    Unregistered,
    Listening,
}

/// What handling one event did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A start trigger created the case and executed the start step
    Started { case_id: CaseId, step: String },
    /// The case moved to a new step and that step executed
    Transitioned {
        case_id: CaseId,
        from: String,
        to: String,
    },
    /// The case reached `end` and was closed
    Closed { case_id: CaseId, from: String },
    /// No transition is registered for (current step, event)
    NoTransition { case_id: CaseId, step: String },
    /// Transitions exist but none matched
    NoMatch { case_id: CaseId, step: String },
    /// The case is closed, not started, or belongs to another process
    Skipped { case_id: CaseId, reason: String },
    /// The event id was already applied
    Duplicate { case_id: Option<CaseId> },
    /// Raised while another event was being handled; queued until that
    /// event's case is saved
    Deferred { event_id: EventId },
}

impl Outcome {
    /// Whether the case was changed and saved
    pub fn changed_case(&self) -> bool {
        matches!(
            self,
            Self::Started { .. } | Self::Transitioned { .. } | Self::Closed { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum AppliedEvent {
    Start(EventId),
    Case(CaseId, EventId),
}

impl AppliedEvent {
    fn is_for(&self, case_id: &CaseId) -> bool {
        matches!(self, Self::Case(id, _) if id == case_id)
    }
}

/// Event ids already applied, oldest evicted first past `capacity`
#[derive(Debug)]
struct AppliedEvents {
    seen: HashSet<AppliedEvent>,
    order: VecDeque<AppliedEvent>,
    capacity: usize,
}

impl AppliedEvents {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn contains(&self, applied: &AppliedEvent) -> bool {
        self.seen.contains(applied)
    }

    fn insert(&mut self, applied: AppliedEvent) {
        if self.capacity == 0 || !self.seen.insert(applied.clone()) {
            return;
        }
        self.order.push_back(applied);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    /// Drop every id remembered for a case
    fn forget_case(&mut self, case_id: &CaseId) {
        self.order.retain(|a| !a.is_for(case_id));
        self.seen.retain(|a| !a.is_for(case_id));
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

struct RuntimeInner {
    definition: BusinessProcessDefinition,
    bus: EventBus,
    store: Arc<dyn CaseStore>,
    config: RuntimeConfig,
    state_machine: StateMachine,
    provenance: Mutex<ProvenanceTracker>,
    applied: Mutex<AppliedEvents>,
    /// Threads currently handling an event, with their queued follow-ups
    active: Mutex<HashMap<ThreadId, VecDeque<Event>>>,
}

/// Drives cases of one business process in response to bus events
pub struct BusinessProcessRuntime {
    inner: Arc<RuntimeInner>,
    /// `None` while unregistered
    subscriptions: Mutex<Option<Vec<SubscriptionHandle>>>,
}

impl BusinessProcessRuntime {
    pub fn new(
        definition: BusinessProcessDefinition,
        bus: EventBus,
        store: Arc<dyn CaseStore>,
        config: RuntimeConfig,
    ) -> Self {
        let provenance = ProvenanceTracker::with_case_limit(config.provenance_case_limit);
        let applied = AppliedEvents::new(config.dedupe_window);
        Self {
            inner: Arc::new(RuntimeInner {
                definition,
                bus,
                store,
                config,
                state_machine: StateMachine::new(),
                provenance: Mutex::new(provenance),
                applied: Mutex::new(applied),
                active: Mutex::new(HashMap::new()),
            }),
            subscriptions: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.definition.name()
    }

    pub fn definition(&self) -> &BusinessProcessDefinition {
        &self.inner.definition
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn listener_state(&self) -> ListenerState {
        match self.subscriptions.lock() {
            Ok(subs) if subs.is_some() => ListenerState::Listening,
            _ => ListenerState::Unregistered,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listener_state() == ListenerState::Listening
    }

    // ── Listener lifecycle ───────────────────────────────────────────

    /// Subscribe one handler per start-trigger and transition event.
    ///
    /// Calling this while already listening does nothing, so toggling
    /// never creates duplicate subscriptions.
    pub fn start_listening_for_events(&self) -> WorkflowResult<()> {
        let mut subs = self
            .subscriptions
            .lock()
            .map_err(|_| WorkflowError::LockPoisoned)?;
        if subs.is_some() {
            tracing::debug!(process = %self.name(), "Already listening");
            return Ok(());
        }

        let mut handles = Vec::new();
        for event_name in self.inner.definition.subscribed_events() {
            let weak = Arc::downgrade(&self.inner);
            let subscribed = self.inner.bus.subscribe(event_name, move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(event)?;
                }
                Ok(())
            });
            match subscribed {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in handles {
                        let _ = self.inner.bus.unsubscribe(handle);
                    }
                    return Err(WorkflowError::EventBus(err.to_string()));
                }
            }
        }

        tracing::info!(
            process = %self.name(),
            subscriptions = handles.len(),
            "Listening for events"
        );
        *subs = Some(handles);
        Ok(())
    }

    /// Release every subscription this runtime holds. Safe to call when
    /// already stopped.
    ///
    /// If the bus refuses an unsubscribe, the handles not yet released stay
    /// with the runtime, which remains listening so the call can be retried.
    pub fn stop_listening_for_events(&self) -> WorkflowResult<()> {
        let mut subs = self
            .subscriptions
            .lock()
            .map_err(|_| WorkflowError::LockPoisoned)?;
        let Some(mut handles) = subs.take() else {
            return Ok(());
        };

        let held = handles.len();
        while let Some(&handle) = handles.last() {
            if let Err(err) = self.inner.bus.unsubscribe(handle) {
                tracing::warn!(
                    process = %self.name(),
                    remaining = handles.len(),
                    error = %err,
                    "Could not release subscriptions"
                );
                *subs = Some(handles);
                return Err(WorkflowError::EventBus(err.to_string()));
            }
            handles.pop();
        }

        tracing::info!(
            process = %self.name(),
            released = held,
            "Stopped listening for events"
        );
        Ok(())
    }

    // ── Event handling ───────────────────────────────────────────────

    /// Apply one event directly, bypassing the bus. Follow-up events the
    /// steps raise are handled before this returns.
    pub fn handle_event(&self, event: &Event) -> WorkflowResult<Outcome> {
        self.inner.dispatch(event)
    }

    /// Audit trail recorded for a case
    pub fn provenance_for(&self, case_id: &CaseId) -> Vec<ProvenanceRecord> {
        self.inner
            .provenance
            .lock()
            .map(|p| p.events_for(case_id).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Steps a case has entered, in order
    pub fn path_for(&self, case_id: &CaseId) -> Vec<String> {
        self.inner
            .provenance
            .lock()
            .map(|p| p.path_for(case_id))
            .unwrap_or_default()
    }

    /// Number of cases with an audit trail held in memory
    pub fn tracked_cases(&self) -> usize {
        self.inner
            .provenance
            .lock()
            .map(|p| p.case_count())
            .unwrap_or(0)
    }

    /// Number of event ids held for deduplication
    pub fn remembered_events(&self) -> usize {
        self.inner.applied.lock().map(|a| a.len()).unwrap_or(0)
    }
}

impl Drop for BusinessProcessRuntime {
    fn drop(&mut self) {
        let _ = self.stop_listening_for_events();
    }
}

impl std::fmt::Debug for BusinessProcessRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusinessProcessRuntime")
            .field("process", &self.name())
            .field("state", &self.listener_state())
            .finish()
    }
}

impl RuntimeInner {
    /// Handle an event, or queue it when this thread is already handling one
    fn dispatch(&self, event: &Event) -> WorkflowResult<Outcome> {
        let thread = thread::current().id();
        {
            let mut active = self.active.lock().map_err(|_| WorkflowError::LockPoisoned)?;
            if let Some(queue) = active.get_mut(&thread) {
                tracing::debug!(
                    event = %event.name,
                    event_id = %event.id,
                    "Follow-up event queued until the current case is saved"
                );
                queue.push_back(event.clone());
                return Ok(Outcome::Deferred {
                    event_id: event.id.clone(),
                });
            }
            active.insert(thread, VecDeque::new());
        }

        let result = self.handle_with_follow_ups(event, thread);

        if let Ok(mut active) = self.active.lock() {
            if let Some(dropped) = active.remove(&thread) {
                if !dropped.is_empty() {
                    tracing::warn!(
                        dropped = dropped.len(),
                        "Follow-up events dropped after a handling failure"
                    );
                }
            }
        }
        result
    }

    fn handle_with_follow_ups(&self, event: &Event, thread: ThreadId) -> WorkflowResult<Outcome> {
        let outcome = self.handle_event(event)?;
        while let Some(follow_up) = self.next_follow_up(thread)? {
            let follow_up = self.refresh_case(follow_up)?;
            self.handle_event(&follow_up)?;
        }
        Ok(outcome)
    }

    fn next_follow_up(&self, thread: ThreadId) -> WorkflowResult<Option<Event>> {
        let mut active = self.active.lock().map_err(|_| WorkflowError::LockPoisoned)?;
        Ok(active.get_mut(&thread).and_then(VecDeque::pop_front))
    }

    /// Swap a case captured mid-step for the copy saved since
    fn refresh_case(&self, mut event: Event) -> WorkflowResult<Event> {
        if let Some(carried) = &event.case {
            if let Some(saved) = self.store.find(&carried.id).map_err(WorkflowError::Store)? {
                event.case = Some(saved);
            }
        }
        Ok(event)
    }

    fn handle_event(&self, event: &Event) -> WorkflowResult<Outcome> {
        match self.definition.start_handler(&event.name) {
            Some(handler) => self.start_case(handler, event),
            None => self.advance_case(event),
        }
    }

    fn start_case(&self, handler: &StartHandler, event: &Event) -> WorkflowResult<Outcome> {
        let applied = AppliedEvent::Start(event.id.clone());
        if self.already_applied(&applied)? {
            tracing::debug!(event = %event.name, event_id = %event.id, "Duplicate start event");
            return Ok(Outcome::Duplicate { case_id: None });
        }

        let mut case = handler(event).map_err(|source| WorkflowError::StartHandlerFailed {
            event: event.name.clone(),
            source,
        })?;

        let start = self.definition.start_step().to_string();
        let step = self.lookup_step(&start)?;
        case.set_current_step(start.clone());
        self.execute_step(step.as_ref(), &mut case)?;
        self.save(&case)?;
        self.mark_applied(applied)?;

        self.with_provenance(|p| {
            p.record_started(&case.id, &event.id, &start);
            p.record_step_executed(&case.id, &start);
        })?;

        tracing::info!(
            process = %self.definition.name(),
            case_id = %case.id,
            event = %event.name,
            step = %start,
            "Business process started"
        );

        Ok(Outcome::Started {
            case_id: case.id,
            step: start,
        })
    }

    fn advance_case(&self, event: &Event) -> WorkflowResult<Outcome> {
        let mut case = self.resolve_case(event)?;
        let case_id = case.id.clone();

        let applied = AppliedEvent::Case(case_id.clone(), event.id.clone());
        if self.already_applied(&applied)? {
            tracing::debug!(case_id = %case_id, event_id = %event.id, "Duplicate event");
            return Ok(Outcome::Duplicate {
                case_id: Some(case_id),
            });
        }

        if let Some(reason) = self.skip_reason(&case) {
            tracing::debug!(case_id = %case_id, event = %event.name, reason = %reason, "Event skipped");
            return Ok(Outcome::Skipped { case_id, reason });
        }
        let from = case.current_step().unwrap_or_default().to_string();

        let candidates = self.definition.candidates(&from, &event.name);
        if candidates.is_empty() {
            tracing::debug!(
                case_id = %case_id,
                step = %from,
                event = %event.name,
                "No transition registered"
            );
            return Ok(Outcome::NoTransition {
                case_id,
                step: from,
            });
        }

        let selection = self.state_machine.select(&candidates, event);
        if !selection.failures.is_empty() {
            self.with_provenance(|p| {
                for failure in &selection.failures {
                    p.record_condition_failed(&case_id, &event.id, &failure.condition, &failure.error);
                }
            })?;
        }

        let Some(candidate) = selection.candidate else {
            tracing::debug!(
                case_id = %case_id,
                step = %from,
                event = %event.name,
                "No transition condition matched"
            );
            self.with_provenance(|p| {
                p.record_ignored(&case_id, &event.id, "no transition condition matched")
            })?;
            return Ok(Outcome::NoMatch {
                case_id,
                step: from,
            });
        };

        let to = candidate.to_step.clone();
        let outcome = if candidate.closes_case() {
            case.close();
            Outcome::Closed {
                case_id: case_id.clone(),
                from: from.clone(),
            }
        } else {
            let step = self.lookup_step(&to)?;
            case.set_current_step(to.clone());
            self.execute_step(step.as_ref(), &mut case)?;
            Outcome::Transitioned {
                case_id: case_id.clone(),
                from: from.clone(),
                to: to.clone(),
            }
        };

        self.save(&case)?;
        if case.is_closed() {
            self.forget_case(&case_id)?;
        } else {
            self.mark_applied(applied)?;
        }

        self.with_provenance(|p| {
            p.record_transition(&case_id, &event.id, &event.name, &from, &to);
            if matches!(outcome, Outcome::Closed { .. }) {
                p.record_closed(&case_id, &event.id, &from);
            } else {
                p.record_step_executed(&case_id, &to);
            }
        })?;

        tracing::info!(
            process = %self.definition.name(),
            case_id = %case_id,
            event = %event.name,
            from = %from,
            to = %to,
            "Transition fired"
        );

        Ok(outcome)
    }

    /// Use the case carried by the event, or look it up by id
    fn resolve_case(&self, event: &Event) -> WorkflowResult<Case> {
        if let Some(case) = &event.case {
            return Ok(case.clone());
        }

        let key = &self.config.case_id_key;
        let case_id = event
            .case_id(key)
            .ok_or_else(|| WorkflowError::CaseNotResolved {
                event: event.name.clone(),
                reason: format!("payload has no '{}'", key),
            })?;

        self.store
            .find(&case_id)
            .map_err(WorkflowError::Store)?
            .ok_or_else(|| WorkflowError::CaseNotResolved {
                event: event.name.clone(),
                reason: format!("case {} not found", case_id),
            })
    }

    fn skip_reason(&self, case: &Case) -> Option<String> {
        if case.kind != self.definition.case_kind() {
            return Some(format!(
                "case kind '{}' is not handled by '{}'",
                case.kind,
                self.definition.name()
            ));
        }
        if case.is_closed() {
            return Some("case is closed".to_string());
        }
        if case.current_step().is_none() {
            return Some("process not started for case".to_string());
        }
        None
    }

    fn lookup_step(&self, name: &str) -> WorkflowResult<Arc<dyn Step>> {
        self.definition
            .step(name)
            .cloned()
            .ok_or_else(|| WorkflowError::StepNotFound(name.to_string()))
    }

    fn execute_step(&self, step: &dyn Step, case: &mut Case) -> WorkflowResult<()> {
        tracing::debug!(
            case_id = %case.id,
            step = %step.name(),
            kind = %step.kind(),
            "Executing step"
        );
        step.execute(case)
            .map_err(|source| WorkflowError::StepFailed {
                step: step.name().to_string(),
                case_id: case.id.clone(),
                source,
            })
    }

    fn save(&self, case: &Case) -> WorkflowResult<()> {
        self.store.save(case).map_err(WorkflowError::Store)
    }

    fn already_applied(&self, applied: &AppliedEvent) -> WorkflowResult<bool> {
        if !self.config.deduplicate_events {
            return Ok(false);
        }
        let set = self.applied.lock().map_err(|_| WorkflowError::LockPoisoned)?;
        Ok(set.contains(applied))
    }

    fn mark_applied(&self, applied: AppliedEvent) -> WorkflowResult<()> {
        if !self.config.deduplicate_events {
            return Ok(());
        }
        let mut set = self.applied.lock().map_err(|_| WorkflowError::LockPoisoned)?;
        set.insert(applied);
        Ok(())
    }

    /// A closed case ignores every later event, so its ids need not be kept
    fn forget_case(&self, case_id: &CaseId) -> WorkflowResult<()> {
        let mut applied = self.applied.lock().map_err(|_| WorkflowError::LockPoisoned)?;
        applied.forget_case(case_id);
        Ok(())
    }

    fn with_provenance(&self, f: impl FnOnce(&mut ProvenanceTracker)) -> WorkflowResult<()> {
        if !self.config.record_provenance {
            return Ok(());
        }
        let mut tracker = self
            .provenance
            .lock()
            .map_err(|_| WorkflowError::LockPoisoned)?;
        f(&mut tracker);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::BusinessProcessBuilder;
    use crate::step::{RecordingTaskService, StaffTask, SystemProcess};
    use crate::store::InMemoryCaseStore;
    use casework_types::CaseStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        bus: EventBus,
        store: Arc<InMemoryCaseStore>,
        tasks: Arc<RecordingTaskService>,
        runtime: BusinessProcessRuntime,
    }

    fn fixture(config: RuntimeConfig) -> Fixture {
        let bus = EventBus::new();
        let store = Arc::new(InMemoryCaseStore::new());
        let tasks = Arc::new(RecordingTaskService::new(["review_application"]));

        let definition = BusinessProcessBuilder::new("benefit", "benefit_case")
            .step(
                "intake",
                SystemProcess::new("intake", |case: &mut Case| {
                    case.set_attribute("intake_done", true);
                    Ok(())
                }),
            )
            .step(
                "review",
                StaffTask::new("review", "review_application", tasks.clone()).unwrap(),
            )
            .start("intake")
            .start_on("application_submitted", |event: &Event| {
                let id = event
                    .get("application_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("application_id missing"))?;
                Ok(Case::with_id(CaseId::new(id), "benefit_case"))
            })
            .transition("intake", "intake_completed", "review")
            .transition("review", "review_completed", "end")
            .build()
            .unwrap();

        let runtime = BusinessProcessRuntime::new(definition, bus.clone(), store.clone(), config);
        Fixture {
            bus,
            store,
            tasks,
            runtime,
        }
    }

    #[test]
    fn test_listener_lifecycle_is_idempotent() {
        let f = fixture(RuntimeConfig::default());
        assert_eq!(f.runtime.listener_state(), ListenerState::Unregistered);

        f.runtime.start_listening_for_events().unwrap();
        f.runtime.start_listening_for_events().unwrap();
        assert!(f.runtime.is_listening());
        assert_eq!(f.bus.total_subscriptions(), 3);
        assert_eq!(f.bus.subscriber_count("intake_completed"), 1);

        f.runtime.stop_listening_for_events().unwrap();
        f.runtime.stop_listening_for_events().unwrap();
        assert_eq!(f.runtime.listener_state(), ListenerState::Unregistered);
        assert_eq!(f.bus.total_subscriptions(), 0);

        f.runtime.start_listening_for_events().unwrap();
        assert_eq!(f.bus.total_subscriptions(), 3);
    }

    #[test]
    fn test_drop_releases_subscriptions() {
        let f = fixture(RuntimeConfig::default());
        f.runtime.start_listening_for_events().unwrap();
        let bus = f.bus.clone();
        drop(f);
        assert_eq!(bus.total_subscriptions(), 0);
    }

    #[test]
    fn test_full_lifecycle_through_bus() {
        let f = fixture(RuntimeConfig::default());
        f.runtime.start_listening_for_events().unwrap();

        f.bus
            .publish(&Event::new("application_submitted").with("application_id", "app-1"))
            .unwrap();
        let id = CaseId::new("app-1");
        let case = f.store.get(&id).unwrap().unwrap();
        assert_eq!(case.current_step(), Some("intake"));
        assert_eq!(case.attribute("intake_done"), Some(&serde_json::Value::Bool(true)));

        f.bus.publish(&Event::for_case("intake_completed", &id)).unwrap();
        let case = f.store.get(&id).unwrap().unwrap();
        assert_eq!(case.current_step(), Some("review"));
        assert_eq!(f.tasks.tasks_for(&id).len(), 1);

        f.bus.publish(&Event::for_case("review_completed", &id)).unwrap();
        let case = f.store.get(&id).unwrap().unwrap();
        assert_eq!(case.status, CaseStatus::Closed);
        assert_eq!(case.current_step(), Some("end"));

        assert_eq!(f.runtime.path_for(&id), vec!["intake", "review", "end"]);
    }

    #[test]
    fn test_start_handler_error_propagates() {
        let f = fixture(RuntimeConfig::default());
        let err = f
            .runtime
            .handle_event(&Event::new("application_submitted"))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::StartHandlerFailed { ref event, .. } if event == "application_submitted"));
        assert!(f.store.is_empty());
    }

    #[test]
    fn test_missing_case_id_is_error() {
        let f = fixture(RuntimeConfig::default());
        let err = f
            .runtime
            .handle_event(&Event::new("intake_completed"))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::CaseNotResolved { .. }));
    }

    #[test]
    fn test_unknown_case_is_error() {
        let f = fixture(RuntimeConfig::default());
        let err = f
            .runtime
            .handle_event(&Event::for_case("intake_completed", &CaseId::new("ghost")))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::CaseNotResolved { ref reason, .. } if reason.contains("ghost")));
    }

    #[test]
    fn test_custom_case_id_key() {
        let f = fixture(RuntimeConfig::default().with_case_id_key("application_id"));
        f.store
            .insert(Case::with_id(CaseId::new("app-9"), "benefit_case").at_step("intake"))
            .unwrap();
        let outcome = f
            .runtime
            .handle_event(&Event::new("intake_completed").with("application_id", "app-9"))
            .unwrap();
        assert!(matches!(outcome, Outcome::Transitioned { ref to, .. } if to == "review"));
    }

    #[test]
    fn test_preresolved_case_skips_lookup() {
        let f = fixture(RuntimeConfig::default());
        // Not in the store: resolution must come from the event itself
        let case = Case::with_id(CaseId::new("inline"), "benefit_case").at_step("intake");
        let outcome = f
            .runtime
            .handle_event(&Event::new("intake_completed").with_case(case))
            .unwrap();
        assert!(outcome.changed_case());
        let saved = f.store.get(&CaseId::new("inline")).unwrap().unwrap();
        assert_eq!(saved.current_step(), Some("review"));
    }

    #[test]
    fn test_closed_and_foreign_cases_skipped() {
        let f = fixture(RuntimeConfig::default());
        let mut closed = Case::with_id(CaseId::new("closed"), "benefit_case").at_step("intake");
        closed.close();
        f.store.insert(closed).unwrap();
        f.store
            .insert(Case::with_id(CaseId::new("other"), "tax_case").at_step("intake"))
            .unwrap();
        f.store
            .insert(Case::with_id(CaseId::new("fresh"), "benefit_case"))
            .unwrap();

        for id in ["closed", "other", "fresh"] {
            let outcome = f
                .runtime
                .handle_event(&Event::for_case("intake_completed", &CaseId::new(id)))
                .unwrap();
            assert!(matches!(outcome, Outcome::Skipped { .. }), "{id}: {outcome:?}");
        }
        assert!(f.tasks.tasks().is_empty());
    }

    #[test]
    fn test_duplicate_event_applied_once() {
        let f = fixture(RuntimeConfig::default());
        let id = CaseId::new("c-1");
        f.store
            .insert(Case::with_id(id.clone(), "benefit_case").at_step("intake"))
            .unwrap();

        let event = Event::for_case("intake_completed", &id);
        let first = f.runtime.handle_event(&event).unwrap();
        assert!(first.changed_case());

        // Rewind the case to prove the redelivery is not re-applied
        f.store
            .insert(Case::with_id(id.clone(), "benefit_case").at_step("intake"))
            .unwrap();
        let second = f.runtime.handle_event(&event).unwrap();
        assert_eq!(second, Outcome::Duplicate { case_id: Some(id.clone()) });
        assert_eq!(f.tasks.tasks_for(&id).len(), 1);
    }

    #[test]
    fn test_deduplication_can_be_disabled() {
        let f = fixture(RuntimeConfig::default().with_deduplication(false));
        let id = CaseId::new("c-1");
        f.store
            .insert(Case::with_id(id.clone(), "benefit_case").at_step("intake"))
            .unwrap();

        let event = Event::for_case("intake_completed", &id);
        f.runtime.handle_event(&event).unwrap();
        f.store
            .insert(Case::with_id(id.clone(), "benefit_case").at_step("intake"))
            .unwrap();
        f.runtime.handle_event(&event).unwrap();
        assert_eq!(f.tasks.tasks_for(&id).len(), 2);
    }

    #[test]
    fn test_new_event_id_reexecutes_step() {
        let f = fixture(RuntimeConfig::default());
        let id = CaseId::new("c-1");
        for delivery in ["first", "second"] {
            f.store
                .insert(Case::with_id(id.clone(), "benefit_case").at_step("intake"))
                .unwrap();
            let event = Event::for_case("intake_completed", &id).with_id(EventId::new(delivery));
            assert!(f.runtime.handle_event(&event).unwrap().changed_case());
        }
        assert_eq!(f.tasks.tasks_for(&id).len(), 2);
    }

    #[test]
    fn test_step_failure_leaves_case_unsaved() {
        let bus = EventBus::new();
        let store = Arc::new(InMemoryCaseStore::new());
        let definition = BusinessProcessBuilder::new("p", "k")
            .step("a", SystemProcess::new("a", |_c: &mut Case| Ok(())))
            .step("b", SystemProcess::new("b", |_c: &mut Case| anyhow::bail!("downstream unavailable")))
            .start("a")
            .transition("a", "go", "b")
            .build()
            .unwrap();
        let runtime = BusinessProcessRuntime::new(definition, bus.clone(), store.clone(), RuntimeConfig::default());
        runtime.start_listening_for_events().unwrap();

        let id = CaseId::new("c-1");
        store.insert(Case::with_id(id.clone(), "k").at_step("a")).unwrap();

        let err = bus.publish(&Event::for_case("go", &id)).unwrap_err();
        let crate::event_bus::EventBusError::HandlerFailed { source, .. } = err else {
            panic!("expected handler failure");
        };
        let workflow_err = source.downcast_ref::<WorkflowError>().unwrap();
        assert!(matches!(workflow_err, WorkflowError::StepFailed { step, .. } if step == "b"));

        let case = store.get(&id).unwrap().unwrap();
        assert_eq!(case.current_step(), Some("a"));
    }

    #[test]
    fn test_provenance_can_be_disabled() {
        let f = fixture(RuntimeConfig::default().with_provenance(false));
        f.runtime
            .handle_event(&Event::new("application_submitted").with("application_id", "app-1"))
            .unwrap();
        assert!(f.runtime.provenance_for(&CaseId::new("app-1")).is_empty());
    }

    fn counted(name: &str, calls: &Arc<AtomicUsize>) -> SystemProcess {
        let calls = Arc::clone(calls);
        SystemProcess::new(name, move |_c: &mut Case| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    /// `a -go-> b -auto-> c`, where `b` publishes `auto` for its own case
    fn self_advancing(bus: &EventBus, b_fails: bool) -> (BusinessProcessDefinition, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let b_calls = Arc::new(AtomicUsize::new(0));
        let c_calls = Arc::new(AtomicUsize::new(0));
        let publisher = bus.clone();
        let b_counter = Arc::clone(&b_calls);
        let definition = BusinessProcessBuilder::new("p", "k")
            .step("a", SystemProcess::new("a", |_c: &mut Case| Ok(())))
            .step(
                "b",
                SystemProcess::new("b", move |case: &mut Case| {
                    b_counter.fetch_add(1, Ordering::SeqCst);
                    case.set_attribute("checked", true);
                    publisher.publish(&Event::new("auto").with_case(case.clone()))?;
                    if b_fails {
                        anyhow::bail!("ledger write failed");
                    }
                    Ok(())
                }),
            )
            .step("c", counted("c", &c_calls))
            .start("a")
            .transition("a", "go", "b")
            .transition("b", "auto", "c")
            .build()
            .unwrap();
        (definition, b_calls, c_calls)
    }

    #[test]
    fn test_follow_up_from_step_applied_after_save() {
        let bus = EventBus::new();
        let store = Arc::new(InMemoryCaseStore::new());
        let (definition, b_calls, c_calls) = self_advancing(&bus, false);
        let runtime = BusinessProcessRuntime::new(definition, bus.clone(), store.clone(), RuntimeConfig::default());
        runtime.start_listening_for_events().unwrap();

        let id = CaseId::new("c-1");
        store.insert(Case::with_id(id.clone(), "k").at_step("a")).unwrap();
        bus.publish(&Event::for_case("go", &id)).unwrap();

        let case = store.get(&id).unwrap().unwrap();
        assert_eq!(case.current_step(), Some("c"));
        assert_eq!(case.attribute("checked"), Some(&serde_json::Value::Bool(true)));
        assert_eq!(runtime.path_for(&id), vec!["b", "c"]);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_follow_up_dropped_when_step_fails() {
        let bus = EventBus::new();
        let store = Arc::new(InMemoryCaseStore::new());
        let (definition, _b_calls, c_calls) = self_advancing(&bus, true);
        let runtime = BusinessProcessRuntime::new(definition, bus.clone(), store.clone(), RuntimeConfig::default());
        runtime.start_listening_for_events().unwrap();

        let id = CaseId::new("c-1");
        store.insert(Case::with_id(id.clone(), "k").at_step("a")).unwrap();
        assert!(bus.publish(&Event::for_case("go", &id)).is_err());

        assert_eq!(store.get(&id).unwrap().unwrap().current_step(), Some("a"));
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);

        // The thread is free again: the next event is handled, not queued
        let outcome = runtime.handle_event(&Event::for_case("unrelated", &id)).unwrap();
        assert!(matches!(outcome, Outcome::NoTransition { .. }));
    }

    #[test]
    fn test_failed_stop_keeps_subscriptions() {
        let f = fixture(RuntimeConfig::default());
        f.runtime.start_listening_for_events().unwrap();
        f.bus.poison_lock();

        let err = f.runtime.stop_listening_for_events().unwrap_err();
        assert!(matches!(err, WorkflowError::EventBus(_)));
        assert!(f.runtime.is_listening());
        assert!(f.runtime.stop_listening_for_events().is_err());
    }

    #[test]
    fn test_dedupe_window_forgets_oldest_event() {
        let f = fixture(RuntimeConfig::default().with_dedupe_window(1));
        let first = CaseId::new("c-1");
        let second = CaseId::new("c-2");
        for id in [&first, &second] {
            f.store
                .insert(Case::with_id(id.clone(), "benefit_case").at_step("intake"))
                .unwrap();
        }

        let event = Event::for_case("intake_completed", &first);
        f.runtime.handle_event(&event).unwrap();
        f.runtime
            .handle_event(&Event::for_case("intake_completed", &second))
            .unwrap();
        assert_eq!(f.runtime.remembered_events(), 1);

        f.store
            .insert(Case::with_id(first.clone(), "benefit_case").at_step("intake"))
            .unwrap();
        let again = f.runtime.handle_event(&event).unwrap();
        assert!(again.changed_case());
        assert_eq!(f.tasks.tasks_for(&first).len(), 2);
    }

    #[test]
    fn test_closing_case_forgets_its_events() {
        let f = fixture(RuntimeConfig::default());
        let id = CaseId::new("c-1");
        f.store
            .insert(Case::with_id(id.clone(), "benefit_case").at_step("intake"))
            .unwrap();

        f.runtime
            .handle_event(&Event::for_case("intake_completed", &id))
            .unwrap();
        assert_eq!(f.runtime.remembered_events(), 1);

        let close = Event::for_case("review_completed", &id);
        let outcome = f.runtime.handle_event(&close).unwrap();
        assert!(matches!(outcome, Outcome::Closed { .. }));
        assert_eq!(f.runtime.remembered_events(), 0);

        let redelivered = f.runtime.handle_event(&close).unwrap();
        assert!(matches!(redelivered, Outcome::Skipped { ref reason, .. } if reason == "case is closed"));
    }

    #[test]
    fn test_provenance_case_limit() {
        let f = fixture(RuntimeConfig::default().with_provenance_case_limit(1));
        for app in ["app-1", "app-2"] {
            f.runtime
                .handle_event(&Event::new("application_submitted").with("application_id", app))
                .unwrap();
        }
        assert_eq!(f.runtime.tracked_cases(), 1);
        assert!(f.runtime.provenance_for(&CaseId::new("app-1")).is_empty());
        assert_eq!(f.runtime.path_for(&CaseId::new("app-2")), vec!["intake"]);
    }
}
