//! Business Process Runtime for Casework
//!
//! The engine advances cases through named steps in response to domain
//! events. A process declares its steps, a start step, start triggers and
//! an ordered transition table; the runtime listens on an [`EventBus`],
//! picks at most one transition per event and executes the target step.
//!
//! # Architecture
//!
//! - [`EventBus`]: synchronous named publish/subscribe
//! - [`Step`]: unit of work executed on entering a step
//!   ([`StaffTask`], [`SystemProcess`], [`ApplicantTask`], [`ThirdPartyTask`])
//! - [`BusinessProcessBuilder`]: declares and validates a [`BusinessProcessDefinition`]
//! - [`StateMachine`]: ordered, first-match-wins transition selection
//! - [`BusinessProcessRuntime`]: drives cases in response to bus events
//! - [`ProcessRegistry`]: explicit owner of every runtime in an application
//! - [`ProvenanceTracker`]: per-case audit trail of what the runtime did
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use casework_engine::*;
//! use casework_types::{Case, CaseId, Event};
//!
//! let bus = EventBus::new();
//! let store = Arc::new(InMemoryCaseStore::new());
//!
//! let definition = BusinessProcessBuilder::new("benefit_review", "benefit")
//!     .step("review", SystemProcess::new("review", |_case| Ok(())))
//!     .step("decide", SystemProcess::new("decide", |_case| Ok(())))
//!     .start("review")
//!     .transition("review", "review_completed", "decide")
//!     .transition("decide", "decision_made", "end")
//!     .build()
//!     .unwrap();
//!
//! let runtime = BusinessProcessRuntime::new(
//!     definition,
//!     bus.clone(),
//!     store.clone(),
//!     RuntimeConfig::default(),
//! );
//! runtime.start_listening_for_events().unwrap();
//!
//! store.insert(Case::with_id(CaseId::new("c-1"), "benefit").at_step("review")).unwrap();
//! bus.publish(&Event::for_case("review_completed", &CaseId::new("c-1"))).unwrap();
//!
//! let case = store.get(&CaseId::new("c-1")).unwrap().unwrap();
//! assert_eq!(case.current_step(), Some("decide"));
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod definition;
pub mod event_bus;
pub mod provenance_tracker;
pub mod registry;
pub mod runtime;
pub mod state_machine;
pub mod step;
pub mod store;
pub mod transition;

// Re-export main types
pub use config::RuntimeConfig;
pub use definition::{BusinessProcessBuilder, BusinessProcessDefinition, StartHandler};
pub use event_bus::{EventBus, EventBusError, EventCallback, SubscriptionHandle};
pub use provenance_tracker::{ProvenanceEventType, ProvenanceRecord, ProvenanceTracker};
pub use registry::ProcessRegistry;
pub use runtime::{BusinessProcessRuntime, ListenerState, Outcome};
pub use state_machine::{ConditionFailure, Selection, StateMachine};
pub use step::{
    ApplicantTask, RecordingTaskService, StaffTask, Step, StepKind, SystemProcess, TaskRef,
    TaskService, ThirdPartyTask,
};
pub use store::{CaseStore, InMemoryCaseStore};
pub use transition::{Condition, TransitionCandidate};
