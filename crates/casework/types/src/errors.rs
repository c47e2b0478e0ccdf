//! Error types for business process definitions and the process runtime

use crate::CaseId;

/// Errors that can occur while building or running a business process
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("No start step defined for process '{0}'")]
    NoStartStep(String),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("Step name '{0}' is reserved")]
    ReservedStepName(String),

    #[error("Step registered as '{registered}' names itself '{step}'")]
    StepNameMismatch { registered: String, step: String },

    #[error("Transition {from} --{event}--> {to} targets an undeclared step")]
    UnknownTransitionTarget {
        from: String,
        event: String,
        to: String,
    },

    #[error("Transition on '{event}' leaves from undeclared step '{from}'")]
    UnknownTransitionSource { from: String, event: String },

    #[error("Start trigger event name must not be empty")]
    EmptyStartEvent,

    #[error("Task kind '{0}' is not supported by the task service")]
    UnknownTaskKind(String),

    #[error("Could not resolve case for event '{event}': {reason}")]
    CaseNotResolved { event: String, reason: String },

    #[error("Start handler for event '{event}' failed")]
    StartHandlerFailed {
        event: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Step '{step}' failed for case {case_id}")]
    StepFailed {
        step: String,
        case_id: CaseId,
        #[source]
        source: anyhow::Error,
    },

    #[error("Case store error")]
    Store(#[source] anyhow::Error),

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("Process not registered: {0}")]
    ProcessNotFound(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
