//! Steps: the units of work a case enters
//!
//! Every step implements [`Step::execute`].
//!
//! # Re-execution
//!
//! The runtime skips an event whose id it has already applied to the same
//! case, but only while deduplication is enabled and the id is still inside
//! [`RuntimeConfig::dedupe_window`](crate::RuntimeConfig::dedupe_window).
//! A step can still run twice for one logical transition when:
//! - deduplication is turned off
//! - the id has been evicted from the window
//! - the publisher redelivers the same fact under a new event id
//!
//! Steps that create external records must be idempotent on their own terms,
//! for example by keying the record on the case id and step name.

use casework_types::{Case, CaseId, WorkflowError, WorkflowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// A named unit of work executed when a case enters it
pub trait Step: Send + Sync {
    /// Step name, used in logs
    fn name(&self) -> &str;

    /// Which variant this step is
    fn kind(&self) -> StepKind;

    /// Perform the step's side effect against the case
    fn execute(&self, case: &mut Case) -> anyhow::Result<()>;
}

/// Tag for the built-in step variants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    StaffTask,
    SystemProcess,
    ApplicantTask,
    ThirdPartyTask,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaffTask => write!(f, "staff_task"),
            Self::SystemProcess => write!(f, "system_process"),
            Self::ApplicantTask => write!(f, "applicant_task"),
            Self::ThirdPartyTask => write!(f, "third_party_task"),
        }
    }
}

// ── Task service ─────────────────────────────────────────────────────

/// Reference to a task created for staff
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRef {
    pub id: String,
    pub kind: String,
    pub case_id: CaseId,
    pub created_at: DateTime<Utc>,
}

impl TaskRef {
    pub fn new(kind: impl Into<String>, case_id: CaseId) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            case_id,
            created_at: Utc::now(),
        }
    }
}

/// Creates staff tasks for cases
pub trait TaskService: Send + Sync {
    /// Whether `task_kind` is a task this service can create
    fn supports(&self, task_kind: &str) -> bool;

    /// Create a task of `task_kind` for the case
    fn create_task(&self, task_kind: &str, case: &Case) -> anyhow::Result<TaskRef>;
}

/// Task service that keeps created tasks in memory
#[derive(Debug, Default)]
pub struct RecordingTaskService {
    kinds: HashSet<String>,
    tasks: Mutex<Vec<TaskRef>>,
}

impl RecordingTaskService {
    /// Create a service that supports the given task kinds
    pub fn new<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// All tasks created so far, in creation order
    pub fn tasks(&self) -> Vec<TaskRef> {
        self.tasks.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Tasks created for one case
    pub fn tasks_for(&self, case_id: &CaseId) -> Vec<TaskRef> {
        self.tasks()
            .into_iter()
            .filter(|t| &t.case_id == case_id)
            .collect()
    }
}

impl TaskService for RecordingTaskService {
    fn supports(&self, task_kind: &str) -> bool {
        self.kinds.contains(task_kind)
    }

    fn create_task(&self, task_kind: &str, case: &Case) -> anyhow::Result<TaskRef> {
        let task = TaskRef::new(task_kind, case.id.clone());
        self.tasks
            .lock()
            .map_err(|_| anyhow::anyhow!("task list lock poisoned"))?
            .push(task.clone());
        Ok(task)
    }
}

// ── Staff task ───────────────────────────────────────────────────────

/// Step that creates a task for staff to work
pub struct StaffTask {
    name: String,
    task_kind: String,
    task_service: Arc<dyn TaskService>,
}

impl StaffTask {
    /// Create a staff task step.
    ///
    /// Fails with [`WorkflowError::UnknownTaskKind`] when the service
    /// does not support `task_kind`.
    pub fn new(
        name: impl Into<String>,
        task_kind: impl Into<String>,
        task_service: Arc<dyn TaskService>,
    ) -> WorkflowResult<Self> {
        let task_kind = task_kind.into();
        if !task_service.supports(&task_kind) {
            return Err(WorkflowError::UnknownTaskKind(task_kind));
        }
        Ok(Self {
            name: name.into(),
            task_kind,
            task_service,
        })
    }

    pub fn task_kind(&self) -> &str {
        &self.task_kind
    }
}

impl Step for StaffTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::StaffTask
    }

    fn execute(&self, case: &mut Case) -> anyhow::Result<()> {
        let task = self.task_service.create_task(&self.task_kind, case)?;
        tracing::info!(
            step = %self.name,
            case_id = %case.id,
            task_id = %task.id,
            task_kind = %task.kind,
            "Staff task created"
        );
        Ok(())
    }
}

// ── System process ───────────────────────────────────────────────────

type SystemCallback = Arc<dyn Fn(&mut Case) -> anyhow::Result<()> + Send + Sync>;

/// Automated step running a callback (closing cases, emitting follow-up events, ...)
pub struct SystemProcess {
    name: String,
    callback: SystemCallback,
}

impl SystemProcess {
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&mut Case) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            callback: Arc::new(callback),
        }
    }
}

impl Step for SystemProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::SystemProcess
    }

    fn execute(&self, case: &mut Case) -> anyhow::Result<()> {
        tracing::debug!(step = %self.name, case_id = %case.id, "Running system process");
        (self.callback)(case)
    }
}

// ── Notification placeholders ────────────────────────────────────────

/// Step waiting on the applicant. Currently only logs a notification.
#[derive(Clone, Debug)]
pub struct ApplicantTask {
    name: String,
}

impl ApplicantTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Step for ApplicantTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::ApplicantTask
    }

    fn execute(&self, case: &mut Case) -> anyhow::Result<()> {
        tracing::info!(step = %self.name, case_id = %case.id, "Applicant action requested");
        Ok(())
    }
}

/// Step waiting on an outside party. Currently only logs a notification.
#[derive(Clone, Debug)]
pub struct ThirdPartyTask {
    name: String,
}

impl ThirdPartyTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Step for ThirdPartyTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::ThirdPartyTask
    }

    fn execute(&self, case: &mut Case) -> anyhow::Result<()> {
        tracing::info!(step = %self.name, case_id = %case.id, "Third-party action requested");
        Ok(())
    }
}
