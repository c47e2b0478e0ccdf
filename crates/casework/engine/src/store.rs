//! Case store: where the runtime loads and saves cases
//!
//! Persistence mapping lives outside this crate. The runtime only needs
//! find-by-id and save; [`InMemoryCaseStore`] covers tests and demos.

use casework_types::{Case, CaseId, WorkflowError, WorkflowResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// Persistence collaborator for cases
pub trait CaseStore: Send + Sync {
    /// Look up a case by id
    fn find(&self, id: &CaseId) -> anyhow::Result<Option<Case>>;

    /// Persist the case (insert or update)
    fn save(&self, case: &Case) -> anyhow::Result<()>;
}

/// Case store backed by a map
#[derive(Debug, Default)]
pub struct InMemoryCaseStore {
    cases: RwLock<HashMap<CaseId, Case>>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a case
    pub fn insert(&self, case: Case) -> WorkflowResult<()> {
        let mut cases = self.cases.write().map_err(|_| WorkflowError::LockPoisoned)?;
        cases.insert(case.id.clone(), case);
        Ok(())
    }

    /// Fetch a copy of a case
    pub fn get(&self, id: &CaseId) -> WorkflowResult<Option<Case>> {
        let cases = self.cases.read().map_err(|_| WorkflowError::LockPoisoned)?;
        Ok(cases.get(id).cloned())
    }

    /// Number of stored cases
    pub fn len(&self) -> usize {
        self.cases.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CaseStore for InMemoryCaseStore {
    fn find(&self, id: &CaseId) -> anyhow::Result<Option<Case>> {
        Ok(self.get(id)?)
    }

    fn save(&self, case: &Case) -> anyhow::Result<()> {
        self.insert(case.clone())?;
        Ok(())
    }
}
