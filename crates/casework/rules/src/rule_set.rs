//! Rule sets: an explicit registry of how each derived fact is computed
//!
//! Each rule names the facts it depends on, in the order its compute
//! function receives their values. Dependencies are declared, never
//! discovered, so the graph is known before anything is evaluated.

use crate::errors::{FactError, FactResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Compute function for a derived fact; receives dependency values positionally
pub type RuleFn = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// One derived fact: its dependencies and how to compute it
#[derive(Clone)]
pub struct Rule {
    name: String,
    dependencies: Vec<String>,
    compute: RuleFn,
}

impl Rule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn compute(&self, args: &[Value]) -> anyhow::Result<Value> {
        (self.compute)(args)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// An immutable set of rules keyed by fact name
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    rules: HashMap<String, Rule>,
    order: Vec<String>,
}

impl RuleSet {
    pub fn builder() -> RuleSetBuilder {
        RuleSetBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Fact names with rules, in registration order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Builds a [`RuleSet`]
#[derive(Default)]
pub struct RuleSetBuilder {
    rules: Vec<Rule>,
}

impl RuleSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the rule for `name`, computed from `dependencies` in order
    pub fn rule<F>(mut self, name: impl Into<String>, dependencies: &[&str], compute: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            name: name.into(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            compute: Arc::new(compute),
        });
        self
    }

    pub fn build(self) -> FactResult<RuleSet> {
        let mut set = RuleSet::default();
        for rule in self.rules {
            if set.rules.contains_key(&rule.name) {
                return Err(FactError::DuplicateRule(rule.name));
            }
            set.order.push(rule.name.clone());
            set.rules.insert(rule.name.clone(), rule);
        }
        tracing::debug!(rules = set.len(), "Rule set built");
        Ok(set)
    }
}
