//! Fact engine: evaluates facts against a rule set, memoizing every result
//!
//! One engine is one evaluation session. Seeded inputs and every fact
//! computed during the session stay cached until the engine is dropped.
//! Cached facts are shared: every fact derived from a dependency points at
//! the same cached instance rather than a copy of it.

use crate::errors::{FactError, FactResult};
use crate::fact::Fact;
use crate::rule_set::{Rule, RuleSet};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Memoizing evaluator for one session
#[derive(Debug)]
pub struct FactEngine {
    rules: Arc<RuleSet>,
    cache: HashMap<String, Arc<Fact>>,
    /// Facts currently being computed, outermost first
    in_progress: Vec<String>,
}

impl FactEngine {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self {
            rules,
            cache: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    /// Seed input facts, builder style
    pub fn with_facts<I, K, V>(mut self, facts: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.set_facts(facts);
        self
    }

    /// Seed input facts, overwriting any cached fact of the same name.
    ///
    /// Derived facts already cached are not recomputed.
    pub fn set_facts<I, K, V>(&mut self, facts: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (name, value) in facts {
            self.set_fact(name, value);
        }
    }

    pub fn set_fact(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let fact = Fact::input(name, value);
        tracing::trace!(fact = %fact.name, "Input fact seeded");
        self.cache.insert(fact.name.clone(), Arc::new(fact));
    }

    /// Evaluate a fact, computing and caching its dependencies first.
    ///
    /// A fact with no rule and no seeded value evaluates to a null fact.
    pub fn evaluate(&mut self, name: &str) -> FactResult<Arc<Fact>> {
        if let Some(fact) = self.cache.get(name) {
            return Ok(Arc::clone(fact));
        }

        if let Some(start) = self.in_progress.iter().position(|n| n == name) {
            let mut chain = self.in_progress[start..].to_vec();
            chain.push(name.to_string());
            tracing::warn!(fact = %name, chain = ?chain, "Fact dependency cycle");
            return Err(FactError::CycleDetected { chain });
        }

        let rules = Arc::clone(&self.rules);
        let Some(rule) = rules.get(name) else {
            tracing::debug!(fact = %name, "No rule or input for fact; evaluating as null");
            let fact = Arc::new(Fact::unknown(name));
            self.cache.insert(name.to_string(), Arc::clone(&fact));
            return Ok(fact);
        };

        self.in_progress.push(name.to_string());
        let computed = self.compute(rule);
        self.in_progress.pop();

        let fact = Arc::new(computed?);
        self.cache.insert(name.to_string(), Arc::clone(&fact));
        Ok(fact)
    }

    fn compute(&mut self, rule: &Rule) -> FactResult<Fact> {
        let mut reasons = Vec::with_capacity(rule.dependencies().len());
        for dependency in rule.dependencies() {
            reasons.push(self.evaluate(dependency)?);
        }

        let args: Vec<Value> = reasons.iter().map(|r| r.value.clone()).collect();
        let value = rule
            .compute(&args)
            .map_err(|source| FactError::RuleFailed {
                fact: rule.name().to_string(),
                source,
            })?;

        tracing::debug!(
            fact = %rule.name(),
            dependencies = reasons.len(),
            "Fact derived"
        );
        Ok(Fact::derived(rule.name(), value, reasons))
    }

    /// A fact already in the session cache
    pub fn cached(&self, name: &str) -> Option<&Fact> {
        self.cache.get(name).map(Arc::as_ref)
    }

    /// Every cached fact, sorted by name
    pub fn facts(&self) -> Vec<&Fact> {
        let mut facts: Vec<&Fact> = self.cache.values().map(Arc::as_ref).collect();
        facts.sort_by(|a, b| a.name.cmp(&b.name));
        facts
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }
}
