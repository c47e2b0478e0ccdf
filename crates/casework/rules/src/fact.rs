//! Facts: named values that carry the facts they were derived from

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A named value plus the dependency facts that produced it.
///
/// Input facts and facts with no rule have no reasons. A derived fact's
/// reasons are its dependencies' facts in declared order, so the whole
/// derivation can be walked back to the inputs. Reasons are shared, so a
/// dependency used by several facts is held once however often it appears.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub name: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<Arc<Fact>>,
}

impl Fact {
    /// A seeded input fact
    pub fn input(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            reasons: Vec::new(),
        }
    }

    /// A fact computed by a rule from `reasons`
    pub fn derived<R>(
        name: impl Into<String>,
        value: impl Into<Value>,
        reasons: impl IntoIterator<Item = R>,
    ) -> Self
    where
        R: Into<Arc<Fact>>,
    {
        Self {
            name: name.into(),
            value: value.into(),
            reasons: reasons.into_iter().map(Into::into).collect(),
        }
    }

    /// A fact nothing is known about
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::input(name, Value::Null)
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Direct dependency by name
    pub fn reason(&self, name: &str) -> Option<&Fact> {
        self.reasons
            .iter()
            .find(|r| r.name == name)
            .map(Arc::as_ref)
    }

    /// Number of distinct facts in the derivation, counting a shared
    /// dependency once
    pub fn distinct_facts(&self) -> usize {
        fn visit(fact: &Fact, seen: &mut HashSet<*const Fact>) {
            for reason in &fact.reasons {
                if seen.insert(Arc::as_ptr(reason)) {
                    visit(reason, seen);
                }
            }
        }
        let mut seen = HashSet::new();
        visit(self, &mut seen);
        seen.len() + 1
    }

    /// Render the derivation tree, one fact per line, indented by depth.
    ///
    /// ```text
    /// age_over_65 = true
    ///   age = 71
    ///     date_of_birth = "1954-01-01"
    /// ```
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.write_tree(0, &mut out);
        out
    }

    fn write_tree(&self, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&self.to_string());
        out.push('\n');
        for reason in &self.reasons {
            reason.write_tree(depth + 1, out);
        }
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.value)
    }
}
