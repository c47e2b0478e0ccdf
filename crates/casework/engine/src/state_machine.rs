//! State machine: picks the transition an event fires
//!
//! Candidates are evaluated strictly in declaration order and the first
//! match wins, so at most one transition applies per event. A condition
//! whose predicate fails is logged and treated as a non-match; it never
//! stops evaluation of the remaining candidates.

use crate::transition::TransitionCandidate;
use casework_types::Event;
use serde::{Deserialize, Serialize};

/// A condition whose predicate returned an error
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionFailure {
    /// Name of the failed condition
    pub condition: String,
    /// Target of the candidate that was skipped
    pub to_step: String,
    /// Rendered predicate error
    pub error: String,
}

/// Result of evaluating a candidate list
#[derive(Debug)]
pub struct Selection<'a> {
    /// The winning candidate, if any matched
    pub candidate: Option<&'a TransitionCandidate>,
    /// Conditions that failed before (or without) a match
    pub failures: Vec<ConditionFailure>,
}

impl Selection<'_> {
    pub fn is_match(&self) -> bool {
        self.candidate.is_some()
    }
}

/// Ordered, first-match-wins transition selection
#[derive(Clone, Debug, Default)]
pub struct StateMachine;

impl StateMachine {
    pub fn new() -> Self {
        Self
    }

    /// Choose the first candidate whose condition is absent or true.
    pub fn select<'a>(
        &self,
        candidates: &[&'a TransitionCandidate],
        event: &Event,
    ) -> Selection<'a> {
        let mut failures = Vec::new();

        for &candidate in candidates {
            let Some(condition) = &candidate.condition else {
                return Selection {
                    candidate: Some(candidate),
                    failures,
                };
            };

            match condition.evaluate(event) {
                Ok(true) => {
                    return Selection {
                        candidate: Some(candidate),
                        failures,
                    };
                }
                Ok(false) => {
                    tracing::trace!(
                        condition = %condition.name(),
                        to = %candidate.to_step,
                        "Condition not met"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        condition = %condition.name(),
                        event = %event.name,
                        to = %candidate.to_step,
                        error = %err,
                        "Transition condition failed; treating as non-match"
                    );
                    failures.push(ConditionFailure {
                        condition: condition.name().to_string(),
                        to_step: candidate.to_step.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        Selection {
            candidate: None,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transition::Condition;

    fn x_equals(n: i64) -> Condition {
        Condition::new(format!("x_is_{n}"), move |e: &Event| {
            Ok(e.get("x").and_then(|v| v.as_i64()) == Some(n))
        })
    }

    fn table() -> Vec<TransitionCandidate> {
        vec![
            TransitionCandidate::new("a", "evt", "b").with_condition(x_equals(1)),
            TransitionCandidate::new("a", "evt", "c"),
        ]
    }

    #[test]
    fn test_first_truthy_condition_wins() {
        let table = table();
        let candidates: Vec<_> = table.iter().collect();
        let sm = StateMachine::new();

        let selection = sm.select(&candidates, &Event::new("evt").with("x", 1));
        assert_eq!(selection.candidate.unwrap().to_step, "b");
        assert!(selection.failures.is_empty());
    }

    #[test]
    fn test_fallback_when_condition_false() {
        let table = table();
        let candidates: Vec<_> = table.iter().collect();
        let selection = StateMachine::new().select(&candidates, &Event::new("evt").with("x", 2));
        assert_eq!(selection.candidate.unwrap().to_step, "c");
    }

    #[test]
    fn test_no_match_without_fallback() {
        let only = [TransitionCandidate::new("a", "evt", "b").with_condition(x_equals(1))];
        let candidates: Vec<_> = only.iter().collect();
        let selection = StateMachine::new().select(&candidates, &Event::new("evt"));
        assert!(!selection.is_match());
    }

    #[test]
    fn test_empty_candidates() {
        let selection = StateMachine::new().select(&[], &Event::new("evt"));
        assert!(!selection.is_match());
        assert!(selection.failures.is_empty());
    }

    #[test]
    fn test_failing_condition_skipped() {
        let table = [
            TransitionCandidate::new("a", "evt", "b")
                .with_condition(Condition::new("explodes", |_e: &Event| anyhow::bail!("boom"))),
            TransitionCandidate::new("a", "evt", "c").with_condition(x_equals(5)),
            TransitionCandidate::new("a", "evt", "d"),
        ];
        let candidates: Vec<_> = table.iter().collect();
        let selection = StateMachine::new().select(&candidates, &Event::new("evt").with("x", 5));

        assert_eq!(selection.candidate.unwrap().to_step, "c");
        assert_eq!(
            selection.failures,
            vec![ConditionFailure {
                condition: "explodes".into(),
                to_step: "b".into(),
                error: "boom".into(),
            }]
        );
    }

    #[test]
    fn test_later_conditions_not_evaluated_after_match() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let table = [
            TransitionCandidate::new("a", "evt", "b"),
            TransitionCandidate::new("a", "evt", "c").with_condition(Condition::new(
                "counted",
                move |_e: &Event| {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                },
            )),
        ];
        let candidates: Vec<_> = table.iter().collect();
        let selection = StateMachine::new().select(&candidates, &Event::new("evt"));

        assert_eq!(selection.candidate.unwrap().to_step, "b");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
