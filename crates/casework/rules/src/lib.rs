//! Explainable eligibility facts for Casework
//!
//! A [`RuleSet`] declares how each derived fact is computed from named
//! dependencies. A [`FactEngine`] evaluates facts against it for one
//! session, memoizing every result, and each returned [`Fact`] carries
//! the facts it was derived from.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use casework_rules::{FactEngine, RuleSet};
//! use serde_json::json;
//!
//! let rules = RuleSet::builder()
//!     .rule("monthly_income", &["annual_income"], |v| {
//!         Ok(json!(v[0].as_f64().unwrap_or(0.0) / 12.0))
//!     })
//!     .rule("income_eligible", &["monthly_income"], |v| {
//!         Ok(json!(v[0].as_f64().unwrap_or(f64::MAX) < 1500.0))
//!     })
//!     .build()
//!     .unwrap();
//!
//! let mut engine = FactEngine::new(Arc::new(rules)).with_facts([("annual_income", 12000.0)]);
//! let fact = engine.evaluate("income_eligible").unwrap();
//!
//! assert_eq!(fact.value, json!(true));
//! assert_eq!(fact.reasons[0].name, "monthly_income");
//! println!("{}", fact.explain());
//! ```

#![deny(unsafe_code)]

pub mod engine;
pub mod errors;
pub mod fact;
pub mod rule_set;

pub use engine::FactEngine;
pub use errors::{FactError, FactResult};
pub use fact::Fact;
pub use rule_set::{Rule, RuleFn, RuleSet, RuleSetBuilder};
