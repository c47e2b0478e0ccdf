//! Error types for fact evaluation

/// Errors raised while building a rule set or evaluating facts
#[derive(Debug, thiserror::Error)]
pub enum FactError {
    #[error("Rule for fact '{fact}' failed")]
    RuleFailed {
        fact: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Cycle detected in fact dependencies: {}", chain.join(" -> "))]
    CycleDetected { chain: Vec<String> },

    #[error("Duplicate rule for fact: {0}")]
    DuplicateRule(String),
}

/// Result type alias for fact operations
pub type FactResult<T> = Result<T, FactError>;
