//! Error types for the policy engine.

use crate::parser::ParseError;
use thiserror::Error;

/// Result type for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;

/// Errors that can occur while compiling or evaluating policy rules.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The rule configuration is empty or malformed.
    #[error("Policy configuration error: {0}")]
    ConfigValidation(String),

    /// A named rule failed to lex or parse.
    #[error("Failed to compile rule '{rule}': {source}")]
    RuleCompilation {
        rule: String,
        #[source]
        source: ParseError,
    },

    /// Neither the requested rule nor `_default` exists.
    #[error("Rule not found: '{0}' (and no '_default' rule is configured)")]
    UnknownRule(String),

    /// Evaluation could not produce a decision.
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// A `rule:` reference re-entered a rule that is already being evaluated.
    #[error("Evaluation error: cyclic rule reference: {}", .0.join(" -> "))]
    CyclicRule(Vec<String>),

    /// Strict mode found required parameters missing from the call.
    #[error("Missing required parameters for rule '{rule}': {}", .missing.join(", "))]
    ParameterValidation { rule: String, missing: Vec<String> },

    /// The token payload could not be normalized into an identity context.
    #[error("Invalid token payload: {0}")]
    InvalidToken(String),

    /// A policy file does not exist.
    #[error("Policy file not found: {0}")]
    PolicyFileNotFound(String),

    /// A policy file exists but could not be parsed.
    #[error("Failed to parse policy file '{path}': {message}")]
    PolicyFileParse { path: String, message: String },

    /// Reading a policy file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PolicyError {
    /// Returns true for errors raised while evaluating a rule.
    ///
    /// Callers must treat these as "cannot decide" rather than as a deny.
    pub fn is_evaluation_error(&self) -> bool {
        matches!(
            self,
            PolicyError::Evaluation(_)
                | PolicyError::CyclicRule(_)
                | PolicyError::UnknownRule(_)
                | PolicyError::ParameterValidation { .. }
        )
    }

    pub(crate) fn evaluation(message: impl Into<String>) -> Self {
        PolicyError::Evaluation(message.into())
    }
}

impl From<serde_json::Error> for PolicyError {
    fn from(err: serde_json::Error) -> Self {
        PolicyError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for PolicyError {
    fn from(err: serde_yaml::Error) -> Self {
        PolicyError::Serialization(err.to_string())
    }
}
