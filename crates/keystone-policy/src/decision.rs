//! Decision with the trace that produced it.

use serde::{Deserialize, Serialize};

/// Outcome of a traced check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracedDecision {
    /// Whether the action is allowed.
    pub allowed: bool,

    /// Rule name passed to the check.
    pub rule: String,

    /// Indented trace lines, outermost rule first.
    pub trace: Vec<String>,
}

impl TracedDecision {
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn is_denied(&self) -> bool {
        !self.allowed
    }
}
