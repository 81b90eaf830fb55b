//! Evaluation observers and the debug trace.
//!
//! A check runs through one evaluation path. Observers only receive callbacks; they get
//! no way to alter the outcome.

use crate::context::IdentityContext;
use crate::error::{PolicyError, Result};
use serde_json::Value;
use std::cell::RefCell;

/// Callbacks fired while a session evaluates rules.
///
/// All methods default to no-ops. `depth` is 0 for the rule passed to `check` and grows by
/// one for every nested `rule:` reference.
pub trait EvaluationObserver {
    /// A rule is about to be evaluated.
    fn rule_entered(&self, _rule: &str, _depth: usize, _context: &IdentityContext, _params: &Value) {}

    /// `requested` was not configured and `resolved` (the fallback) is used instead.
    fn rule_fallback(&self, _requested: &str, _resolved: &str, _depth: usize) {}

    /// A `rule:` leaf inside `parent` references `rule`.
    fn nested_rule(&self, _parent: &str, _rule: &str, _depth: usize) {}

    /// A rule finished, successfully or not.
    fn rule_exited(&self, _rule: &str, _depth: usize, _outcome: std::result::Result<bool, &PolicyError>) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl EvaluationObserver for NoopObserver {}

/// Destination for human-readable trace lines.
pub trait TraceSink {
    /// Appends one line at the given indentation depth.
    fn add(&self, depth: usize, line: String);

    /// Lines accumulated so far.
    fn trace(&self) -> Vec<String>;

    /// Emits the accumulated lines.
    fn log(&self);
}

/// In-memory trace that flushes through `tracing` at debug level.
#[derive(Debug, Default)]
pub struct DebugTrace {
    lines: RefCell<Vec<String>>,
}

impl DebugTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the trace, returning its lines.
    pub fn into_lines(self) -> Vec<String> {
        self.lines.into_inner()
    }
}

impl TraceSink for DebugTrace {
    fn add(&self, depth: usize, line: String) {
        self.lines
            .borrow_mut()
            .push(format!("{}{}", "  ".repeat(depth), line));
    }

    fn trace(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    fn log(&self) {
        for line in self.lines.borrow().iter() {
            tracing::debug!(target: "keystone_policy::trace", "{}", line);
        }
    }
}

/// Observer that renders evaluation events into a [`TraceSink`].
pub struct TraceObserver<'a> {
    sink: &'a dyn TraceSink,
}

impl<'a> TraceObserver<'a> {
    pub fn new(sink: &'a dyn TraceSink) -> Self {
        Self { sink }
    }

    /// Records a failure that escaped evaluation, then flushes the sink.
    pub fn fail(&self, error: &PolicyError) {
        self.sink.add(0, format!("ERROR: {}", error));
        self.sink.log();
    }
}

impl EvaluationObserver for TraceObserver<'_> {
    fn rule_entered(&self, rule: &str, depth: usize, context: &IdentityContext, params: &Value) {
        self.sink.add(depth, format!("-> rule '{}'", rule));
        if depth == 0 {
            self.sink.add(depth + 1, format!("context: {}", summarize_context(context)));
            self.sink.add(depth + 1, format!("params: {}", params));
        }
    }

    fn rule_fallback(&self, requested: &str, resolved: &str, depth: usize) {
        self.sink.add(
            depth + 1,
            format!("rule '{}' not found, falling back to '{}'", requested, resolved),
        );
    }

    fn nested_rule(&self, parent: &str, rule: &str, depth: usize) {
        self.sink
            .add(depth, format!("rule:{} referenced from '{}'", rule, parent));
    }

    fn rule_exited(&self, rule: &str, depth: usize, outcome: std::result::Result<bool, &PolicyError>) {
        let line = match outcome {
            Ok(allowed) => format!("<- rule '{}' = {}", rule, allowed),
            Err(error) => format!("<- rule '{}' failed: {}", rule, error),
        };
        self.sink.add(depth, line);
    }
}

fn summarize_context(context: &IdentityContext) -> String {
    fn show(value: Option<&str>) -> &str {
        value.unwrap_or("-")
    }
    format!(
        "roles=[{}] user_id={} project_id={} domain_id={} is_admin={} is_admin_project={} system_scope={}",
        context.role_names().join(","),
        show(context.fact("user_id")),
        show(context.fact("project_id")),
        show(context.fact("domain_id")),
        context.is_admin,
        context.is_admin_project,
        show(context.fact("system_scope")),
    )
}

/// Runs `f` with a trace observer, recording and flushing on failure.
///
/// The result of `f` is returned unchanged.
pub(crate) fn with_trace<F>(sink: &dyn TraceSink, f: F) -> Result<bool>
where
    F: FnOnce(&dyn EvaluationObserver) -> Result<bool>,
{
    let observer = TraceObserver::new(sink);
    let result = f(&observer);
    match &result {
        Ok(_) => sink.log(),
        Err(error) => observer.fail(error),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_indentation() {
        let trace = DebugTrace::new();
        trace.add(0, "a".into());
        trace.add(2, "b".into());
        assert_eq!(trace.trace(), vec!["a".to_string(), "    b".to_string()]);
    }

    #[test]
    fn test_trace_observer_lines() {
        let trace = DebugTrace::new();
        let ctx = IdentityContext::from_value(&json!({"roles": [{"id": "1", "name": "admin"}]}))
            .unwrap();
        {
            let observer = TraceObserver::new(&trace);
            observer.rule_entered("admin_required", 0, &ctx, &json!({"x": 1}));
            observer.nested_rule("admin_required", "owner", 1);
            observer.rule_exited("admin_required", 0, Ok(true));
        }
        let lines = trace.into_lines();
        assert_eq!(lines[0], "-> rule 'admin_required'");
        assert!(lines[1].contains("roles=[admin]"));
        assert!(lines[1].contains("is_admin=true"));
        assert_eq!(lines[2], "  params: {\"x\":1}");
        assert_eq!(lines[3], "  rule:owner referenced from 'admin_required'");
        assert_eq!(lines[4], "<- rule 'admin_required' = true");
    }

    #[test]
    fn test_with_trace_records_error() {
        let trace = DebugTrace::new();
        let result = with_trace(&trace, |_| Err(PolicyError::evaluation("boom")));
        assert!(result.is_err());
        let lines = trace.trace();
        assert_eq!(lines.last().unwrap(), "ERROR: Evaluation error: boom");
    }
}
