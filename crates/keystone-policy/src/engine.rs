//! Policy engine: compiled rule set, sessions and parameter introspection.

use crate::ast::CompiledRule;
use crate::coerce::{is_missing, lookup_path, merge_params};
use crate::context::IdentityContext;
use crate::decision::TracedDecision;
use crate::error::{PolicyError, Result};
use crate::evaluator::{evaluate, EvaluationContext, RuleResolver, UrlCheck};
use crate::hash::{policy_fingerprint, rule_fingerprint};
use crate::loader::load_policy_file;
use crate::observer::{with_trace, DebugTrace, EvaluationObserver, NoopObserver};
use crate::parser::compile;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Rule name to raw expression.
pub type PolicyConfig = BTreeMap<String, String>;

/// Rule consulted when a requested rule is not configured.
pub const DEFAULT_RULE: &str = "_default";

/// Engine-wide options.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Parameters merged under every call's parameters (call-site keys win).
    pub default_parameters: Value,

    /// Reject checks whose required parameters are missing.
    pub strict_parameter_validation: bool,

    /// Record and log a trace for every check.
    pub debug: bool,

    /// Handler for URL-shaped checks. Defaults to always-allow.
    #[serde(skip)]
    pub url_check: Option<Arc<dyn UrlCheck>>,
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_parameters(mut self, params: Value) -> Self {
        self.default_parameters = params;
        self
    }

    pub fn with_strict_parameter_validation(mut self, strict: bool) -> Self {
        self.strict_parameter_validation = strict;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_url_check(mut self, url_check: Arc<dyn UrlCheck>) -> Self {
        self.url_check = Some(url_check);
        self
    }
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("default_parameters", &self.default_parameters)
            .field("strict_parameter_validation", &self.strict_parameter_validation)
            .field("debug", &self.debug)
            .field("url_check", &self.url_check.as_ref().map(|_| "custom"))
            .finish()
    }
}

/// Per-session options.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Overrides the engine's `debug` flag for this session.
    pub debug: Option<bool>,
}

impl SessionOptions {
    pub fn debug(debug: bool) -> Self {
        Self { debug: Some(debug) }
    }
}

/// Read-only description of one compiled rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMetadata {
    pub name: String,
    pub expression: String,
    pub required_params: Vec<String>,
    pub used_rules: Vec<String>,
    pub fingerprint: String,
}

/// Overview of the whole rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RulesSummary {
    pub total_rules: usize,
    pub has_default_rule: bool,
    pub fingerprint: String,
    pub rules: Vec<RuleMetadata>,
}

/// Required parameters of a rule compared with what a call supplies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterReport {
    pub rule: String,
    pub required: Vec<String>,
    pub provided: Vec<String>,
    pub missing: Vec<String>,
}

impl ParameterReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Compiled, immutable rule set.
///
/// Every rule is compiled at construction; a single failure aborts construction.
#[derive(Debug)]
pub struct PolicyEngine {
    config: PolicyConfig,
    rules: HashMap<String, CompiledRule>,
    options: EngineOptions,
    fingerprint: String,
}

impl PolicyEngine {
    /// Compiles every rule of `config`.
    pub fn new(config: PolicyConfig, options: EngineOptions) -> Result<Self> {
        if config.is_empty() {
            return Err(PolicyError::ConfigValidation(
                "policy configuration must contain at least one rule".to_string(),
            ));
        }
        if config.keys().any(|name| name.is_empty()) {
            return Err(PolicyError::ConfigValidation(
                "rule names must not be empty".to_string(),
            ));
        }
        if !matches!(options.default_parameters, Value::Null | Value::Object(_)) {
            return Err(PolicyError::ConfigValidation(
                "default parameters must be an object".to_string(),
            ));
        }

        let mut rules = HashMap::with_capacity(config.len());
        for (name, expression) in &config {
            let compiled = compile(expression).map_err(|source| {
                tracing::warn!(rule = %name, error = %source, "rule compilation failed");
                PolicyError::RuleCompilation {
                    rule: name.clone(),
                    source,
                }
            })?;
            rules.insert(name.clone(), compiled);
        }

        let fingerprint = policy_fingerprint(&config);
        tracing::info!(rule_count = rules.len(), %fingerprint, "policy engine constructed");

        Ok(Self {
            config,
            rules,
            options,
            fingerprint,
        })
    }

    /// Validates an untyped configuration (a JSON object of string expressions) and compiles it.
    pub fn from_value(config: &Value, options: EngineOptions) -> Result<Self> {
        let map = config.as_object().ok_or_else(|| {
            PolicyError::ConfigValidation("policy configuration must be an object".to_string())
        })?;
        let mut parsed = PolicyConfig::new();
        for (name, expression) in map {
            let expression = expression.as_str().ok_or_else(|| {
                PolicyError::ConfigValidation(format!(
                    "rule '{}' must be a string expression",
                    name
                ))
            })?;
            parsed.insert(name.clone(), expression.to_string());
        }
        Self::new(parsed, options)
    }

    /// Loads a JSON or YAML rule file and compiles it.
    pub fn from_file(path: impl AsRef<Path>, options: EngineOptions) -> Result<Self> {
        Self::new(load_policy_file(path)?, options)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Fingerprint of the configuration this engine was built from.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Configured rule names, sorted.
    pub fn rule_names(&self) -> Vec<&str> {
        self.config.keys().map(String::as_str).collect()
    }

    pub fn has_rule(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// The compiled form of a configured rule.
    pub fn compiled_rule(&self, name: &str) -> Option<&CompiledRule> {
        self.rules.get(name)
    }

    /// Opens a check session for a token payload.
    pub fn policy(&self, token: &Value, options: SessionOptions) -> Result<PolicySession<'_>> {
        let identity = IdentityContext::from_value(token)?;
        Ok(self.session(identity, options))
    }

    /// Opens a check session for an already built identity.
    pub fn session(&self, identity: IdentityContext, options: SessionOptions) -> PolicySession<'_> {
        PolicySession {
            engine: self,
            identity,
            debug: options.debug.unwrap_or(self.options.debug),
        }
    }

    /// Resolves a rule name, falling back to `_default`.
    fn resolve<'a>(&'a self, name: &str) -> Result<(&'a str, &'a CompiledRule)> {
        self.rules
            .get_key_value(name)
            .or_else(|| self.rules.get_key_value(DEFAULT_RULE))
            .map(|(resolved, rule)| (resolved.as_str(), rule))
            .ok_or_else(|| PolicyError::UnknownRule(name.to_string()))
    }

    pub fn get_rule_metadata(&self, name: &str) -> Option<RuleMetadata> {
        let rule = self.rules.get(name)?;
        let expression = self.config.get(name)?;
        Some(RuleMetadata {
            name: name.to_string(),
            expression: expression.clone(),
            required_params: rule.required_params.clone(),
            used_rules: rule.used_rules.clone(),
            fingerprint: rule_fingerprint(name, expression),
        })
    }

    pub fn get_rules_summary(&self) -> RulesSummary {
        RulesSummary {
            total_rules: self.rules.len(),
            has_default_rule: self.rules.contains_key(DEFAULT_RULE),
            fingerprint: self.fingerprint.clone(),
            rules: self
                .config
                .keys()
                .filter_map(|name| self.get_rule_metadata(name))
                .collect(),
        }
    }

    /// Placeholder parameters of a rule and of every rule it references, sorted.
    ///
    /// Names resolve like `check` does, including the `_default` fallback. Each rule
    /// contributes once, so reference cycles terminate.
    pub fn get_required_parameters(&self, name: &str) -> Vec<String> {
        let mut visited = HashSet::new();
        self.required_parameters_excluding(name, &mut visited)
    }

    /// Like [`get_required_parameters`](Self::get_required_parameters), skipping rules already in `visited`.
    pub fn required_parameters_excluding(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
    ) -> Vec<String> {
        let mut found = BTreeSet::new();
        self.collect_required(name, visited, &mut found);
        found.into_iter().collect()
    }

    fn collect_required(&self, name: &str, visited: &mut HashSet<String>, found: &mut BTreeSet<String>) {
        if !visited.insert(name.to_string()) {
            return;
        }
        let Ok((_, rule)) = self.resolve(name) else {
            return;
        };
        found.extend(rule.required_params.iter().cloned());
        for used in &rule.used_rules {
            self.collect_required(used, visited, found);
        }
    }

    /// Compares required parameters with those supplied (after merging defaults).
    pub fn check_required_parameters(&self, name: &str, params: &Value) -> ParameterReport {
        let merged = merge_params(&self.options.default_parameters, params);
        self.report(name, &merged)
    }

    /// Fails with the list of missing parameters, if any.
    pub fn validate_parameters(&self, name: &str, params: &Value) -> Result<()> {
        let merged = merge_params(&self.options.default_parameters, params);
        self.validate_merged(name, &merged)
    }

    fn report(&self, name: &str, merged: &Value) -> ParameterReport {
        let required = self.get_required_parameters(name);
        let (provided, missing): (Vec<String>, Vec<String>) = required
            .iter()
            .cloned()
            .partition(|path| !is_missing(lookup_path(merged, path)));
        ParameterReport {
            rule: name.to_string(),
            required,
            provided,
            missing,
        }
    }

    fn validate_merged(&self, name: &str, merged: &Value) -> Result<()> {
        let report = self.report(name, merged);
        if report.is_complete() {
            return Ok(());
        }
        tracing::warn!(rule = %name, missing = ?report.missing, "required parameters missing");
        Err(PolicyError::ParameterValidation {
            rule: report.rule,
            missing: report.missing,
        })
    }
}

/// Check handle bound to one identity.
///
/// Holds no mutable state; any number of checks may run from one session.
#[derive(Debug)]
pub struct PolicySession<'e> {
    engine: &'e PolicyEngine,
    identity: IdentityContext,
    debug: bool,
}

impl<'e> PolicySession<'e> {
    pub fn identity(&self) -> &IdentityContext {
        &self.identity
    }

    pub fn engine(&self) -> &'e PolicyEngine {
        self.engine
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Decides whether `rule` allows the action for this identity and parameters.
    pub fn check(&self, rule: &str, params: &Value) -> Result<bool> {
        let allowed = if self.debug {
            let trace = DebugTrace::new();
            with_trace(&trace, |observer| self.check_with_observer(rule, params, observer))?
        } else {
            self.check_with_observer(rule, params, &NoopObserver)?
        };
        tracing::debug!(rule = %rule, allowed, "policy check");
        Ok(allowed)
    }

    /// Runs a check and returns the trace alongside the decision.
    pub fn check_with_trace(&self, rule: &str, params: &Value) -> Result<TracedDecision> {
        let trace = DebugTrace::new();
        let allowed = with_trace(&trace, |observer| self.check_with_observer(rule, params, observer))?;
        Ok(TracedDecision {
            allowed,
            rule: rule.to_string(),
            trace: trace.into_lines(),
        })
    }

    /// Runs a check, reporting evaluation events to `observer`.
    pub fn check_with_observer(
        &self,
        rule: &str,
        params: &Value,
        observer: &dyn EvaluationObserver,
    ) -> Result<bool> {
        let merged = merge_params(&self.engine.options.default_parameters, params);
        if self.engine.options.strict_parameter_validation {
            self.engine.validate_merged(rule, &merged)?;
        }

        let resolver = SessionResolver {
            engine: self.engine,
            identity: &self.identity,
            params: &merged,
            observer,
            chain: RefCell::new(Vec::new()),
        };
        resolver.evaluate_rule(rule)
    }

    pub fn get_required_parameters(&self, rule: &str) -> Vec<String> {
        self.engine.get_required_parameters(rule)
    }

    pub fn check_required_parameters(&self, rule: &str, params: &Value) -> ParameterReport {
        self.engine.check_required_parameters(rule, params)
    }

    pub fn validate_parameters(&self, rule: &str, params: &Value) -> Result<()> {
        self.engine.validate_parameters(rule, params)
    }
}

/// Resolves nested `rule:` references for one check, tracking the active chain.
struct SessionResolver<'s> {
    engine: &'s PolicyEngine,
    identity: &'s IdentityContext,
    params: &'s Value,
    observer: &'s dyn EvaluationObserver,
    chain: RefCell<Vec<String>>,
}

impl SessionResolver<'_> {
    fn evaluate_rule(&self, name: &str) -> Result<bool> {
        let depth = self.chain.borrow().len();
        if self.chain.borrow().iter().any(|active| active == name) {
            let mut cycle = self.chain.borrow().clone();
            cycle.push(name.to_string());
            tracing::warn!(chain = %cycle.join(" -> "), "cyclic rule reference");
            return Err(PolicyError::CyclicRule(cycle));
        }

        self.observer.rule_entered(name, depth, self.identity, self.params);
        let result = self.evaluate_entered(name, depth);
        self.observer.rule_exited(name, depth, result.as_ref().copied());
        result
    }

    fn evaluate_entered(&self, name: &str, depth: usize) -> Result<bool> {
        let (resolved, rule) = self.engine.resolve(name)?;
        if resolved != name {
            tracing::debug!(requested = %name, "rule not configured, using '_default'");
            self.observer.rule_fallback(name, resolved, depth);
        }

        let mut ctx = EvaluationContext::new()
            .with_rules(self)
            .with_identity(self.identity)
            .with_params(self.params);
        if let Some(url_check) = &self.engine.options.url_check {
            ctx = ctx.with_url_check(url_check.as_ref());
        }

        self.chain.borrow_mut().push(name.to_string());
        let result = evaluate(&rule.ast, &ctx);
        self.chain.borrow_mut().pop();
        result
    }
}

impl RuleResolver for SessionResolver<'_> {
    fn check_rule(&self, name: &str) -> Result<bool> {
        let (parent, depth) = {
            let chain = self.chain.borrow();
            (chain.last().cloned().unwrap_or_default(), chain.len())
        };
        self.observer.nested_rule(&parent, name, depth);
        self.evaluate_rule(name)
    }
}
