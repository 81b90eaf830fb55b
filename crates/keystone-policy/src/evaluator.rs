//! Tree-walking evaluator for compiled rules.
//!
//! Leaves have the shape `key:value`. The value has its `%(path)s` placeholders replaced
//! from the call parameters before the key decides how it is checked. Besides that shape,
//! the literals `@` (always), `!` (never), `true` and `false` are accepted.

use crate::ast::{placeholder_regex, Node, Operator, OperatorNode};
use crate::coerce::{compat_equals, is_missing, lookup_path, strip_placeholder, to_compat_string};
use crate::context::IdentityContext;
use crate::error::{PolicyError, Result};
use serde_json::Value;

/// Resolves `rule:<name>` references during evaluation.
pub trait RuleResolver {
    fn check_rule(&self, name: &str) -> Result<bool>;
}

impl<F> RuleResolver for F
where
    F: Fn(&str) -> Result<bool>,
{
    fn check_rule(&self, name: &str) -> Result<bool> {
        self(name)
    }
}

/// Decides URL-shaped checks (`http://...`, `https://...`).
///
/// The engine performs no network I/O; deployments that rely on remote checks plug in
/// their own implementation.
pub trait UrlCheck: Send + Sync {
    fn check(&self, url: &str, identity: Option<&IdentityContext>, params: &Value) -> Result<bool>;
}

/// Default URL check: always allows.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllUrlCheck;

impl UrlCheck for AllowAllUrlCheck {
    fn check(&self, _url: &str, _identity: Option<&IdentityContext>, _params: &Value) -> Result<bool> {
        Ok(true)
    }
}

static NO_PARAMS: Value = Value::Null;

/// Everything a leaf may consult while being evaluated.
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub rules: Option<&'a dyn RuleResolver>,
    pub identity: Option<&'a IdentityContext>,
    pub params: &'a Value,
    pub url_check: Option<&'a dyn UrlCheck>,
}

impl<'a> EvaluationContext<'a> {
    /// An empty context: no resolver, no identity, no parameters.
    pub fn new() -> Self {
        Self {
            rules: None,
            identity: None,
            params: &NO_PARAMS,
            url_check: None,
        }
    }

    pub fn with_rules(mut self, rules: &'a dyn RuleResolver) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_identity(mut self, identity: &'a IdentityContext) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_params(mut self, params: &'a Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_url_check(mut self, url_check: &'a dyn UrlCheck) -> Self {
        self.url_check = Some(url_check);
        self
    }
}

impl Default for EvaluationContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluates an AST node to a decision.
pub fn evaluate(node: &Node, ctx: &EvaluationContext<'_>) -> Result<bool> {
    match node {
        Node::Expression(leaf) => evaluate_expression(&leaf.text, ctx),
        Node::Operator(op) => evaluate_operator(op, ctx),
    }
}

fn evaluate_operator(node: &OperatorNode, ctx: &EvaluationContext<'_>) -> Result<bool> {
    let right = node.right.as_deref().ok_or_else(|| {
        PolicyError::evaluation(format!("'{}' operator has no right operand", node.operator.as_str()))
    })?;

    match node.operator {
        Operator::Not => Ok(!evaluate(right, ctx)?),
        Operator::And | Operator::Or => {
            let left = node.left.as_deref().ok_or_else(|| {
                PolicyError::evaluation(format!(
                    "'{}' operator has no left operand",
                    node.operator.as_str()
                ))
            })?;
            let left_result = evaluate(left, ctx)?;
            match node.operator {
                Operator::And if !left_result => Ok(false),
                Operator::Or if left_result => Ok(true),
                _ => evaluate(right, ctx),
            }
        }
    }
}

/// Evaluates a single leaf text.
pub fn evaluate_expression(text: &str, ctx: &EvaluationContext<'_>) -> Result<bool> {
    match text {
        "@" | "true" => return Ok(true),
        "!" | "false" => return Ok(false),
        _ => {}
    }

    if text.starts_with("http://") || text.starts_with("https://") {
        let url = substitute(text, ctx.params);
        return match ctx.url_check {
            Some(check) => check.check(&url, ctx.identity, ctx.params),
            None => AllowAllUrlCheck.check(&url, ctx.identity, ctx.params),
        };
    }

    if let Some((literal, raw_value)) = split_quoted_key(text) {
        return Ok(literal == substitute(raw_value, ctx.params));
    }

    let (key, raw_value) = text.split_once(':').ok_or_else(|| {
        PolicyError::evaluation(format!("malformed expression '{}': expected 'key:value'", text))
    })?;

    match key {
        "None" => return Ok(param_missing(raw_value, ctx.params)),
        "not null" => return Ok(!param_missing(raw_value, ctx.params)),
        _ => {}
    }

    let value = substitute(raw_value, ctx.params);

    match key {
        "rule" => {
            let resolver = ctx.rules.ok_or_else(|| {
                PolicyError::evaluation(format!(
                    "cannot evaluate 'rule:{}': no rule resolver available",
                    value
                ))
            })?;
            resolver.check_rule(&value)
        }
        "role" => Ok(ctx.identity.map_or(false, |identity| identity.has_role(&value))),
        "is_admin" => Ok(admin_flag(
            ctx.identity.map_or(false, |identity| identity.is_admin),
            &value,
            true,
        )),
        "is_admin_project" => Ok(admin_flag(
            ctx.identity.map_or(false, |identity| identity.is_admin_project),
            &value,
            false,
        )),
        "domain_id" | "domain_name" | "project_id" | "project_domain_id" | "user_id"
        | "user_domain_id" | "system_scope" => {
            let fact = ctx.identity.and_then(|identity| identity.fact(key));
            Ok(match fact {
                None => value == "null",
                Some(actual) => actual == value,
            })
        }
        path => {
            let actual = ctx
                .identity
                .and_then(|identity| identity.lookup(path))
                .filter(|v| !v.is_null())
                .or_else(|| lookup_path(ctx.params, path));
            if value == "null" {
                return Ok(is_missing(actual));
            }
            Ok(compat_equals(actual, &value))
        }
    }
}

/// Splits `'literal':value` into its parts.
fn split_quoted_key(text: &str) -> Option<(&str, &str)> {
    let quote = text.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let rest = &text[1..];
    let close = rest.find(quote)?;
    let value = rest[close + 1..].strip_prefix(':')?;
    Some((&rest[..close], value))
}

fn param_missing(raw_path: &str, params: &Value) -> bool {
    is_missing(lookup_path(params, strip_placeholder(raw_path)))
}

/// `true`/`false` (any case) compare against the flag; `1` counts as true where allowed.
fn admin_flag(fact: bool, value: &str, accept_one: bool) -> bool {
    if value.eq_ignore_ascii_case("true") || (accept_one && value == "1") {
        fact
    } else if value.eq_ignore_ascii_case("false") {
        !fact
    } else {
        to_compat_string(&Value::Bool(fact)) == value
    }
}

/// Replaces every resolvable `%(path)s` in `text` with the parameter's string form.
pub fn substitute(text: &str, params: &Value) -> String {
    placeholder_regex()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            match lookup_path(params, &caps[1]) {
                Some(value) if !value.is_null() => to_compat_string(value),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}
