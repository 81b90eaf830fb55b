//! Decorated syntax tree for compiled rules.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Boolean operators of the rule language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    And,
    Or,
    Not,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::And => "and",
            Operator::Or => "or",
            Operator::Not => "not",
        }
    }
}

/// A leaf check such as `role:admin` or `user_id:%(user_id)s`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpressionNode {
    pub text: String,
    /// Placeholder paths referenced by `text`, in order of appearance.
    pub required_params: Vec<String>,
}

/// An `and` / `or` / `not` node. `not` only has a `right` child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorNode {
    pub operator: Operator,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<Box<Node>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<Box<Node>>,
    /// Union of the children's placeholder paths.
    pub required_params: Vec<String>,
}

/// A node of the rule AST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Expression(ExpressionNode),
    Operator(OperatorNode),
}

impl Node {
    /// Creates a leaf, extracting its placeholders.
    pub fn expression(text: impl Into<String>) -> Self {
        let text = text.into();
        let required_params = placeholders(&text);
        Node::Expression(ExpressionNode {
            text,
            required_params,
        })
    }

    /// Creates an `and` node.
    pub fn and(left: Node, right: Node) -> Self {
        Self::binary(Operator::And, left, right)
    }

    /// Creates an `or` node.
    pub fn or(left: Node, right: Node) -> Self {
        Self::binary(Operator::Or, left, right)
    }

    /// Creates a `not` node.
    #[allow(clippy::should_implement_trait)]
    pub fn not(operand: Node) -> Self {
        let required_params = operand.required_params().to_vec();
        Node::Operator(OperatorNode {
            operator: Operator::Not,
            left: None,
            right: Some(Box::new(operand)),
            required_params,
        })
    }

    fn binary(operator: Operator, left: Node, right: Node) -> Self {
        let mut required_params = left.required_params().to_vec();
        for param in right.required_params() {
            if !required_params.contains(param) {
                required_params.push(param.clone());
            }
        }
        Node::Operator(OperatorNode {
            operator,
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
            required_params,
        })
    }

    /// Placeholder paths used anywhere in this subtree.
    pub fn required_params(&self) -> &[String] {
        match self {
            Node::Expression(leaf) => &leaf.required_params,
            Node::Operator(op) => &op.required_params,
        }
    }

    /// Visits every leaf text, left to right.
    pub fn for_each_leaf<'a>(&'a self, f: &mut dyn FnMut(&'a str)) {
        match self {
            Node::Expression(leaf) => f(&leaf.text),
            Node::Operator(op) => {
                if let Some(left) = &op.left {
                    left.for_each_leaf(f);
                }
                if let Some(right) = &op.right {
                    right.for_each_leaf(f);
                }
            }
        }
    }

    /// Renders the tree fully parenthesized, e.g. `((a and b) or c)`.
    pub fn to_infix(&self) -> String {
        match self {
            Node::Expression(leaf) => leaf.text.clone(),
            Node::Operator(op) => match (op.operator, &op.left, &op.right) {
                (Operator::Not, _, Some(right)) => format!("(not {})", right.to_infix()),
                (operator, Some(left), Some(right)) => format!(
                    "({} {} {})",
                    left.to_infix(),
                    operator.as_str(),
                    right.to_infix()
                ),
                (operator, _, _) => format!("({} <missing>)", operator.as_str()),
            },
        }
    }
}

/// A parsed rule together with its aggregated metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledRule {
    pub ast: Node,
    /// Deduplicated and sorted placeholder paths.
    pub required_params: Vec<String>,
    /// Names referenced through `rule:<name>` leaves, in first-appearance order.
    pub used_rules: Vec<String>,
}

impl CompiledRule {
    /// Wraps an AST and computes its metadata.
    pub fn new(ast: Node) -> Self {
        let mut required_params = ast.required_params().to_vec();
        required_params.sort();
        required_params.dedup();

        let mut used_rules: Vec<String> = Vec::new();
        ast.for_each_leaf(&mut |text: &str| {
            if let Some(name) = referenced_rule(text) {
                if !used_rules.iter().any(|r| r == name) {
                    used_rules.push(name.to_string());
                }
            }
        });

        Self {
            ast,
            required_params,
            used_rules,
        }
    }
}

/// The rule name of a `rule:<name>` leaf.
pub fn referenced_rule(text: &str) -> Option<&str> {
    text.strip_prefix("rule:").filter(|name| !name.is_empty())
}

pub(crate) fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"%\(([^()]+)\)s").unwrap_or_else(|e| panic!("invalid placeholder regex: {e}"))
    })
}

/// Placeholder paths in `text`, deduplicated, in order of appearance.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for capture in placeholder_regex().captures_iter(text) {
        let path = capture[1].to_string();
        if !found.contains(&path) {
            found.push(path);
        }
    }
    found
}
