//! Policy file loading.
//!
//! Rule files map rule names to expressions, either as a JSON object or as a YAML
//! mapping (`"name": "expression"` per line).

use crate::engine::PolicyConfig;
use crate::error::{PolicyError, Result};
use serde_json::Value;
use std::path::Path;

/// Supported policy file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyFormat {
    Yaml,
    Json,
}

impl PolicyFormat {
    /// Detects format from file extension.
    pub fn from_extension(path: &str) -> Option<Self> {
        if path.ends_with(".yaml") || path.ends_with(".yml") {
            Some(PolicyFormat::Yaml)
        } else if path.ends_with(".json") {
            Some(PolicyFormat::Json)
        } else {
            None
        }
    }

    /// Detects format from content.
    pub fn detect(content: &str) -> Self {
        if content.trim_start().starts_with('{') {
            PolicyFormat::Json
        } else {
            PolicyFormat::Yaml
        }
    }
}

/// Reads a rule file, picking the format from the extension or the content.
pub fn load_policy_file(path: impl AsRef<Path>) -> Result<PolicyConfig> {
    let path = path.as_ref();
    let shown = path.display().to_string();

    if !path.is_file() {
        return Err(PolicyError::PolicyFileNotFound(shown));
    }

    let content = std::fs::read_to_string(path)?;
    let format = PolicyFormat::from_extension(&shown).unwrap_or_else(|| PolicyFormat::detect(&content));

    let config = parse_policy_str(&content, format).map_err(|e| PolicyError::PolicyFileParse {
        path: shown.clone(),
        message: e.to_string(),
    })?;

    tracing::debug!(path = %shown, ?format, rules = config.len(), "policy file loaded");
    Ok(config)
}

/// Parses rule text in the given format.
pub fn parse_policy_str(content: &str, format: PolicyFormat) -> Result<PolicyConfig> {
    let raw: Value = match format {
        PolicyFormat::Json => serde_json::from_str(content)?,
        PolicyFormat::Yaml => {
            if content.trim().is_empty() {
                Value::Object(serde_json::Map::new())
            } else {
                serde_yaml::from_str(content)?
            }
        }
    };
    into_config(raw)
}

fn into_config(raw: Value) -> Result<PolicyConfig> {
    let map = match raw {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        _ => {
            return Err(PolicyError::Serialization(
                "expected a mapping of rule names to expressions".to_string(),
            ))
        }
    };

    map.into_iter()
        .map(|(name, expression)| match expression {
            Value::String(expression) => Ok((name, expression)),
            other => Err(PolicyError::Serialization(format!(
                "rule '{}' must be a string expression, found {}",
                name, other
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const YAML_RULES: &str = r#"
# Identity rules
"admin_required": "role:admin or is_admin:1"
"owner": "user_id:%(user_id)s"
admin_or_owner: rule:admin_required or rule:owner
"#;

    #[test]
    fn test_format_detection() {
        assert_eq!(PolicyFormat::detect(r#"{"a": "@"}"#), PolicyFormat::Json);
        assert_eq!(PolicyFormat::detect("a: '@'"), PolicyFormat::Yaml);
        assert_eq!(PolicyFormat::from_extension("policy.yml"), Some(PolicyFormat::Yaml));
        assert_eq!(PolicyFormat::from_extension("policy.txt"), None);
    }

    #[test]
    fn test_parse_yaml() {
        let config = parse_policy_str(YAML_RULES, PolicyFormat::Yaml).unwrap();
        assert_eq!(config.len(), 3);
        assert_eq!(config["admin_or_owner"], "rule:admin_required or rule:owner");
        assert_eq!(config["owner"], "user_id:%(user_id)s");
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"a": "@", "b": "role:x"}"#;
        let config = parse_policy_str(json, PolicyFormat::Json).unwrap();
        assert_eq!(config["b"], "role:x");
    }

    #[test]
    fn test_non_string_rule_rejected() {
        assert!(parse_policy_str(r#"{"a": 1}"#, PolicyFormat::Json).is_err());
        assert!(parse_policy_str("- a\n- b\n", PolicyFormat::Yaml).is_err());
    }

    #[test]
    fn test_load_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(YAML_RULES.as_bytes()).unwrap();
        let config = load_policy_file(file.path()).unwrap();
        assert_eq!(config.len(), 3);
    }

    #[test]
    fn test_load_json_file_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"_default": "!"}"#).unwrap();
        let config = load_policy_file(file.path()).unwrap();
        assert_eq!(config["_default"], "!");
    }

    #[test]
    fn test_missing_file() {
        let err = load_policy_file("/nonexistent/policy.yaml").unwrap_err();
        assert!(err.to_string().starts_with("Policy file not found"));
    }

    #[test]
    fn test_parse_failure_names_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(b"{not json").unwrap();
        let path = file.path().display().to_string();
        match load_policy_file(file.path()).unwrap_err() {
            PolicyError::PolicyFileParse { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("Expected parse error, got {other:?}"),
        }
    }
}
