//! Identity facts derived from a token payload.

use crate::coerce::lookup_path;
use crate::error::{PolicyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A role assignment carried by the token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    #[serde(default, deserialize_with = "scalar::optional_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "scalar::optional_string")]
    pub name: Option<String>,
}

/// A domain reference (`{id, name}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRef {
    #[serde(default, deserialize_with = "scalar::optional_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "scalar::optional_string")]
    pub name: Option<String>,
}

/// The authenticated user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(default, deserialize_with = "scalar::optional_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "scalar::optional_string")]
    pub name: Option<String>,
    #[serde(default)]
    pub domain: Option<DomainRef>,
}

/// The project the token is scoped to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    #[serde(default, deserialize_with = "scalar::optional_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "scalar::optional_string")]
    pub name: Option<String>,
    #[serde(default)]
    pub domain: Option<DomainRef>,
    #[serde(default, deserialize_with = "scalar::optional_string")]
    pub parent_id: Option<String>,
}

/// System scope of the token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemScope {
    #[serde(default, deserialize_with = "scalar::flag")]
    pub all: bool,
}

/// Raw token payload as supplied by the embedder.
///
/// Fields the engine does not know about are kept in `extensions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenPayload {
    #[serde(default)]
    pub roles: Vec<RoleRef>,
    #[serde(default)]
    pub user: Option<UserRef>,
    #[serde(default)]
    pub project: Option<ProjectRef>,
    #[serde(default)]
    pub domain: Option<DomainRef>,
    #[serde(default)]
    pub system: Option<SystemScope>,
    #[serde(default, deserialize_with = "scalar::optional_flag")]
    pub is_admin: Option<bool>,
    #[serde(default, deserialize_with = "scalar::optional_flag")]
    pub is_admin_project: Option<bool>,
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl TokenPayload {
    /// Normalizes a JSON payload. `null` is an empty token; anything but an object is rejected.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(_) => {
                let mut normalized = value.clone();
                if let Value::Object(map) = &mut normalized {
                    if map.get("roles").map_or(false, Value::is_null) {
                        map.remove("roles");
                    }
                }
                serde_json::from_value(normalized)
                    .map_err(|e| PolicyError::InvalidToken(e.to_string()))
            }
            other => Err(PolicyError::InvalidToken(format!(
                "expected an object, found {}",
                json_type(other)
            ))),
        }
    }
}

/// Lenient scalar fields: ids may arrive as numbers, flags as `"true"` or `1`.
mod scalar {
    use crate::coerce::to_compat_string;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn optional_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(None),
            v @ (Value::String(_) | Value::Number(_) | Value::Bool(_)) => Ok(Some(to_compat_string(&v))),
            other => Err(D::Error::custom(format!(
                "expected a scalar, found {}",
                super::json_type(&other)
            ))),
        }
    }

    pub fn optional_flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        let value = Value::deserialize(d)?;
        match &value {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            Value::Number(_) | Value::String(_) => match to_compat_string(&value).to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Some(true)),
                "false" | "0" | "" => Ok(Some(false)),
                other => Err(D::Error::custom(format!("invalid flag value '{}'", other))),
            },
            other => Err(D::Error::custom(format!(
                "expected a flag, found {}",
                super::json_type(other)
            ))),
        }
    }

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(optional_flag(d)?.unwrap_or(false))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Read-only identity facts for one check session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IdentityContext {
    pub roles: Vec<RoleRef>,
    pub user: Option<UserRef>,
    pub project: Option<ProjectRef>,
    pub domain: Option<DomainRef>,

    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_domain_id: Option<String>,
    pub user_domain_name: Option<String>,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub project_domain_id: Option<String>,
    pub project_domain_name: Option<String>,
    pub project_parent_id: Option<String>,
    pub domain_id: Option<String>,
    pub domain_name: Option<String>,

    pub is_admin: bool,
    pub is_admin_project: bool,
    pub system_scope: Option<String>,

    /// Unrecognized token fields, reachable only through `token.<field>` paths.
    pub extensions: Map<String, Value>,

    #[serde(skip)]
    view: Value,
}

impl IdentityContext {
    /// Builds the identity facts from a normalized payload.
    pub fn from_payload(payload: TokenPayload) -> Result<Self> {
        let user_domain = payload.user.as_ref().and_then(|u| u.domain.as_ref());
        let project_domain = payload.project.as_ref().and_then(|p| p.domain.as_ref());

        let inferred_admin = payload.roles.iter().any(|role| {
            role.name
                .as_deref()
                .map_or(false, |name| name.eq_ignore_ascii_case("admin"))
        });

        let mut context = Self {
            user_id: payload.user.as_ref().and_then(|u| u.id.clone()),
            user_name: payload.user.as_ref().and_then(|u| u.name.clone()),
            user_domain_id: user_domain.and_then(|d| d.id.clone()),
            user_domain_name: user_domain.and_then(|d| d.name.clone()),
            project_id: payload.project.as_ref().and_then(|p| p.id.clone()),
            project_name: payload.project.as_ref().and_then(|p| p.name.clone()),
            project_domain_id: project_domain.and_then(|d| d.id.clone()),
            project_domain_name: project_domain.and_then(|d| d.name.clone()),
            project_parent_id: payload.project.as_ref().and_then(|p| p.parent_id.clone()),
            domain_id: payload.domain.as_ref().and_then(|d| d.id.clone()),
            domain_name: payload.domain.as_ref().and_then(|d| d.name.clone()),
            is_admin: payload.is_admin.unwrap_or(inferred_admin),
            is_admin_project: payload.is_admin_project.unwrap_or(false),
            system_scope: payload
                .system
                .as_ref()
                .filter(|s| s.all)
                .map(|_| "all".to_string()),
            roles: payload.roles.clone(),
            user: payload.user.clone(),
            project: payload.project.clone(),
            domain: payload.domain.clone(),
            extensions: payload.extensions.clone(),
            view: Value::Null,
        };

        let mut view = serde_json::to_value(&context)?;
        if let Value::Object(map) = &mut view {
            map.remove("extensions");
            map.insert("token".to_string(), serde_json::to_value(&payload)?);
        }
        context.view = view;
        Ok(context)
    }

    /// Normalizes a JSON payload and builds the identity facts.
    pub fn from_value(value: &Value) -> Result<Self> {
        Self::from_payload(TokenPayload::from_value(value)?)
    }

    /// True if the token carries a role with exactly this name.
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|role| role.name.as_deref() == Some(name))
    }

    /// Role names, in token order.
    pub fn role_names(&self) -> Vec<&str> {
        self.roles.iter().filter_map(|r| r.name.as_deref()).collect()
    }

    /// Looks up a flattened scalar fact (`user_id`, `project_domain_id`, ...).
    pub fn fact(&self, key: &str) -> Option<&str> {
        let value = match key {
            "user_id" => &self.user_id,
            "user_name" => &self.user_name,
            "user_domain_id" => &self.user_domain_id,
            "user_domain_name" => &self.user_domain_name,
            "project_id" => &self.project_id,
            "project_name" => &self.project_name,
            "project_domain_id" => &self.project_domain_id,
            "project_domain_name" => &self.project_domain_name,
            "project_parent_id" => &self.project_parent_id,
            "domain_id" => &self.domain_id,
            "domain_name" => &self.domain_name,
            "system_scope" => &self.system_scope,
            _ => return None,
        };
        value.as_deref()
    }

    /// Resolves a dotted path over the facts, e.g. `user.domain.id` or `token.extra.flag`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.view, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_token() -> Value {
        json!({
            "roles": [{"id": "1", "name": "member"}, {"id": "2", "name": "reader"}],
            "user": {"id": "u1", "name": "alice", "domain": {"id": "default", "name": "Default"}},
            "project": {"id": "p1", "name": "demo", "domain": {"id": "d1", "name": "D1"}, "parent_id": "p0"},
            "system": {"all": false},
            "audit_ids": ["abc"]
        })
    }

    #[test]
    fn test_flattened_facts() {
        let ctx = IdentityContext::from_value(&sample_token()).unwrap();
        assert_eq!(ctx.fact("user_id"), Some("u1"));
        assert_eq!(ctx.fact("user_domain_id"), Some("default"));
        assert_eq!(ctx.fact("project_id"), Some("p1"));
        assert_eq!(ctx.fact("project_domain_id"), Some("d1"));
        assert_eq!(ctx.fact("project_parent_id"), Some("p0"));
        assert_eq!(ctx.fact("domain_id"), None);
        assert_eq!(ctx.fact("system_scope"), None);
        assert!(!ctx.is_admin);
        assert!(!ctx.is_admin_project);
    }

    #[test]
    fn test_admin_inference() {
        let ctx = IdentityContext::from_value(&json!({"roles": [{"id": "9", "name": "admin"}]}))
            .unwrap();
        assert!(ctx.is_admin);

        let ctx = IdentityContext::from_value(&json!({
            "roles": [{"id": "9", "name": "admin"}],
            "is_admin": false
        }))
        .unwrap();
        assert!(!ctx.is_admin);
    }

    #[test]
    fn test_scalar_normalization() {
        let ctx = IdentityContext::from_value(&json!({
            "user": {"id": 42, "domain": {"id": "default"}},
            "project": {"id": 7.0, "parent_id": null},
            "is_admin": "true",
            "is_admin_project": 1,
            "system": {"all": "TRUE"}
        }))
        .unwrap();
        assert_eq!(ctx.fact("user_id"), Some("42"));
        assert_eq!(ctx.fact("project_id"), Some("7"));
        assert_eq!(ctx.fact("project_parent_id"), None);
        assert!(ctx.is_admin);
        assert!(ctx.is_admin_project);
        assert_eq!(ctx.fact("system_scope"), Some("all"));

        let ctx = IdentityContext::from_value(&json!({
            "roles": [{"name": "admin"}],
            "is_admin": "0"
        }))
        .unwrap();
        assert!(!ctx.is_admin);

        assert!(matches!(
            IdentityContext::from_value(&json!({"is_admin": "maybe"})),
            Err(PolicyError::InvalidToken(_))
        ));
        assert!(matches!(
            IdentityContext::from_value(&json!({"user": {"id": ["u"]}})),
            Err(PolicyError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_system_scope() {
        let ctx = IdentityContext::from_value(&json!({"system": {"all": true}})).unwrap();
        assert_eq!(ctx.fact("system_scope"), Some("all"));
    }

    #[test]
    fn test_dotted_lookup() {
        let ctx = IdentityContext::from_value(&sample_token()).unwrap();
        assert_eq!(ctx.lookup("user.domain.id"), Some(&json!("default")));
        assert_eq!(ctx.lookup("token.project.parent_id"), Some(&json!("p0")));
        assert_eq!(ctx.lookup("token.audit_ids.0"), Some(&json!("abc")));
        assert_eq!(ctx.lookup("audit_ids"), None);
        assert_eq!(ctx.extensions.get("audit_ids"), Some(&json!(["abc"])));
    }

    #[test]
    fn test_roles() {
        let ctx = IdentityContext::from_value(&sample_token()).unwrap();
        assert!(ctx.has_role("member"));
        assert!(!ctx.has_role("Member"));
        assert_eq!(ctx.role_names(), vec!["member", "reader"]);
    }

    #[test]
    fn test_invalid_payloads() {
        assert!(IdentityContext::from_value(&json!(null)).is_ok());
        assert!(IdentityContext::from_value(&json!({"roles": null})).is_ok());
        assert!(matches!(
            IdentityContext::from_value(&json!("token")),
            Err(PolicyError::InvalidToken(_))
        ));
        assert!(matches!(
            IdentityContext::from_value(&json!({"roles": "admin"})),
            Err(PolicyError::InvalidToken(_))
        ));
    }
}
