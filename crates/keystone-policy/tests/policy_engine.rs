//! End-to-end checks through the public API.

use keystone_policy::evaluator::evaluate;
use keystone_policy::lexer::tokenize_value;
use keystone_policy::prelude::*;
use keystone_policy::{parse, tokenize, EvaluationContext, ParseError};
use serde_json::{json, Value};
use std::io::Write;

const KEYSTONE_RULES: &str = r#"
"admin_required": "role:admin or is_admin:1"
"service_role": "role:service"
"service_or_admin": "rule:admin_required or rule:service_role"
"owner": "user_id:%(user_id)s"
"admin_or_owner": "rule:admin_required or rule:owner"
"token_subject": "user_id:%(target.token.user_id)s"
"admin_or_token_subject": "rule:admin_required or rule:token_subject"
"cloud_admin": "(role:admin and system_scope:all) or (role:admin and (is_admin_project:True or domain_id:default))"
"identity:get_user": "rule:cloud_admin or (role:reader and domain_id:%(target.user.domain_id)s) or user_id:%(target.user.id)s"
"identity:update_role": "'resource_service':%(target.role.name)s or rule:admin_required"
"identity:list_projects": "rule:admin_required and not project_id:null"
"identity:delete_project": "None:%(target.project.parent_id)s and rule:cloud_admin"
"_default": "rule:admin_required"
"#;

fn keystone_engine() -> PolicyEngine {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(KEYSTONE_RULES.as_bytes()).unwrap();
    PolicyEngine::from_file(file.path(), EngineOptions::default()).unwrap()
}

fn session<'e>(engine: &'e PolicyEngine, token: Value) -> PolicySession<'e> {
    engine.policy(&token, SessionOptions::default()).unwrap()
}

#[test]
fn test_tokenize_is_total() {
    assert!(tokenize_value(&json!(null)).is_empty());
    assert!(tokenize_value(&json!(123)).is_empty());
    assert!(tokenize_value(&json!({})).is_empty());
    assert_eq!(tokenize("role:admin"), tokenize("role:admin"));
}

#[test]
fn test_structural_error_messages() {
    let err = parse(&tokenize("or role:a")).unwrap_err();
    assert!(err.to_string().starts_with("PARSE ERROR: tokens must not begin with 'and' or 'or'"));

    let tokens = vec![
        keystone_policy::Token::expression("role:a"),
        keystone_policy::Token::expression("role:b"),
    ];
    assert_eq!(
        parse(&tokens).unwrap_err().to_string(),
        "PARSE ERROR: tokens must not contain two expressions in a row"
    );
    assert_eq!(parse(&tokenize("(role:a")).unwrap_err(), ParseError::UnbalancedParentheses);
}

#[test]
fn test_role_round_trip() {
    let rule = parse(&tokenize("role:admin")).unwrap();
    let admin = IdentityContext::from_value(&json!({"roles": [{"id": "1", "name": "admin"}]})).unwrap();
    let nobody = IdentityContext::from_value(&json!({"roles": []})).unwrap();
    assert!(evaluate(&rule.ast, &EvaluationContext::new().with_identity(&admin)).unwrap());
    assert!(!evaluate(&rule.ast, &EvaluationContext::new().with_identity(&nobody)).unwrap());
}

#[test]
fn test_rule_reference_round_trip() {
    let rule = parse(&tokenize("rule:admin_required and not project_id:null")).unwrap();
    let resolver = |name: &str| -> keystone_policy::Result<bool> { Ok(name == "admin_required") };
    let scoped = IdentityContext::from_value(&json!({"project": {"id": "p1"}})).unwrap();
    let unscoped = IdentityContext::from_value(&json!({})).unwrap();

    let ctx = EvaluationContext::new().with_rules(&resolver);
    assert!(evaluate(&rule.ast, &ctx.with_identity(&scoped)).unwrap());
    assert!(!evaluate(&rule.ast, &ctx.with_identity(&unscoped)).unwrap());
}

#[test]
fn test_placeholder_round_trip() {
    let rule = parse(&tokenize("domain_id:%(domain_id)s")).unwrap();
    let facts = IdentityContext::from_value(&json!({"domain": {"id": "12345"}})).unwrap();
    let matching = json!({"domain_id": "12345"});
    let other = json!({"domain_id": "54321"});
    let ctx = EvaluationContext::new().with_identity(&facts);
    assert!(evaluate(&rule.ast, &ctx.with_params(&matching)).unwrap());
    assert!(!evaluate(&rule.ast, &ctx.with_params(&other)).unwrap());
}

#[test]
fn test_precedence() {
    assert_eq!(
        parse(&tokenize("A:1 and B:1 or C:1")).unwrap().ast.to_infix(),
        "((A:1 and B:1) or C:1)"
    );
    assert_eq!(
        parse(&tokenize("A:1 or B:1 or C:1")).unwrap().ast.to_infix(),
        "(A:1 or (B:1 or C:1))"
    );
}

#[test]
fn test_nested_grouping_truth_table() {
    let engine = keystone_engine();
    let cases = [
        // token -> expected decision; covers every combination of the two disjuncts
        (json!({"roles": [{"id": "1", "name": "admin"}], "system": {"all": true}}), true),
        (json!({"roles": [{"id": "1", "name": "admin"}], "is_admin_project": true}), true),
        (
            json!({
                "roles": [{"id": "1", "name": "admin"}],
                "system": {"all": true},
                "domain": {"id": "default"}
            }),
            true,
        ),
        (json!({"roles": [{"id": "2", "name": "member"}], "system": {"all": true}}), false),
        (json!({"roles": [{"id": "1", "name": "admin"}]}), false),
    ];
    for (token, expected) in cases {
        let session = session(&engine, token.clone());
        assert_eq!(
            session.check("cloud_admin", &json!({})).unwrap(),
            expected,
            "token: {token}"
        );
    }
}

#[test]
fn test_quoted_literal_check() {
    let engine = keystone_engine();
    let session = session(&engine, json!({}));
    assert!(session
        .check(
            "identity:update_role",
            &json!({"target": {"role": {"name": "resource_service"}}})
        )
        .unwrap());
    assert!(!session
        .check("identity:update_role", &json!({"target": {"role": {"name": "member"}}}))
        .unwrap());
}

#[test]
fn test_keystone_get_user() {
    let engine = keystone_engine();
    let reader = session(
        &engine,
        json!({
            "roles": [{"id": "3", "name": "reader"}],
            "user": {"id": "u1", "domain": {"id": "d1"}},
            "domain": {"id": "d1"}
        }),
    );
    let target_in_domain = json!({"target": {"user": {"id": "u7", "domain_id": "d1"}}});
    let target_elsewhere = json!({"target": {"user": {"id": "u7", "domain_id": "d2"}}});
    let self_target = json!({"target": {"user": {"id": "u1", "domain_id": "d2"}}});

    assert!(reader.check("identity:get_user", &target_in_domain).unwrap());
    assert!(!reader.check("identity:get_user", &target_elsewhere).unwrap());
    assert!(reader.check("identity:get_user", &self_target).unwrap());
}

#[test]
fn test_null_and_none_checks() {
    let engine = keystone_engine();
    let admin = session(
        &engine,
        json!({"roles": [{"id": "1", "name": "admin"}], "project": {"id": "p1"}, "system": {"all": true}}),
    );
    assert!(admin.check("identity:list_projects", &json!({})).unwrap());
    assert!(admin
        .check("identity:delete_project", &json!({"target": {"project": {"parent_id": null}}}))
        .unwrap());
    assert!(!admin
        .check("identity:delete_project", &json!({"target": {"project": {"parent_id": "p0"}}}))
        .unwrap());

    let unscoped = session(&engine, json!({"roles": [{"id": "1", "name": "admin"}]}));
    assert!(!unscoped.check("identity:list_projects", &json!({})).unwrap());
}

#[test]
fn test_default_rule_applies() {
    let engine = keystone_engine();
    let admin = session(&engine, json!({"is_admin": true}));
    let member = session(&engine, json!({"roles": [{"id": "2", "name": "member"}]}));
    assert!(admin.check("identity:unknown_action", &json!({})).unwrap());
    assert!(!member.check("identity:unknown_action", &json!({})).unwrap());
}

#[test]
fn test_required_parameter_aggregation() {
    let engine = keystone_engine();
    assert_eq!(engine.get_required_parameters("owner"), vec!["user_id"]);
    assert_eq!(engine.get_required_parameters("admin_or_owner"), vec!["user_id"]);
    assert_eq!(
        engine.get_required_parameters("identity:get_user"),
        vec!["target.user.domain_id", "target.user.id"]
    );

    let cyclic = PolicyEngine::new(
        [
            ("a".to_string(), "rule:b and user_id:%(x)s".to_string()),
            ("b".to_string(), "rule:a and user_id:%(y)s".to_string()),
        ]
        .into_iter()
        .collect(),
        EngineOptions::default(),
    )
    .unwrap();
    assert_eq!(cyclic.get_required_parameters("a"), vec!["x", "y"]);
    assert!(matches!(
        cyclic.policy(&json!({}), SessionOptions::default()).unwrap().check("a", &json!({"x": 1})),
        Err(PolicyError::CyclicRule(_))
    ));
}

#[test]
fn test_cycle_is_reported_when_reached() {
    let cyclic = PolicyEngine::from_value(
        &json!({"a": "rule:b", "b": "rule:a"}),
        EngineOptions::default(),
    )
    .unwrap();
    let session = cyclic.policy(&json!({}), SessionOptions::default()).unwrap();
    let err = session.check("a", &json!({})).unwrap_err();
    assert!(err.is_evaluation_error());
    assert!(err.to_string().contains("cyclic rule reference: a -> b -> a"));
}

#[test]
fn test_debug_session_matches_plain_session() {
    let engine = keystone_engine();
    let token = json!({"roles": [{"id": "3", "name": "reader"}], "user": {"id": "u1"}});
    let plain = engine.policy(&token, SessionOptions::default()).unwrap();
    let debug = engine.policy(&token, SessionOptions::debug(true)).unwrap();
    assert!(debug.is_debug());

    for rule in engine.rule_names() {
        let params = json!({"user_id": "u1", "target": {"user": {"id": "u2"}}});
        assert_eq!(
            plain.check(rule, &params).unwrap(),
            debug.check(rule, &params).unwrap(),
            "rule: {rule}"
        );
    }
}

#[test]
fn test_compilation_failure_aborts_construction() {
    let err = PolicyEngine::from_value(
        &json!({"good": "role:admin", "bad": "role:admin and and role:x"}),
        EngineOptions::default(),
    )
    .unwrap_err();
    match err {
        PolicyError::RuleCompilation { rule, source } => {
            assert_eq!(rule, "bad");
            assert_eq!(source, ParseError::ConsecutiveOperators);
        }
        other => panic!("Expected compilation error, got {other:?}"),
    }
}

#[test]
fn test_missing_policy_file() {
    let err = PolicyEngine::from_file("/does/not/exist.json", EngineOptions::default()).unwrap_err();
    assert!(err.to_string().starts_with("Policy file not found"));
}
