//! End-to-end authorization tests against the public API.

use cedarling::{
    AuthorizeResult, BootstrapConfig, Cedarling, Decision, Error, PolicyStoreSource, Request,
};
use proptest::prelude::*;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;

const EXAMPLE_POLICY_ID: &str = "policy permit principal==A...";

fn example_store() -> String {
    json!({
        "cedar_version": "v4.0.0",
        "policy_stores": {
            "store1": {
                "name": "Example",
                "policies": {
                    EXAMPLE_POLICY_ID: {
                        "description": "A may read doc1",
                        "creation_date": "2024-11-07T07:49:11.813002",
                        "policy_content": "permit(principal == \"A\", action == \"read\", resource == \"doc1\");"
                    }
                }
            }
        }
    })
    .to_string()
}

fn text_store(policy_text: &str) -> String {
    json!({
        "policy_stores": {
            "s": { "policy_text": policy_text }
        }
    })
    .to_string()
}

fn engine(store_id: &str, raw: String) -> Cedarling {
    Cedarling::new(
        BootstrapConfig::new(store_id, PolicyStoreSource::Local(raw)).with_application_name("tests"),
    )
    .unwrap()
}

#[test]
fn test_example_scenario() {
    let engine = engine("store1", example_store());

    let result = engine.authorize(Request::new("A", "read", "doc1")).unwrap();
    assert_eq!(result.decision, Decision::Allow);
    assert_eq!(result.reasons, vec![EXAMPLE_POLICY_ID]);

    let result = engine.authorize(Request::new("A", "write", "doc1")).unwrap();
    assert_eq!(result.decision, Decision::Deny);
    assert!(result.reasons.is_empty());

    let store = engine.policy_store();
    let policy = store.policies.get(EXAMPLE_POLICY_ID).unwrap();
    assert_eq!(policy.metadata.description.as_deref(), Some("A may read doc1"));
    assert!(policy.metadata.created_at.is_some());
}

#[test]
fn test_result_json_shape() {
    let engine = engine("store1", example_store());
    let result = engine
        .authorize(Request::builder("A", "read", "doc1").context(json!({})).build())
        .unwrap();

    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        json!({"decision": "ALLOW", "reasons": [EXAMPLE_POLICY_ID]})
    );
}

#[test]
fn test_deny_overrides_and_default_deny() {
    let engine = engine(
        "s",
        text_store(
            r#"
            @id("staff-read") permit(principal in Role::"staff", action == Action::"read", resource);
            @id("no-contractors") forbid(principal, action, resource) when { principal.contractor };
            "#,
        ),
    );

    let staff = |contractor: bool| {
        Request::builder(r#"User::"bob""#, r#"Action::"read""#, r#"Doc::"plan""#)
            .entity(
                r#"User::"bob""#,
                json!({"contractor": contractor}),
                vec![r#"Role::"staff""#.into()],
            )
            .build()
    };

    let result = engine.authorize(staff(false)).unwrap();
    assert_eq!(result, AuthorizeResult::allow(vec!["staff-read".into()]));

    let result = engine.authorize(staff(true)).unwrap();
    assert_eq!(result, AuthorizeResult::deny(vec!["no-contractors".into()]));

    // No entity data: the forbid condition fails to evaluate and nothing permits.
    let result = engine
        .authorize(Request::new(r#"User::"eve""#, r#"Action::"read""#, r#"Doc::"plan""#))
        .unwrap();
    assert_eq!(result.decision, Decision::Deny);
    assert!(result.reasons.is_empty());
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].policy_id, "no-contractors");
}

#[test]
fn test_context_conditions() {
    let engine = engine(
        "s",
        text_store(
            r#"
            @id("office-hours") permit(principal, action == "read", resource)
            when { context.hour >= 9 && context.hour < 17 }
            unless { context.tags.contains("blocked") };
            "#,
        ),
    );

    let request = |hour: i64, tags: serde_json::Value| {
        Request::builder("A", "read", "doc1")
            .context(json!({"hour": hour, "tags": tags}))
            .build()
    };

    assert!(engine.authorize(request(10, json!([]))).unwrap().is_allowed());
    assert!(!engine.authorize(request(20, json!([]))).unwrap().is_allowed());
    assert!(!engine
        .authorize(request(10, json!(["blocked"])))
        .unwrap()
        .is_allowed());
}

#[test]
fn test_authorize_is_idempotent() {
    let engine = engine("store1", example_store());
    let request = Request::new("A", "read", "doc1");
    let before = engine.policy_store().clone();

    let first = engine.authorize(request.clone()).unwrap();
    for _ in 0..10 {
        assert_eq!(engine.authorize(request.clone()).unwrap(), first);
    }
    assert_eq!(engine.policy_store(), &before);
}

#[test]
fn test_untyped_principal_ignores_entity_order() {
    let engine = engine(
        "s",
        text_store(r#"@id("admins") permit(principal in Group::"admins", action, resource);"#),
    );

    let user = (r#"User::"x""#, vec![r#"Group::"admins""#.to_string()]);
    let device = (r#"Device::"x""#, Vec::new());

    let mut results = Vec::new();
    for order in [[&user, &device], [&device, &user]] {
        let mut request = Request::builder("x", "read", "doc1");
        for (uid, parents) in order {
            request = request.entity(*uid, json!({}), parents.clone());
        }
        results.push(engine.authorize(request.build()).unwrap());
    }

    assert_eq!(results[0], results[1]);
    assert!(results[0].is_allowed());
}

#[test]
fn test_invalid_context_is_rejected() {
    let engine = engine("store1", example_store());
    let err = engine
        .authorize(Request::builder("A", "read", "doc1").context(json!("not a map")).build())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidContextValue { .. }));
}

#[test]
fn test_load_failures() {
    let config = |raw: &str| BootstrapConfig::new("store1", PolicyStoreSource::Local(raw.into()));

    let err = Cedarling::new(config("{ not json")).unwrap_err();
    assert!(matches!(err, Error::Parse { .. }));

    let err = Cedarling::new(config(r#"{"policy_stores": {"other": {"policies": {}}}}"#)).unwrap_err();
    assert!(matches!(err, Error::StoreNotFound { .. }));

    let broken = json!({
        "policy_stores": {
            "store1": {
                "policies": {
                    "bad": { "policy_content": "permit(principal ==, action, resource);" }
                }
            }
        }
    })
    .to_string();
    let err = Cedarling::new(config(&broken)).unwrap_err();
    match err {
        Error::Parse { policy_id, .. } => assert_eq!(policy_id.as_deref(), Some("bad")),
        other => panic!("unexpected error: {other:?}"),
    }

    let too_many = text_store(
        r#"permit(principal, action, resource); forbid(principal, action, resource);"#,
    );
    let err = Cedarling::new(
        BootstrapConfig::new("s", PolicyStoreSource::Local(too_many)).with_max_policies(1),
    )
    .unwrap_err();
    assert!(matches!(err, Error::PolicyLimit { count: 2, limit: 1, .. }));
}

#[test]
fn test_yaml_store_from_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    write!(
        file,
        r#"
cedar_version: v4.0.0
policy_stores:
  store1:
    name: From file
    policies:
      read-doc1:
        encoding: base64
        policy_content: cGVybWl0KHByaW5jaXBhbCA9PSAiQSIsIGFjdGlvbiA9PSAicmVhZCIsIHJlc291cmNlID09ICJkb2MxIik7
"#
    )
    .unwrap();

    let engine = Cedarling::new(BootstrapConfig::new(
        "store1",
        PolicyStoreSource::File(file.path().to_path_buf()),
    ))
    .unwrap();
    assert_eq!(engine.policy_store().name.as_deref(), Some("From file"));

    let result = engine.authorize(Request::new("A", "read", "doc1")).unwrap();
    assert_eq!(result.reasons, vec!["read-doc1"]);
}

#[test]
fn test_missing_file_is_io_error() {
    let err = Cedarling::new(BootstrapConfig::new(
        "store1",
        PolicyStoreSource::File("/nonexistent/store.json".into()),
    ))
    .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_authorize() {
    let engine = Arc::new(engine("store1", example_store()));

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let action = if i % 2 == 0 { "read" } else { "write" };
                let result = engine.authorize(Request::new("A", action, "doc1")).unwrap();
                (action, result)
            })
        })
        .collect();

    for handle in handles {
        let (action, result) = handle.await.unwrap();
        assert_eq!(result.is_allowed(), action == "read");
    }

    let metrics = engine.metrics();
    assert_eq!(metrics.allow_count, 16);
    assert_eq!(metrics.deny_count, 16);
}

const POLICIES: [&str; 6] = [
    r#"@id("p-read") permit(principal, action == "read", resource);"#,
    r#"@id("p-alice") permit(principal == "alice", action, resource);"#,
    r#"@id("f-secret") forbid(principal, action, resource == "secret");"#,
    r#"@id("p-level") permit(principal, action, resource) when { context.level > 2 };"#,
    r#"@id("f-night") forbid(principal, action == "write", resource) when { context.night };"#,
    r#"@id("p-broken") permit(principal, action, resource) when { context.missing == 1 };"#,
];

fn request_strategy() -> impl Strategy<Value = Request> {
    (
        prop::sample::select(vec!["alice", "bob"]),
        prop::sample::select(vec!["read", "write", "delete"]),
        prop::sample::select(vec!["doc1", "secret"]),
        0i64..5,
        any::<bool>(),
    )
        .prop_map(|(principal, action, resource, level, night)| {
            Request::builder(principal, action, resource)
                .context(json!({"level": level, "night": night}))
                .build()
        })
}

proptest! {
    #[test]
    fn prop_policy_order_does_not_change_decision(
        order in Just(POLICIES.to_vec()).prop_shuffle(),
        request in request_strategy(),
    ) {
        let reference = engine("s", text_store(&POLICIES.join("\n")));
        let shuffled = engine("s", text_store(&order.join("\n")));

        let expected = reference.authorize(request.clone()).unwrap();
        let actual = shuffled.authorize(request).unwrap();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn prop_decision_matches_reasons(request in request_strategy()) {
        let engine = engine("s", text_store(&POLICIES.join("\n")));
        let result = engine.authorize(request.clone()).unwrap();

        let mut sorted = result.reasons.clone();
        sorted.sort();
        prop_assert_eq!(&sorted, &result.reasons);

        match result.decision {
            Decision::Allow => {
                prop_assert!(!result.reasons.is_empty());
                prop_assert!(result.reasons.iter().all(|id| id.starts_with("p-")));
            }
            Decision::Deny => {
                prop_assert!(result.reasons.iter().all(|id| id.starts_with("f-")));
            }
        }

        prop_assert_eq!(engine.authorize(request).unwrap(), result);
    }
}
