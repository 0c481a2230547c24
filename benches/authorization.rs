//! Authorization Benchmark (Criterion)
//!
//! Measures store loading and `Cedarling::authorize` against stores of increasing size.

use cedarling::store::{self, LoadOptions};
use cedarling::{BootstrapConfig, Cedarling, PolicyStoreSource, Request};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

/// A store document with `count` policies, one in ten of them a forbid.
fn sample_store(count: usize) -> String {
    let policies: serde_json::Map<String, serde_json::Value> = (0..count)
        .map(|i| {
            let content = if i % 10 == 9 {
                format!(
                    r#"forbid(principal, action == Action::"delete", resource) when {{ context.level < {} }};"#,
                    i
                )
            } else {
                format!(
                    r#"permit(principal in Group::"team{}", action in [Action::"read", Action::"list"], resource is Doc) when {{ context.network == "internal" && context.level >= {} }};"#,
                    i % 7,
                    i % 5
                )
            };
            (
                format!("policy-{}", i),
                json!({ "description": format!("Policy {}", i), "policy_content": content }),
            )
        })
        .collect();

    json!({
        "cedar_version": "v4.0.0",
        "policy_stores": { "bench": { "name": "Benchmark", "policies": policies } }
    })
    .to_string()
}

fn sample_request() -> Request {
    Request::builder(r#"User::"alice""#, r#"Action::"read""#, r#"Doc::"report""#)
        .context(json!({ "network": "internal", "level": 3 }))
        .entity(r#"User::"alice""#, json!({ "dept": "eng" }), vec![r#"Group::"team3""#.into()])
        .build()
}

fn benchmark_authorize(c: &mut Criterion) {
    let mut group = c.benchmark_group("authorize");

    for policy_count in [1, 10, 100, 1000].iter() {
        let config = BootstrapConfig::new("bench", PolicyStoreSource::Local(sample_store(*policy_count)))
            .with_decision_log(false);
        let engine = Cedarling::new(config).expect("benchmark store loads");
        let request = sample_request();

        group.bench_with_input(
            BenchmarkId::new("policies", policy_count),
            &request,
            |b, request| {
                b.iter(|| std::hint::black_box(engine.authorize(request.clone())));
            },
        );
    }

    group.finish();
}

fn benchmark_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("load");

    for policy_count in [10, 100, 1000].iter() {
        let raw = sample_store(*policy_count);

        group.bench_with_input(BenchmarkId::new("policies", policy_count), &raw, |b, raw| {
            b.iter(|| std::hint::black_box(store::load(raw, "bench", &LoadOptions::default())));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_authorize, benchmark_load);

criterion_main!(benches);
