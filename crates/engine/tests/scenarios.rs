//! End-to-end reconciliation scenarios against a small provider schema.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use graft_config::{FieldMapping, IdentityConfig, LateInitConfig, ReferenceConfig, Registry, ResourceConfig, Settings};
use graft_core::{Attributes, GraftError, GraftResult, KindRef, ManagedResource, Referent};
use graft_engine::identity::{self, IdentitySource, Observation};
use graft_engine::{lateinit, sensitive, Engine, MemoryLookup, ReferenceLookup};
use graft_schema::{FieldSchema as F, ResourceSchema};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn attrs(v: Value) -> Attributes {
    v.as_object().cloned().unwrap()
}

fn named(name: &str) -> ManagedResource {
    let mut r = ManagedResource::default();
    r.metadata.name = Some(name.to_string());
    r
}

fn registry() -> Registry {
    let mut reg = Registry::new();
    reg.register(
        "aws_vpc",
        ResourceConfig::new(ResourceSchema::new(
            "aws_vpc",
            vec![F::string("cidr_block"), F::string("id").computed(), F::string("arn").computed()],
        ))
        .with_identity(IdentityConfig::identifier_from_provider()),
    )
    .unwrap();
    reg.register(
        "aws_s3_bucket",
        ResourceConfig::new(ResourceSchema::new(
            "aws_s3_bucket",
            vec![F::string("bucket"), F::string("bucket_prefix"), F::bool("force_destroy"), F::string("region").computed()],
        ))
        .with_identity(IdentityConfig::parameter_as_identifier("bucket").omit("bucket_prefix")),
    )
    .unwrap();
    reg.register(
        "aws_iam_access_key",
        ResourceConfig::new(ResourceSchema::new(
            "aws_iam_access_key",
            vec![
                F::string("user").required(),
                F::string("id").computed().sensitive(),
                F::string("secret").computed().sensitive(),
            ],
        ))
        .with_identity(IdentityConfig::identifier_from_provider())
        .with_reference("user", ReferenceConfig::to("User").unwrap())
        .with_sensitive_extractor(
            FieldMapping::new().map("id", "aws_access_key_id").map("secret", "aws_secret_access_key"),
        ),
    )
    .unwrap();
    reg.register(
        "aws_db_instance",
        ResourceConfig::new(ResourceSchema::new(
            "aws_db_instance",
            vec![F::int("storage_size"), F::block("storage_profile", vec![F::int("size")])],
        )),
    )
    .unwrap();
    reg
}

#[test]
fn provider_assigned_identity_comes_from_observation() {
    let reg = registry();
    let vpc = reg.require("aws_vpc").unwrap();
    let observed = attrs(json!({ "id": "vpc-123" }));

    let id = identity::decode(&named("main"), Observation::State(&observed), &vpc).unwrap();
    assert_eq!(id.value, "vpc-123");
    assert_eq!(id.source, IdentitySource::Observed);
    assert_eq!(identity::encode(&id.value, &Attributes::new(), &vpc), Attributes::new());

    let engine = Engine::new(&reg, &Settings::default());
    let mut res = named("main");
    let out = engine.observe("aws_vpc", &mut res, &observed).unwrap();
    assert_eq!(res.external_name(), Some("vpc-123"));
    assert!(out.annotation_changed);
    assert!(res.spec.for_provider.is_empty());
}

#[test]
fn parameter_identity_is_injected_and_never_typed() {
    let reg = registry();
    let bucket = reg.require("aws_s3_bucket").unwrap();
    let args = identity::encode("my-bucket", &Attributes::new(), &bucket);
    assert_eq!(Value::Object(args), json!({ "bucket": "my-bucket" }));

    let observed = attrs(json!({ "bucket": "my-bucket", "bucket_prefix": "my-", "force_destroy": false, "region": "eu-west-1" }));
    let merged = lateinit::merge(&Attributes::new(), &observed, &bucket);
    assert_eq!(Value::Object(merged.spec), json!({ "forceDestroy": false }));
    let part = sensitive::partition(&observed, &bucket).unwrap();
    assert!(!part.observation.contains_key("bucket"));
    assert!(!part.observation.contains_key("bucketPrefix"));
    assert_eq!(part.observation.get("region"), Some(&json!("eu-west-1")));
}

#[test]
fn sensitive_values_are_duplicated_under_friendly_keys() {
    let reg = registry();
    let key = reg.require("aws_iam_access_key").unwrap();
    let raw = attrs(json!({ "id": "AKIAEXAMPLE", "secret": "shh", "user": "alice" }));
    let part = sensitive::partition(&raw, &key).unwrap();
    let keys: Vec<&str> = part.payload.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["attribute.id", "attribute.secret", "aws_access_key_id", "aws_secret_access_key"]);
    assert_eq!(part.payload["attribute.secret"], part.payload["aws_secret_access_key"]);
    assert_eq!(Value::Object(part.observation), json!({ "user": "alice" }));
}

#[test]
fn mutually_exclusive_fields_are_both_late_initialized() {
    // Both fields get filled; the external system may reject the pair,
    // which only an ignore entry prevents.
    let reg = registry();
    let db = reg.require("aws_db_instance").unwrap();
    let raw = attrs(json!({ "storage_size": 100, "storage_profile": { "size": 100 } }));
    let merged = lateinit::merge(&Attributes::new(), &raw, &db);
    assert_eq!(Value::Object(merged.spec), json!({ "storageSize": 100, "storageProfile": { "size": 100 } }));

    let config = ResourceConfig::new(db.config.schema.clone())
        .with_late_init(LateInitConfig::default().ignore("storage_profile.size"));
    let mut guarded = Registry::new();
    guarded.register("aws_db_instance", config).unwrap();
    let merged = lateinit::merge(&Attributes::new(), &raw, &guarded.require("aws_db_instance").unwrap());
    assert_eq!(Value::Object(merged.spec), json!({ "storageSize": 100 }));
}

#[tokio::test]
async fn missing_referent_blocks_submission() {
    let reg = registry();
    let engine = Engine::new(&reg, &Settings::default());
    let mut res = named("ci");
    res.spec.for_provider = attrs(json!({ "userRef": { "name": "alice" } }));

    let err = engine.prepare("aws_iam_access_key", &mut res, &MemoryLookup::new(), &CancellationToken::new()).await.unwrap_err();
    match err {
        GraftError::ReferenceNotReady { missing, timed_out } => {
            assert_eq!(missing, vec!["user".to_string()]);
            assert!(!timed_out);
        }
        other => panic!("unexpected error: {other}"),
    }
}

struct SlowLookup(Duration);

#[async_trait]
impl ReferenceLookup for SlowLookup {
    async fn get(&self, _kind: &KindRef, name: &str) -> GraftResult<Option<Referent>> {
        tokio::time::sleep(self.0).await;
        Ok(Some(Referent::new(name, json!({}))))
    }

    async fn select(&self, _kind: &KindRef, _labels: &BTreeMap<String, String>) -> GraftResult<Vec<Referent>> {
        tokio::time::sleep(self.0).await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn lookup_timeout_reports_not_ready() {
    let reg = registry();
    let settings = Settings::default().with_lookup_timeout(Duration::from_millis(20));
    let engine = Engine::new(&reg, &settings);
    let mut res = named("ci");
    res.spec.for_provider = attrs(json!({ "userRef": { "name": "alice" } }));

    let err = engine
        .prepare("aws_iam_access_key", &mut res, &SlowLookup(Duration::from_secs(5)), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GraftError::ReferenceNotReady { timed_out: true, .. }));
    assert!(res.external_name().is_none());
}
