//! Strategy interfaces held by a [`ResourceConfig`](crate::ResourceConfig),
//! plus the built-in implementations covering the common cases.
//!
//! Every strategy is a pure function of its arguments and must be shareable
//! across concurrent reconciliations.

use std::collections::BTreeMap;
use std::fmt;

use graft_core::raw::{lookup_json_path, scalar_text};
use graft_core::{Attributes, ConnectionPayload, GraftResult, Referent};
use serde_json::Value;

/// Attribute the external system reports its identity under by default.
pub const DEFAULT_ID_ATTRIBUTE: &str = "id";

fn observed_id(observed: &Attributes, key: &str) -> Option<String> {
    observed.get(key).and_then(scalar_text).filter(|s| !s.is_empty())
}

/// Maps between the external identity and the argument map.
pub trait IdentityStrategy: Send + Sync + fmt::Debug {
    /// Inject `identity` into the outgoing argument map. Must be idempotent.
    fn set_identifier_argument(&self, _args: &mut Attributes, _identity: &str) {}

    /// Identity as reported by an observation of the external system.
    fn external_name(&self, observed: &Attributes) -> Option<String> {
        observed_id(observed, DEFAULT_ID_ATTRIBUTE)
    }

    /// Id the external tool expects when importing an existing resource.
    fn import_id(&self, identity: &str, _args: &Attributes) -> String {
        identity.to_string()
    }
}

/// Identity allocated by the provider and reported as `id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderIdentifier;

impl IdentityStrategy for ProviderIdentifier {}

/// Identity carried by one top-level argument.
#[derive(Debug, Clone)]
pub struct ParameterAsIdentifier {
    param: String,
}

impl ParameterAsIdentifier {
    pub fn new(param: &str) -> Self {
        Self { param: param.to_string() }
    }

    pub fn param(&self) -> &str {
        &self.param
    }
}

impl IdentityStrategy for ParameterAsIdentifier {
    fn set_identifier_argument(&self, args: &mut Attributes, identity: &str) {
        args.insert(self.param.clone(), Value::String(identity.to_string()));
    }

    fn external_name(&self, observed: &Attributes) -> Option<String> {
        observed_id(observed, &self.param).or_else(|| observed_id(observed, DEFAULT_ID_ATTRIBUTE))
    }
}

/// The common `name` case of [`ParameterAsIdentifier`].
pub type NameAsIdentifier = ParameterAsIdentifier;

/// Pulls a value out of a referenced resource.
pub trait ReferenceExtractor: Send + Sync + fmt::Debug {
    fn extract(&self, referent: &Referent) -> Option<Value>;
}

/// The referent's external identity annotation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalName;

impl ReferenceExtractor for ExternalName {
    fn extract(&self, referent: &Referent) -> Option<Value> {
        referent.external_name().map(|s| Value::String(s.to_string()))
    }
}

/// A field of the referent, addressed by a json-path-like string over the
/// whole object, e.g. `status.atProvider.arn`.
#[derive(Debug, Clone)]
pub struct FieldValue {
    json_path: String,
}

impl FieldValue {
    pub fn new(json_path: &str) -> Self {
        Self { json_path: json_path.to_string() }
    }
}

impl ReferenceExtractor for FieldValue {
    fn extract(&self, referent: &Referent) -> Option<Value> {
        referent
            .field(&self.json_path)
            .filter(|v| !graft_core::raw::is_empty_value(v))
            .cloned()
    }
}

/// Builds additional connection payload entries from the raw tree.
pub trait SensitiveExtractor: Send + Sync + fmt::Debug {
    fn extract(&self, raw: &Attributes) -> GraftResult<ConnectionPayload>;
}

/// Copy raw attributes (json-path-like, canonical names) to payload keys.
/// Absent attributes are skipped.
#[derive(Debug, Clone, Default)]
pub struct FieldMapping {
    mapping: BTreeMap<String, String>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(mut self, raw_path: &str, key: &str) -> Self {
        self.mapping.insert(raw_path.to_string(), key.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

impl FromIterator<(String, String)> for FieldMapping {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self { mapping: iter.into_iter().collect() }
    }
}

impl SensitiveExtractor for FieldMapping {
    fn extract(&self, raw: &Attributes) -> GraftResult<ConnectionPayload> {
        let root = Value::Object(raw.clone());
        let mut out = ConnectionPayload::new();
        for (path, key) in &self.mapping {
            let Some(v) = lookup_json_path(&root, path) else { continue };
            let bytes = match scalar_text(v) {
                Some(s) => s.into_bytes(),
                None if v.is_null() => continue,
                None => serde_json::to_vec(v)?,
            };
            out.insert(key.clone(), bytes);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(v: Value) -> Attributes {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn parameter_identifier_injects_and_reads_back() {
        let s = ParameterAsIdentifier::new("bucket");
        let mut args = Attributes::new();
        s.set_identifier_argument(&mut args, "my-bucket");
        s.set_identifier_argument(&mut args, "my-bucket");
        assert_eq!(Value::Object(args.clone()), json!({ "bucket": "my-bucket" }));
        assert_eq!(s.external_name(&args).as_deref(), Some("my-bucket"));
        assert_eq!(s.external_name(&attrs(json!({ "id": "b2" }))).as_deref(), Some("b2"));
    }

    #[test]
    fn provider_identifier_reads_id_only() {
        let mut args = Attributes::new();
        ProviderIdentifier.set_identifier_argument(&mut args, "vpc-1");
        assert!(args.is_empty());
        assert_eq!(ProviderIdentifier.external_name(&attrs(json!({ "id": "vpc-1" }))).as_deref(), Some("vpc-1"));
        assert_eq!(ProviderIdentifier.external_name(&attrs(json!({ "id": "" }))), None);
        assert_eq!(ProviderIdentifier.external_name(&attrs(json!({ "id": 42 }))).as_deref(), Some("42"));
    }

    #[test]
    fn field_value_extractor_skips_empty() {
        let r = Referent::new("r", json!({ "status": { "atProvider": { "arn": "arn:1", "empty": "" } } }));
        assert_eq!(FieldValue::new("status.atProvider.arn").extract(&r), Some(json!("arn:1")));
        assert_eq!(FieldValue::new("status.atProvider.empty").extract(&r), None);
        assert_eq!(ExternalName.extract(&r), None);
    }

    #[test]
    fn field_mapping_copies_present_values() {
        let m = FieldMapping::new().map("id", "aws_access_key_id").map("missing", "nope").map("port", "port");
        let out = m.extract(&attrs(json!({ "id": "AKIA", "port": 5432 }))).unwrap();
        assert_eq!(out.get("aws_access_key_id").map(Vec::as_slice), Some(&b"AKIA"[..]));
        assert_eq!(out.get("port").map(Vec::as_slice), Some(&b"5432"[..]));
        assert!(!out.contains_key("nope"));
    }
}
