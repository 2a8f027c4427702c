//! Split an observed raw tree into spec-visible, status-visible and secret parts.

use graft_config::RegisteredResource;
use graft_core::raw::{remove_concrete, scalar_text};
use graft_core::{Attributes, ConnectionPayload, GraftResult, ATTRIBUTE_PREFIX, PAYLOAD_KEY_SEPARATOR};
use graft_schema::Naming;
use serde_json::Value;
use tracing::{trace, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    /// Non-secret argument fields, typed names.
    pub parameters: Attributes,
    /// Every non-secret schema field, computed ones included, typed names.
    pub observation: Attributes,
    pub payload: ConnectionPayload,
}

/// Partition `raw` for `reg`. The input is left untouched.
pub fn partition(raw: &Attributes, reg: &RegisteredResource) -> GraftResult<Partition> {
    let original = Value::Object(raw.clone());
    let mut visible = original.clone();
    let mut payload = ConnectionPayload::new();

    for entry in reg.index.sensitive_roots() {
        for loc in reg.index.resolve_raw(&original, &entry.path) {
            flatten_into(&mut payload, format!("{ATTRIBUTE_PREFIX}{}", loc.raw.dotted()), loc.value);
            remove_concrete(&mut visible, &loc.raw);
        }
    }

    if let Some(extractor) = &reg.config.sensitive.extractor {
        for (key, bytes) in extractor.extract(raw)? {
            if key.starts_with(ATTRIBUTE_PREFIX) && payload.contains_key(&key) {
                warn!(resource = %reg.name, key = %key, "extractor key collides with a schema-derived key; ignoring");
                continue;
            }
            payload.insert(key, bytes);
        }
    }
    trace!(resource = %reg.name, keys = payload.len(), "connection payload built");

    let visible = match visible {
        Value::Object(map) => map,
        _ => Attributes::new(),
    };
    Ok(Partition {
        parameters: reg.index.convert(&visible, Naming::Raw, &|f| f.mode.is_argument() && !f.sensitive),
        observation: reg.index.convert(&visible, Naming::Raw, &|f| !f.sensitive),
        payload,
    })
}

/// Leaves below `value` go in under `key`, nested steps joined with `.`.
/// Nulls and empty containers contribute nothing.
fn flatten_into(payload: &mut ConnectionPayload, key: String, value: &Value) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_into(payload, format!("{key}{PAYLOAD_KEY_SEPARATOR}{i}"), item);
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                flatten_into(payload, format!("{key}{PAYLOAD_KEY_SEPARATOR}{k}"), v);
            }
        }
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
            if let Some(text) = scalar_text(value) {
                payload.insert(key, text.into_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_config::{FieldMapping, ResourceConfig};
    use graft_schema::{FieldSchema as F, ResourceSchema, ScalarKind};
    use serde_json::json;

    fn attrs(v: Value) -> Attributes {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn nested_sensitive_blocks_flatten_every_leaf() {
        let schema = ResourceSchema::new(
            "db",
            vec![
                F::string("engine").required(),
                F::block_list("master", vec![F::string("user"), F::string("password")]).sensitive(),
                F::block("auth", vec![F::string("mode"), F::list("tokens", ScalarKind::String).sensitive()]),
                F::int("port").computed(),
            ],
        );
        let reg = RegisteredResource::compile("db", ResourceConfig::new(schema)).unwrap();
        let raw = attrs(json!({
            "engine": "pg",
            "port": 5432,
            "master": [{ "user": "admin", "password": "pw" }],
            "auth": { "mode": "iam", "tokens": ["t0", "t1"] },
            "unknown": true,
        }));
        let before = raw.clone();
        let p = partition(&raw, &reg).unwrap();
        assert_eq!(raw, before);

        let keys: Vec<&str> = p.payload.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["attribute.auth.tokens.0", "attribute.auth.tokens.1", "attribute.master.0.password", "attribute.master.0.user"]
        );
        assert_eq!(p.payload["attribute.master.0.password"], b"pw".to_vec());

        assert_eq!(Value::Object(p.parameters), json!({ "engine": "pg", "auth": { "mode": "iam" } }));
        assert_eq!(Value::Object(p.observation), json!({ "engine": "pg", "port": 5432, "auth": { "mode": "iam" } }));
    }

    #[test]
    fn extractor_cannot_shadow_schema_keys() {
        let schema = ResourceSchema::new("k", vec![F::string("secret").computed().sensitive(), F::string("arn").computed()]);
        let config = ResourceConfig::new(schema)
            .with_sensitive_extractor(FieldMapping::new().map("arn", "attribute.secret").map("secret", "password"));
        let reg = RegisteredResource::compile("k", config).unwrap();
        let p = partition(&attrs(json!({ "secret": "shh", "arn": "arn:x" })), &reg).unwrap();
        assert_eq!(p.payload["attribute.secret"], b"shh".to_vec());
        assert_eq!(p.payload["password"], b"shh".to_vec());
        assert_eq!(p.payload.len(), 2);
    }
}
