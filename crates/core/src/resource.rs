//! The typed managed resource as stored by the control plane.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::raw::{self, Attributes};

/// Well-known annotation carrying the external identity.
pub const EXTERNAL_NAME_ANNOTATION: &str = "graft.dev/external-name";

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_SYNCED: &str = "Synced";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ResourceSpec,
    #[serde(default)]
    pub status: ResourceStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// Desired state, camelCase field names.
    #[serde(default)]
    pub for_provider: Attributes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// Observed, non-sensitive state, camelCase field names.
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub at_provider: Attributes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    fn new(type_: &str, status: ConditionStatus, reason: &str, message: Option<String>) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message,
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    pub fn synced() -> Self {
        Self::new(CONDITION_SYNCED, ConditionStatus::True, "ReconcileSuccess", None)
    }

    pub fn sync_failed(reason: &str, message: impl Into<String>) -> Self {
        Self::new(CONDITION_SYNCED, ConditionStatus::False, reason, Some(message.into()))
    }

    pub fn available() -> Self {
        Self::new(CONDITION_READY, ConditionStatus::True, "Available", None)
    }

    pub fn unavailable(reason: &str, message: impl Into<String>) -> Self {
        Self::new(CONDITION_READY, ConditionStatus::False, reason, Some(message.into()))
    }

    /// Same type, status, reason and message; timestamps are ignored.
    pub fn equivalent(&self, other: &Condition) -> bool {
        self.type_ == other.type_ && self.status == other.status && self.reason == other.reason && self.message == other.message
    }
}

impl ManagedResource {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("")
    }

    pub fn external_name(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(EXTERNAL_NAME_ANNOTATION))
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn set_external_name(&mut self, value: &str) {
        self.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(EXTERNAL_NAME_ANNOTATION.to_string(), value.to_string());
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.status.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Replace the condition of the same type. An equivalent condition keeps
    /// its original transition time.
    pub fn set_condition(&mut self, cond: Condition) {
        match self.status.conditions.iter_mut().find(|c| c.type_ == cond.type_) {
            Some(existing) if existing.equivalent(&cond) => {}
            Some(existing) => *existing = cond,
            None => self.status.conditions.push(cond),
        }
    }
}

/// A resource another resource refers to, as returned by a lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Referent {
    pub name: String,
    /// Full object as JSON (metadata, spec, status).
    pub object: Value,
}

impl Referent {
    pub fn new(name: impl Into<String>, object: Value) -> Self {
        Self { name: name.into(), object }
    }

    pub fn external_name(&self) -> Option<&str> {
        raw::lookup_json_path(&self.object, "metadata.annotations")
            .and_then(|a| a.get(EXTERNAL_NAME_ANNOTATION))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn field(&self, json_path: &str) -> Option<&Value> {
        raw::lookup_json_path(&self.object, json_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn external_name_annotation_round_trip() {
        let mut r = ManagedResource::default();
        assert!(r.external_name().is_none());
        r.set_external_name("vpc-123");
        assert_eq!(r.external_name(), Some("vpc-123"));
    }

    #[test]
    fn set_condition_replaces_by_type() {
        let mut r = ManagedResource::default();
        r.set_condition(Condition::unavailable("ReferenceNotReady", "user"));
        let first_ts = r.condition(CONDITION_READY).unwrap().last_transition_time.clone();
        r.set_condition(Condition::unavailable("ReferenceNotReady", "user"));
        assert_eq!(r.status.conditions.len(), 1);
        assert_eq!(r.condition(CONDITION_READY).unwrap().last_transition_time, first_ts);
        r.set_condition(Condition::available());
        assert_eq!(r.status.conditions.len(), 1);
        assert_eq!(r.condition(CONDITION_READY).unwrap().status, ConditionStatus::True);
    }

    #[test]
    fn deserializes_from_manifest_shape() {
        let v = json!({
            "apiVersion": "iam.example.io/v1",
            "kind": "AccessKey",
            "metadata": { "name": "k", "annotations": { "graft.dev/external-name": "AKIA1" } },
            "spec": { "forProvider": { "userName": "alice" } }
        });
        let r: ManagedResource = serde_json::from_value(v).unwrap();
        assert_eq!(r.name(), "k");
        assert_eq!(r.external_name(), Some("AKIA1"));
        assert_eq!(r.spec.for_provider["userName"], json!("alice"));
    }

    #[test]
    fn referent_reads_annotation_and_fields() {
        let r = Referent::new("alice", json!({
            "metadata": { "annotations": { "graft.dev/external-name": "alice-ext" } },
            "status": { "atProvider": { "arn": "arn:user/alice" } }
        }));
        assert_eq!(r.external_name(), Some("alice-ext"));
        assert_eq!(r.field("status.atProvider.arn"), Some(&json!("arn:user/alice")));
    }
}
