//! Late initialization: fill unset desired-state fields from observed state.
//!
//! The walk follows the schema depth-first and writes only where the spec is
//! unset. A set value is never replaced, so a second merge against the same
//! observation changes nothing.

use std::collections::BTreeSet;

use graft_config::RegisteredResource;
use graft_core::raw::{is_empty_value, shape_name};
use graft_core::{Attributes, ConcretePath, FieldPath, GraftError};
use graft_schema::{FieldKind, FieldSchema, ScalarKind};
use metrics::counter;
use serde_json::{Number, Value};
use tracing::{debug, trace, warn};

#[derive(Debug)]
pub struct LateInitOutcome {
    /// Merged spec, typed names.
    pub spec: Attributes,
    pub changed: bool,
    /// Concrete raw paths that were filled, e.g. `rule[1].user`.
    pub filled: Vec<String>,
    /// Fields left unset because the observed shape did not fit.
    pub skipped_mismatch: Vec<GraftError>,
}

/// Merge observed `raw` into a copy of the typed `spec`.
pub fn merge(spec: &Attributes, raw: &Attributes, reg: &RegisteredResource) -> LateInitOutcome {
    let spec_tree = Value::Object(spec.clone());
    let suppressed: BTreeSet<FieldPath> = reg
        .ignore_when_set
        .iter()
        .filter(|(_, guard)| !reg.index.resolve_typed(&spec_tree, guard).is_empty())
        .map(|(path, _)| path.clone())
        .collect();

    let mut merger = Merger { reg, suppressed, filled: Vec::new(), mismatches: Vec::new() };
    let mut out = spec.clone();
    merger.merge_fields(&reg.index.schema().fields, &FieldPath::root(), &ConcretePath::root(), &mut out, raw);

    let Merger { filled, mismatches, .. } = merger;
    if !filled.is_empty() {
        counter!("graft_late_init_filled_total", filled.len() as u64);
        debug!(resource = %reg.name, fields = ?filled, "late-initialized spec");
    }
    LateInitOutcome { spec: out, changed: !filled.is_empty(), filled, skipped_mismatch: mismatches }
}

struct Merger<'a> {
    reg: &'a RegisteredResource,
    suppressed: BTreeSet<FieldPath>,
    filled: Vec<String>,
    mismatches: Vec<GraftError>,
}

impl Merger<'_> {
    fn merge_fields(
        &mut self,
        fields: &[FieldSchema],
        base: &FieldPath,
        at: &ConcretePath,
        typed: &mut Attributes,
        raw: &Attributes,
    ) {
        let reg = self.reg;
        for f in fields {
            let path = base.child(&f.name);
            let Some(entry) = reg.index.get(&path) else { continue };
            if !entry.argument || entry.is_secret() {
                continue;
            }
            if reg.is_ignored(&path) || self.suppressed.contains(&path) {
                trace!(resource = %reg.name, path = %path, "late-init ignored");
                continue;
            }
            let Some(observed) = raw.get(&f.name).filter(|v| !v.is_null()) else { continue };
            let here = at.key(&f.name);
            let typed_name = f.typed_name();

            let is_set = typed.get(&typed_name).is_some_and(|v| !v.is_null());
            if !is_set {
                if let Some(v) = self.build(f, &path, &here, observed) {
                    typed.insert(typed_name, v);
                }
                continue;
            }

            // Set leaves are left alone; only containers of blocks recurse.
            match (&f.kind, typed.get_mut(&typed_name), observed) {
                (FieldKind::Block { fields }, Some(Value::Object(current)), Value::Object(obs)) => {
                    self.merge_fields(fields, &path, &here, current, obs);
                }
                (FieldKind::BlockList { fields }, Some(Value::Array(current)), Value::Array(obs)) => {
                    if current.len() != obs.len() {
                        trace!(path = %here, spec = current.len(), observed = obs.len(), "list lengths differ; left as is");
                        continue;
                    }
                    let each = path.each();
                    for (i, (item, obs_item)) in current.iter_mut().zip(obs).enumerate() {
                        if let (Value::Object(item), Value::Object(obs_item)) = (item, obs_item) {
                            self.merge_fields(fields, &each, &here.index(i), item, obs_item);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Value for an unset field built from its observed counterpart; `None`
    /// leaves the field unset.
    fn build(&mut self, f: &FieldSchema, path: &FieldPath, here: &ConcretePath, observed: &Value) -> Option<Value> {
        if is_empty_value(observed) && !self.reg.config.late_init.keep_empty_values {
            return None;
        }
        match &f.kind {
            FieldKind::Scalar { of } => {
                let v = self.coerce(*of, here, observed)?;
                self.filled.push(here.to_string());
                Some(v)
            }
            FieldKind::List { of } => {
                let Value::Array(items) = observed else { return self.mismatch(here, "list", observed) };
                let items = items.iter().map(|v| self.coerce(*of, here, v)).collect::<Option<Vec<_>>>()?;
                self.filled.push(here.to_string());
                Some(Value::Array(items))
            }
            FieldKind::Map { of } => {
                let Value::Object(entries) = observed else { return self.mismatch(here, "map", observed) };
                let mut out = Attributes::new();
                for (k, v) in entries {
                    out.insert(k.clone(), self.coerce(*of, here, v)?);
                }
                self.filled.push(here.to_string());
                Some(Value::Object(out))
            }
            FieldKind::Block { fields } => {
                let Value::Object(obs) = observed else { return self.mismatch(here, "block", observed) };
                let mut built = Attributes::new();
                self.merge_fields(fields, path, here, &mut built, obs);
                (!built.is_empty()).then_some(Value::Object(built))
            }
            FieldKind::BlockList { fields } => {
                let Value::Array(items) = observed else { return self.mismatch(here, "list of blocks", observed) };
                let each = path.each();
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let Value::Object(obs) = item else { return self.mismatch(&here.index(i), "block", item) };
                    let mut built = Attributes::new();
                    self.merge_fields(fields, &each, &here.index(i), &mut built, obs);
                    out.push(Value::Object(built));
                }
                out.iter().any(|v| !is_empty_value(v)).then_some(Value::Array(out))
            }
        }
    }

    fn coerce(&mut self, kind: ScalarKind, here: &ConcretePath, v: &Value) -> Option<Value> {
        let coerced = match (kind, v) {
            (ScalarKind::String, Value::String(_)) | (ScalarKind::Bool, Value::Bool(_)) => Some(v.clone()),
            (ScalarKind::Float, Value::Number(_)) => Some(v.clone()),
            (ScalarKind::Int, Value::Number(n)) => integral(n).map(Value::from),
            _ => None,
        };
        match coerced {
            Some(c) => Some(c),
            None => self.mismatch(here, kind.name(), v),
        }
    }

    fn mismatch(&mut self, here: &ConcretePath, expected: &'static str, found: &Value) -> Option<Value> {
        let found = shape_name(found);
        warn!(resource = %self.reg.name, path = %here, expected, found, "observed value does not fit field; skipped");
        counter!("graft_late_init_mismatch_total", 1u64);
        self.mismatches.push(GraftError::MergeTypeMismatch { path: here.to_string(), expected, found });
        None
    }
}

fn integral(n: &Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    match n.as_f64() {
        // i64::MAX as f64 rounds up to 2^63, which does not fit.
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => Some(f as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_config::{LateInitConfig, ResourceConfig};
    use graft_schema::{FieldSchema as F, ResourceSchema};
    use serde_json::json;

    fn attrs(v: Value) -> Attributes {
        v.as_object().cloned().unwrap()
    }

    fn db(late_init: LateInitConfig) -> RegisteredResource {
        let schema = ResourceSchema::new(
            "aws_db_instance",
            vec![
                F::string("identifier").required(),
                F::int("allocated_storage"),
                F::string("engine_version").optional_computed(),
                F::list("zones", ScalarKind::String),
                F::map("tags", ScalarKind::String),
                F::string("password").sensitive(),
                F::string("arn").computed(),
                F::block("backup", vec![F::int("window"), F::bool("copy_tags")]),
                F::block_list("rule", vec![F::string("name"), F::string("user")]),
            ],
        );
        let config = ResourceConfig::new(schema).with_late_init(late_init);
        RegisteredResource::compile("aws_db_instance", config).unwrap()
    }

    fn observed() -> Attributes {
        attrs(json!({
            "identifier": "db-1",
            "allocated_storage": 20.0,
            "engine_version": "15.4",
            "zones": ["a", "b"],
            "tags": {},
            "password": "hunter2",
            "arn": "arn:aws:rds:db-1",
            "backup": { "window": 3, "copy_tags": true },
            "rule": [{ "name": "r0", "user": "u0" }, { "name": "r1", "user": "u1" }],
        }))
    }

    #[test]
    fn fills_unset_arguments_only() {
        let reg = db(LateInitConfig::default());
        let spec = attrs(json!({ "identifier": "mine", "backup": { "window": 7 } }));
        let out = merge(&spec, &observed(), &reg);
        assert!(out.changed);
        assert_eq!(
            Value::Object(out.spec),
            json!({
                "identifier": "mine",
                "allocatedStorage": 20,
                "engineVersion": "15.4",
                "zones": ["a", "b"],
                "backup": { "window": 7, "copyTags": true },
                "rule": [{ "name": "r0", "user": "u0" }, { "name": "r1", "user": "u1" }],
            })
        );
        assert!(out.filled.contains(&"backup.copy_tags".to_string()));
        assert!(out.filled.contains(&"rule[1].user".to_string()));
    }

    #[test]
    fn second_merge_is_a_fixed_point() {
        let reg = db(LateInitConfig::default().ignore("rule[].user"));
        let once = merge(&Attributes::new(), &observed(), &reg);
        let twice = merge(&once.spec, &observed(), &reg);
        assert!(!twice.changed);
        assert_eq!(twice.spec, once.spec);
        assert_eq!(Value::Object(once.spec)["rule"], json!([{ "name": "r0" }, { "name": "r1" }]));
    }

    #[test]
    fn block_lists_merge_positionally_only_on_equal_length() {
        let reg = db(LateInitConfig::default());
        let spec = attrs(json!({ "rule": [{ "name": "mine" }] }));
        let out = merge(&spec, &observed(), &reg);
        assert_eq!(Value::Object(out.spec)["rule"], json!([{ "name": "mine" }]));

        let spec = attrs(json!({ "rule": [{ "name": "a" }, {}] }));
        let out = merge(&spec, &observed(), &reg);
        assert_eq!(Value::Object(out.spec)["rule"], json!([{ "name": "a", "user": "u0" }, { "name": "r1", "user": "u1" }]));
    }

    #[test]
    fn mismatched_shapes_are_skipped_and_recorded() {
        let reg = db(LateInitConfig::default());
        let raw = attrs(json!({ "allocated_storage": "twenty", "zones": "a", "identifier": "db-1" }));
        let out = merge(&Attributes::new(), &raw, &reg);
        assert_eq!(Value::Object(out.spec), json!({ "identifier": "db-1" }));
        assert_eq!(out.skipped_mismatch.len(), 2);
        assert!(matches!(
            &out.skipped_mismatch[0],
            GraftError::MergeTypeMismatch { path, expected: "int", found: "string" } if path == "allocated_storage"
        ));
    }

    #[test]
    fn floats_beyond_i64_are_mismatches_not_saturated() {
        let reg = db(LateInitConfig::default());
        let raw = attrs(json!({ "allocated_storage": 9_223_372_036_854_775_808.0_f64 }));
        let out = merge(&Attributes::new(), &raw, &reg);
        assert!(!out.changed);
        assert!(matches!(
            &out.skipped_mismatch[..],
            [GraftError::MergeTypeMismatch { path, expected: "int", found: "number" }] if path == "allocated_storage"
        ));

        let raw = attrs(json!({ "allocated_storage": -9_223_372_036_854_775_808.0_f64 }));
        let out = merge(&Attributes::new(), &raw, &reg);
        assert_eq!(Value::Object(out.spec), json!({ "allocatedStorage": i64::MIN }));
    }

    #[test]
    fn empty_values_need_opt_in() {
        let raw = attrs(json!({ "tags": {}, "engine_version": "" }));
        let out = merge(&Attributes::new(), &raw, &db(LateInitConfig::default()));
        assert!(!out.changed);

        let out = merge(&Attributes::new(), &raw, &db(LateInitConfig::default().keep_empty_values()));
        assert_eq!(Value::Object(out.spec), json!({ "tags": {}, "engineVersion": "" }));
    }

    #[test]
    fn guard_set_in_spec_suppresses_path() {
        let reg = db(LateInitConfig::default().ignore_when_set("backup", "allocated_storage"));
        let spec = attrs(json!({ "allocatedStorage": 50 }));
        let out = merge(&spec, &observed(), &reg);
        let spec = Value::Object(out.spec);
        assert_eq!(spec["allocatedStorage"], json!(50));
        assert!(spec.get("backup").is_none());
    }
}
