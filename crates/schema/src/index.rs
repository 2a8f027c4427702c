//! Path index compiled once per schema.
//!
//! Every field reachable in the schema gets one [`FieldEntry`] keyed by its
//! canonical path. Entries carry both the canonical (raw) and the typed
//! spelling of the path, so one lookup serves both trees without any
//! per-call schema walking.

use std::collections::BTreeSet;

use graft_core::{Attributes, ConcretePath, ConfigurationError, FieldPath, Segment};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use crate::{FieldKind, FieldMode, FieldSchema, ResourceSchema, ScalarKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar(ScalarKind),
    List(ScalarKind),
    Map(ScalarKind),
    Block,
    BlockList,
}

impl Shape {
    fn of(kind: &FieldKind) -> Self {
        match kind {
            FieldKind::Scalar { of } => Shape::Scalar(*of),
            FieldKind::List { of } => Shape::List(*of),
            FieldKind::Map { of } => Shape::Map(*of),
            FieldKind::Block { .. } => Shape::Block,
            FieldKind::BlockList { .. } => Shape::BlockList,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Shape::Scalar(k) => k.name(),
            Shape::List(_) => "list",
            Shape::Map(_) => "map",
            Shape::Block => "block",
            Shape::BlockList => "list of blocks",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldEntry {
    /// Canonical path, raw attribute names.
    pub path: FieldPath,
    /// Same path spelled with typed-tree names.
    pub typed_path: FieldPath,
    pub shape: Shape,
    pub mode: FieldMode,
    /// Declared sensitive on the field itself.
    pub sensitive: bool,
    /// Some ancestor is declared sensitive.
    pub under_sensitive: bool,
    /// The field and all its ancestors are inputs.
    pub argument: bool,
}

impl FieldEntry {
    pub fn is_secret(&self) -> bool {
        self.sensitive || self.under_sensitive
    }
}

/// Which spelling of field names a tree uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Naming {
    Raw,
    Typed,
}

/// One resolved match, addressed in both spellings.
#[derive(Debug, Clone)]
pub struct Location<'a> {
    pub raw: ConcretePath,
    pub typed: ConcretePath,
    pub value: &'a Value,
}

#[derive(Debug, Clone)]
pub struct PathIndex {
    schema: ResourceSchema,
    omitted: BTreeSet<String>,
    entries: FxHashMap<FieldPath, FieldEntry>,
    order: Vec<FieldPath>,
}

fn normalize(path: &FieldPath) -> FieldPath {
    path.without_trailing_each()
}

impl PathIndex {
    /// Compile `schema`, leaving out the top-level `omitted` fields.
    pub fn compile(schema: &ResourceSchema, omitted: &BTreeSet<String>) -> Result<Self, ConfigurationError> {
        for field in omitted {
            if !FieldPath::parse(field)?.is_top_level() {
                return Err(ConfigurationError::OmittedFieldNotTopLevel {
                    resource: schema.name.clone(),
                    field: field.clone(),
                });
            }
        }
        let fields: Vec<FieldSchema> = schema.fields.iter().filter(|f| !omitted.contains(&f.name)).cloned().collect();
        let mut idx = Self {
            schema: ResourceSchema::new(schema.name.clone(), Vec::new()),
            omitted: omitted.clone(),
            entries: FxHashMap::default(),
            order: Vec::new(),
        };
        idx.walk(&fields, &FieldPath::root(), &FieldPath::root(), false, true)?;
        idx.schema.fields = fields;
        debug!(resource = %schema.name, paths = idx.order.len(), omitted = omitted.len(), "path index compiled");
        Ok(idx)
    }

    fn walk(
        &mut self,
        fields: &[FieldSchema],
        raw_base: &FieldPath,
        typed_base: &FieldPath,
        under_sensitive: bool,
        parent_argument: bool,
    ) -> Result<(), ConfigurationError> {
        for f in fields {
            let typed_name = f.typed_name();
            for name in [&f.name, &typed_name] {
                if !FieldPath::parse(name)?.is_top_level() {
                    return Err(ConfigurationError::InvalidPath {
                        path: raw_base.child(name).to_string(),
                        reason: "field names must be single identifiers".into(),
                    });
                }
            }
            let path = raw_base.child(&f.name);
            let typed_path = typed_base.child(&typed_name);
            if self.entries.contains_key(&path) {
                return Err(ConfigurationError::InvalidPath { path: path.to_string(), reason: "duplicate field".into() });
            }
            let argument = parent_argument && f.mode.is_argument();
            let entry = FieldEntry {
                path: path.clone(),
                typed_path: typed_path.clone(),
                shape: Shape::of(&f.kind),
                mode: f.mode,
                sensitive: f.sensitive,
                under_sensitive,
                argument,
            };
            self.order.push(path.clone());
            self.entries.insert(path.clone(), entry);
            let nested_sensitive = under_sensitive || f.sensitive;
            match &f.kind {
                FieldKind::Block { fields } => self.walk(fields, &path, &typed_path, nested_sensitive, argument)?,
                FieldKind::BlockList { fields } => {
                    self.walk(fields, &path.each(), &typed_path.each(), nested_sensitive, argument)?
                }
                FieldKind::Scalar { .. } | FieldKind::List { .. } | FieldKind::Map { .. } => {}
            }
        }
        Ok(())
    }

    pub fn resource(&self) -> &str {
        &self.schema.name
    }

    /// The schema with omitted fields removed.
    pub fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    pub fn is_omitted(&self, field: &str) -> bool {
        self.omitted.contains(field)
    }

    pub fn get(&self, path: &FieldPath) -> Option<&FieldEntry> {
        self.entries.get(&normalize(path))
    }

    /// Like [`get`](Self::get) but an unknown path is a configuration error.
    pub fn lookup(&self, path: &FieldPath) -> Result<&FieldEntry, ConfigurationError> {
        self.get(path).ok_or_else(|| ConfigurationError::UnknownPath {
            resource: self.schema.name.clone(),
            path: path.to_string(),
        })
    }

    pub fn lookup_str(&self, path: &str) -> Result<&FieldEntry, ConfigurationError> {
        self.lookup(&FieldPath::parse(path)?)
    }

    /// Entries in schema (depth-first) order.
    pub fn entries(&self) -> impl Iterator<Item = &FieldEntry> {
        self.order.iter().filter_map(|p| self.entries.get(p))
    }

    /// Outermost sensitive fields; their subtrees flatten as a whole.
    pub fn sensitive_roots(&self) -> impl Iterator<Item = &FieldEntry> {
        self.entries().filter(|e| e.sensitive && !e.under_sensitive)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Every location `path` addresses in `tree`. Missing keys, nulls and
    /// shape disagreements simply produce no match.
    pub fn resolve<'a>(&self, tree: &'a Value, path: &FieldPath, naming: Naming) -> Vec<Location<'a>> {
        match self.get(path) {
            Some(entry) => walk_segments(tree, entry.path.segments(), entry.typed_path.segments(), naming),
            None => Vec::new(),
        }
    }

    pub fn resolve_raw<'a>(&self, tree: &'a Value, path: &FieldPath) -> Vec<Location<'a>> {
        self.resolve(tree, path, Naming::Raw)
    }

    pub fn resolve_typed<'a>(&self, tree: &'a Value, path: &FieldPath) -> Vec<Location<'a>> {
        self.resolve(tree, path, Naming::Typed)
    }

    /// Every object that holds (or would hold) the field at `path`.
    pub fn resolve_parents<'a>(&self, tree: &'a Value, path: &FieldPath, naming: Naming) -> Vec<Location<'a>> {
        let Some(entry) = self.get(path) else { return Vec::new() };
        let raw = entry.path.segments();
        let typed = entry.typed_path.segments();
        let n = raw.len().saturating_sub(1);
        walk_segments(tree, &raw[..n], &typed[..n], naming)
            .into_iter()
            .filter(|loc| loc.value.is_object())
            .collect()
    }

    /// Re-key a map from one naming to the other, keeping only schema fields
    /// accepted by `keep` (checked at every depth). Nulls are dropped.
    pub fn convert(&self, src: &Attributes, from: Naming, keep: &dyn Fn(&FieldSchema) -> bool) -> Attributes {
        convert_map(&self.schema.fields, src, from, keep)
    }

    pub fn typed_to_raw(&self, typed: &Attributes) -> Attributes {
        self.convert(typed, Naming::Typed, &|_| true)
    }

    pub fn raw_to_typed(&self, raw: &Attributes) -> Attributes {
        self.convert(raw, Naming::Raw, &|_| true)
    }
}

fn walk_segments<'a>(tree: &'a Value, raw: &[Segment], typed: &[Segment], naming: Naming) -> Vec<Location<'a>> {
    let mut frontier = vec![Location { raw: ConcretePath::root(), typed: ConcretePath::root(), value: tree }];
    for (raw_seg, typed_seg) in raw.iter().zip(typed) {
        let mut next = Vec::new();
        for loc in frontier {
            match (raw_seg, typed_seg) {
                (Segment::Field(rn), Segment::Field(tn)) => {
                    let key = match naming {
                        Naming::Raw => rn,
                        Naming::Typed => tn,
                    };
                    if let Value::Object(map) = loc.value {
                        if let Some(v) = map.get(key).filter(|v| !v.is_null()) {
                            next.push(Location { raw: loc.raw.key(rn), typed: loc.typed.key(tn), value: v });
                        }
                    }
                }
                _ => {
                    if let Value::Array(items) = loc.value {
                        for (i, v) in items.iter().enumerate() {
                            next.push(Location { raw: loc.raw.index(i), typed: loc.typed.index(i), value: v });
                        }
                    }
                }
            }
        }
        frontier = next;
    }
    frontier
}

fn convert_map(fields: &[FieldSchema], src: &Attributes, from: Naming, keep: &dyn Fn(&FieldSchema) -> bool) -> Attributes {
    let mut out = Attributes::new();
    for f in fields {
        if !keep(f) {
            continue;
        }
        let typed_name = f.typed_name();
        let (src_key, dst_key) = match from {
            Naming::Typed => (typed_name, f.name.clone()),
            Naming::Raw => (f.name.clone(), typed_name),
        };
        let Some(v) = src.get(&src_key).filter(|v| !v.is_null()) else { continue };
        let converted = match (&f.kind, v) {
            (FieldKind::Block { fields }, Value::Object(m)) => Value::Object(convert_map(fields, m, from, keep)),
            (FieldKind::BlockList { fields }, Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Object(m) => Value::Object(convert_map(fields, m, from, keep)),
                        other => other.clone(),
                    })
                    .collect(),
            ),
            _ => v.clone(),
        };
        out.insert(dst_key, converted);
    }
    out
}
