//! Reference resolution: turn `<field>Ref` / `<field>Selector` entries of the
//! typed spec into literal argument values read from the referenced objects.
//!
//! All lookups of one resolution run concurrently and share a single
//! deadline. A resolution that times out or is cancelled stages nothing.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use graft_config::{CompiledReference, RegisteredResource};
use graft_core::raw::{lookup_json_path, set_concrete};
use graft_core::{Attributes, ConcretePath, GraftError, GraftResult, KindRef, Referent};
use graft_schema::Naming;
use metrics::{counter, histogram};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Read access to the objects references point at.
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    /// The object of `kind` called `name`, or `None` when it does not exist.
    async fn get(&self, kind: &KindRef, name: &str) -> GraftResult<Option<Referent>>;

    /// Every object of `kind` carrying all of `match_labels`.
    async fn select(&self, kind: &KindRef, match_labels: &BTreeMap<String, String>) -> GraftResult<Vec<Referent>>;
}

#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl ResolveContext {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, cancel: CancellationToken::new() }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A value to write into the outgoing argument map.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    /// Concrete raw path, e.g. `rule[1].user`.
    pub path: ConcretePath,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub overrides: Vec<Override>,
    pub ready: bool,
    /// Concrete raw paths of required references that did not resolve.
    pub missing: Vec<String>,
    pub timed_out: bool,
}

impl Resolution {
    pub fn not_ready(&self) -> Option<GraftError> {
        (!self.ready).then(|| GraftError::ReferenceNotReady { missing: self.missing.clone(), timed_out: self.timed_out })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
enum ResolutionPolicy {
    #[default]
    Required,
    Optional,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Policy {
    #[serde(default)]
    resolution: ResolutionPolicy,
}

impl Policy {
    fn is_optional(&self) -> bool {
        self.resolution == ResolutionPolicy::Optional
    }
}

#[derive(Debug, Clone, Deserialize)]
struct NamedRef {
    name: String,
    #[serde(default)]
    policy: Policy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelSelector {
    #[serde(default)]
    match_labels: BTreeMap<String, String>,
    #[serde(default)]
    policy: Policy,
}

#[derive(Debug)]
enum Source {
    /// Referent names, each flagged optional or not.
    Names(Vec<(String, bool)>),
    Labels(BTreeMap<String, String>),
}

#[derive(Debug)]
struct Job<'r> {
    field: String,
    target: ConcretePath,
    reference: &'r CompiledReference,
    source: Source,
    optional: bool,
}

fn singular(typed: &str) -> &str {
    typed.strip_suffix('s').unwrap_or(typed)
}

fn ref_field_name(reference: &CompiledReference, typed: &str) -> String {
    match &reference.config.ref_field_name {
        Some(n) => n.clone(),
        None if reference.multi => format!("{}Refs", singular(typed)),
        None => format!("{typed}Ref"),
    }
}

fn selector_field_name(reference: &CompiledReference, typed: &str) -> String {
    match &reference.config.selector_field_name {
        Some(n) => n.clone(),
        None if reference.multi => format!("{}Selector", singular(typed)),
        None => format!("{typed}Selector"),
    }
}

fn source_of(reference: &CompiledReference, named: Option<&Value>, selector: Option<&Value>) -> Result<Option<(Source, bool)>, serde_json::Error> {
    if let Some(v) = named {
        if reference.multi {
            let refs: Vec<NamedRef> = serde_json::from_value(v.clone())?;
            let names: Vec<(String, bool)> = refs.into_iter().map(|r| (r.name, r.policy.is_optional())).collect();
            let optional = names.iter().all(|(_, optional)| *optional);
            return Ok(Some((Source::Names(names), optional)));
        }
        let r: NamedRef = serde_json::from_value(v.clone())?;
        let optional = r.policy.is_optional();
        return Ok(Some((Source::Names(vec![(r.name, optional)]), optional)));
    }
    if let Some(v) = selector {
        let s: LabelSelector = serde_json::from_value(v.clone())?;
        return Ok(Some((Source::Labels(s.match_labels), s.policy.is_optional())));
    }
    Ok(None)
}

/// Collect one job per referencing location; malformed entries are reported
/// missing right away.
fn plan<'r>(spec: &Attributes, reg: &'r RegisteredResource) -> (Vec<Job<'r>>, Vec<String>) {
    let tree = Value::Object(spec.clone());
    let mut jobs = Vec::new();
    let mut missing = Vec::new();
    for reference in &reg.references {
        let Some(entry) = reg.index.get(&reference.path) else { continue };
        let (Some(raw_leaf), Some(typed_leaf)) = (entry.path.leaf_name(), entry.typed_path.leaf_name()) else {
            continue;
        };
        let ref_field = ref_field_name(reference, typed_leaf);
        let selector_field = selector_field_name(reference, typed_leaf);

        for parent in reg.index.resolve_parents(&tree, &reference.path, Naming::Typed) {
            let Value::Object(obj) = parent.value else { continue };
            let target = parent.raw.key(raw_leaf);
            let named = obj.get(&ref_field).filter(|v| !v.is_null());
            let selector = obj.get(&selector_field).filter(|v| !v.is_null());
            match source_of(reference, named, selector) {
                Ok(Some((source, optional))) => {
                    jobs.push(Job { field: target.to_string(), target, reference, source, optional });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(resource = %reg.name, field = %target, error = %e, "malformed reference");
                    missing.push(target.to_string());
                }
            }
        }
    }
    (jobs, missing)
}

async fn fetch<L: ReferenceLookup + ?Sized>(job: &Job<'_>, lookup: &L) -> GraftResult<Option<Value>> {
    let kind = &job.reference.config.target;
    let extractor = job.reference.config.extractor();
    let values: Vec<Value> = match &job.source {
        Source::Names(names) => {
            let found = join_all(names.iter().map(|(n, _)| lookup.get(kind, n))).await;
            let mut values = Vec::with_capacity(names.len());
            for ((name, optional), referent) in names.iter().zip(found) {
                match referent?.as_ref().and_then(|r| extractor.extract(r)) {
                    Some(v) => values.push(v),
                    None if *optional => debug!(field = %job.field, referent = %name, "optional referent not resolvable"),
                    None => {
                        debug!(field = %job.field, referent = %name, "referent not resolvable");
                        return Ok(None);
                    }
                }
            }
            values
        }
        Source::Labels(labels) => {
            let mut candidates = lookup.select(kind, labels).await?;
            candidates.sort_by(|a, b| a.name.cmp(&b.name));
            candidates.iter().filter_map(|r| extractor.extract(r)).collect()
        }
    };
    if values.is_empty() {
        return Ok(None);
    }
    if job.reference.multi {
        Ok(Some(Value::Array(values)))
    } else {
        Ok(values.into_iter().next())
    }
}

/// Resolve every configured reference of `spec` (typed names).
///
/// Partial success: resolvable fields are staged even when others are
/// missing. Timeout and cancellation stage nothing.
pub async fn resolve<L: ReferenceLookup + ?Sized>(
    spec: &Attributes,
    reg: &RegisteredResource,
    lookup: &L,
    ctx: &ResolveContext,
) -> Resolution {
    let (jobs, mut missing) = plan(spec, reg);
    if jobs.is_empty() {
        return Resolution { ready: missing.is_empty(), missing, ..Default::default() };
    }

    let started = Instant::now();
    let work = join_all(jobs.iter().map(|job| fetch(job, lookup)));
    let results = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        r = tokio::time::timeout(ctx.timeout, work) => r.ok(),
    };
    histogram!("graft_reference_resolve_ms", started.elapsed().as_secs_f64() * 1000.0);

    let Some(results) = results else {
        counter!("graft_reference_timeout_total", 1u64);
        warn!(resource = %reg.name, references = jobs.len(), timeout_ms = ctx.timeout.as_millis() as u64, "reference resolution timed out or was cancelled");
        missing.extend(jobs.iter().map(|j| j.field.clone()));
        return Resolution { overrides: Vec::new(), ready: false, missing, timed_out: true };
    };

    let mut overrides = Vec::new();
    for (job, result) in jobs.iter().zip(results) {
        match result {
            Ok(Some(value)) => overrides.push(Override { path: job.target.clone(), value }),
            Ok(None) if job.optional => {}
            Ok(None) => missing.push(job.field.clone()),
            Err(e) => {
                warn!(resource = %reg.name, field = %job.field, error = %e, "reference lookup failed");
                missing.push(job.field.clone());
            }
        }
    }
    if !missing.is_empty() {
        counter!("graft_reference_missing_total", missing.len() as u64);
    }
    debug!(resource = %reg.name, resolved = overrides.len(), missing = missing.len(), "references resolved");
    Resolution { ready: missing.is_empty(), overrides, missing, timed_out: false }
}

/// Write staged values into the canonical argument map.
pub fn apply_overrides(args: &mut Attributes, resolution: &Resolution) {
    let mut root = Value::Object(std::mem::take(args));
    for o in &resolution.overrides {
        if !set_concrete(&mut root, &o.path, o.value.clone()) {
            warn!(path = %o.path, "override target not addressable; skipped");
        }
    }
    if let Value::Object(map) = root {
        *args = map;
    }
}

/// In-process lookup keyed by bare kind and name. Backs the CLI and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLookup {
    objects: BTreeMap<String, BTreeMap<String, Value>>,
}

impl MemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: &str, name: &str, object: Value) {
        self.objects.entry(kind.to_string()).or_default().insert(name.to_string(), object);
    }

    pub fn with(mut self, kind: &str, name: &str, object: Value) -> Self {
        self.insert(kind, name, object);
        self
    }

    /// Insert a full manifest, reading `kind` and `metadata.name` from it.
    pub fn insert_object(&mut self, object: Value) -> GraftResult<()> {
        let kind = lookup_json_path(&object, "kind").and_then(Value::as_str).map(str::to_string);
        let name = lookup_json_path(&object, "metadata.name").and_then(Value::as_str).map(str::to_string);
        match (kind, name) {
            (Some(kind), Some(name)) => {
                self.insert(&kind, &name, object);
                Ok(())
            }
            _ => Err(GraftError::Lookup("object needs kind and metadata.name".into())),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn labels_match(object: &Value, wanted: &BTreeMap<String, String>) -> bool {
    let labels = lookup_json_path(object, "metadata.labels");
    wanted
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)).and_then(Value::as_str) == Some(v.as_str()))
}

#[async_trait]
impl ReferenceLookup for MemoryLookup {
    async fn get(&self, kind: &KindRef, name: &str) -> GraftResult<Option<Referent>> {
        Ok(self.objects.get(&kind.kind).and_then(|m| m.get(name)).map(|o| Referent::new(name, o.clone())))
    }

    async fn select(&self, kind: &KindRef, match_labels: &BTreeMap<String, String>) -> GraftResult<Vec<Referent>> {
        Ok(self
            .objects
            .get(&kind.kind)
            .map(|m| {
                m.iter()
                    .filter(|(_, o)| labels_match(o, match_labels))
                    .map(|(n, o)| Referent::new(n.clone(), o.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
