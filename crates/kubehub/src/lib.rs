//! Graft kubehub: discovery and reference lookups against a live cluster

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use graft_core::{GraftError, GraftResult, KindRef, Referent};
use graft_engine::ReferenceLookup;
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    Client,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespaced: bool,
}

impl DiscoveredResource {
    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    fn matches(&self, kind: &KindRef) -> bool {
        self.kind == kind.kind
            && kind.version.as_deref().map_or(true, |v| v == self.version)
            && kind.group.as_deref().map_or(true, |g| g == self.group)
    }
}

/// Served resources, found once and matched against reference targets.
#[derive(Debug, Clone, Default)]
pub struct ResourceIndex {
    resources: Vec<(DiscoveredResource, ApiResource)>,
    by_kind: FxHashMap<String, Vec<usize>>,
}

impl ResourceIndex {
    pub fn new(mut resources: Vec<(DiscoveredResource, ApiResource)>) -> Self {
        // Stable-ish order: core group first, then by group and version.
        resources.sort_by(|(a, _), (b, _)| a.group.cmp(&b.group).then(a.version.cmp(&b.version)).then(a.kind.cmp(&b.kind)));
        let mut by_kind: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (i, (d, _)) in resources.iter().enumerate() {
            by_kind.entry(d.kind.clone()).or_default().push(i);
        }
        Self { resources, by_kind }
    }

    /// First served resource matching `kind`; bare kinds take the first group
    /// in sort order.
    pub fn find(&self, kind: &KindRef) -> Option<(&DiscoveredResource, &ApiResource)> {
        self.by_kind
            .get(&kind.kind)?
            .iter()
            .map(|&i| &self.resources[i])
            .find(|(d, _)| d.matches(kind))
            .map(|(d, ar)| (d, ar))
    }

    pub fn discovered(&self) -> impl Iterator<Item = &DiscoveredResource> {
        self.resources.iter().map(|(d, _)| d)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Discover served resources (incl. CRDs) using kube Discovery.
pub async fn discover(client: Client) -> Result<ResourceIndex> {
    let discovery = Discovery::new(client).run().await.context("running API discovery")?;
    let mut out = Vec::new();
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            let namespaced = matches!(caps.scope, Scope::Namespaced);
            out.push((
                DiscoveredResource { group: ar.group.clone(), version: ar.version.clone(), kind: ar.kind.clone(), namespaced },
                ar,
            ));
        }
    }
    Ok(ResourceIndex::new(out))
}

/// `k1=v1,k2=v2`, sorted by key.
fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

fn referent_from(obj: &DynamicObject) -> Result<Referent> {
    let name = obj.metadata.name.clone().ok_or_else(|| anyhow!("object missing metadata.name"))?;
    let mut raw = serde_json::to_value(obj).context("serializing DynamicObject")?;
    strip_managed_fields(&mut raw);
    Ok(Referent::new(name, raw))
}

fn lookup_error(e: anyhow::Error) -> GraftError {
    GraftError::Lookup(format!("{e:#}"))
}

/// Reads referents from the cluster. Namespaced kinds are read from the
/// namespace of the referencing resource.
pub struct KubeLookup {
    client: Client,
    namespace: Option<String>,
    index: ResourceIndex,
}

impl KubeLookup {
    pub async fn connect(namespace: Option<String>) -> Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        let index = discover(client.clone()).await?;
        info!(resources = index.len(), ns = ?namespace, "reference lookup ready");
        Ok(Self { client, namespace, index })
    }

    pub fn new(client: Client, namespace: Option<String>, index: ResourceIndex) -> Self {
        Self { client, namespace, index }
    }

    pub fn index(&self) -> &ResourceIndex {
        &self.index
    }

    fn api(&self, kind: &KindRef) -> Result<Api<DynamicObject>> {
        let (found, ar) = self.index.find(kind).ok_or_else(|| anyhow!("kind not served: {kind}"))?;
        Ok(match (found.namespaced, self.namespace.as_deref()) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, ar),
            (true, None) => Api::default_namespaced_with(self.client.clone(), ar),
            (false, _) => Api::all_with(self.client.clone(), ar),
        })
    }

    async fn get_inner(&self, kind: &KindRef, name: &str) -> Result<Option<Referent>> {
        let api = self.api(kind)?;
        match api.get_opt(name).await.with_context(|| format!("getting {kind} {name}"))? {
            Some(obj) => Ok(Some(referent_from(&obj)?)),
            None => {
                debug!(kind = %kind, name, "referent not found");
                Ok(None)
            }
        }
    }

    async fn select_inner(&self, kind: &KindRef, labels: &BTreeMap<String, String>) -> Result<Vec<Referent>> {
        let api = self.api(kind)?;
        let lp = ListParams::default().labels(&label_selector(labels));
        let list = api.list(&lp).await.with_context(|| format!("listing {kind}"))?;
        debug!(kind = %kind, matched = list.items.len(), "selector listed");
        list.items.iter().map(referent_from).collect()
    }
}

#[async_trait]
impl ReferenceLookup for KubeLookup {
    async fn get(&self, kind: &KindRef, name: &str) -> GraftResult<Option<Referent>> {
        self.get_inner(kind, name).await.map_err(lookup_error)
    }

    async fn select(&self, kind: &KindRef, match_labels: &BTreeMap<String, String>) -> GraftResult<Vec<Referent>> {
        self.select_inner(kind, match_labels).await.map_err(lookup_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::GroupVersionKind;

    fn served(group: &str, version: &str, kind: &str) -> (DiscoveredResource, ApiResource) {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind));
        (DiscoveredResource { group: group.into(), version: version.into(), kind: kind.into(), namespaced: true }, ar)
    }

    #[test]
    fn bare_kinds_match_first_group_qualified_kinds_match_exactly() {
        let index = ResourceIndex::new(vec![
            served("rds.example.io", "v1beta1", "Role"),
            served("iam.example.io", "v1", "Role"),
            served("", "v1", "Secret"),
        ]);
        let bare = KindRef::parse("Role").unwrap();
        assert_eq!(index.find(&bare).unwrap().0.group, "iam.example.io");

        let qualified = KindRef::parse("rds.example.io/v1beta1/Role").unwrap();
        assert_eq!(index.find(&qualified).unwrap().0.gvk_key(), "rds.example.io/v1beta1/Role");

        assert_eq!(index.find(&KindRef::parse("v1/Secret").unwrap()).unwrap().0.gvk_key(), "v1/Secret");
        assert!(index.find(&KindRef::parse("v2/Secret").unwrap()).is_none());
        assert!(index.find(&KindRef::parse("User").unwrap()).is_none());
    }

    #[test]
    fn label_selector_is_sorted() {
        let labels: BTreeMap<String, String> = [("tier", "db"), ("app", "web")].into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        assert_eq!(label_selector(&labels), "app=web,tier=db");
    }

    #[test]
    fn managed_fields_are_stripped() {
        let mut obj = DynamicObject::new("alice", &ApiResource::from_gvk(&GroupVersionKind::gvk("iam.example.io", "v1", "User")));
        obj.metadata.managed_fields = Some(vec![Default::default()]);
        let r = referent_from(&obj).unwrap();
        assert_eq!(r.name, "alice");
        assert!(r.object["metadata"].get("managedFields").is_none());
    }
}
