//! Registry of resource configurations, keyed by external type name.
//!
//! Built once at startup and then only read. Registration compiles the path
//! index and checks every configured path against it, so a typo in an
//! override fails the process instead of a reconciliation.

use std::collections::BTreeSet;
use std::sync::Arc;

use graft_core::{ConfigurationError, FieldPath, GraftError, GraftResult};
use graft_schema::{PathIndex, ScalarKind, Shape};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::strategy::{IdentityStrategy, ProviderIdentifier};
use crate::{ReferenceConfig, ResourceConfig};

static DEFAULT_IDENTITY: ProviderIdentifier = ProviderIdentifier;

/// A reference field, validated against the schema.
#[derive(Debug, Clone)]
pub struct CompiledReference {
    pub path: FieldPath,
    /// The referencing field is a list of strings.
    pub multi: bool,
    pub config: ReferenceConfig,
}

/// A resource configuration together with everything derived from it at
/// registration.
#[derive(Debug)]
pub struct RegisteredResource {
    pub name: String,
    pub config: ResourceConfig,
    pub index: PathIndex,
    pub ignored: BTreeSet<FieldPath>,
    pub ignore_when_set: Vec<(FieldPath, FieldPath)>,
    pub references: Vec<CompiledReference>,
}

impl RegisteredResource {
    pub fn compile(name: &str, config: ResourceConfig) -> Result<Self, ConfigurationError> {
        let index = PathIndex::compile(&config.schema, &config.identity.omitted_fields)?;

        let mut ignored = BTreeSet::new();
        for raw in &config.late_init.ignored {
            let path = FieldPath::parse(raw)?;
            index.lookup(&path)?;
            ignored.insert(path.without_trailing_each());
        }

        let mut ignore_when_set = Vec::new();
        for (raw, guard) in &config.late_init.ignore_when_set {
            let path = FieldPath::parse(raw)?;
            let guard = FieldPath::parse(guard)?;
            index.lookup(&path)?;
            index.lookup(&guard)?;
            ignore_when_set.push((path.without_trailing_each(), guard.without_trailing_each()));
        }

        let mut references = Vec::new();
        for (raw, reference) in &config.references {
            let path = FieldPath::parse(raw)?;
            let entry = index.lookup(&path)?;
            let multi = match entry.shape {
                Shape::Scalar(ScalarKind::String) => false,
                Shape::List(ScalarKind::String) => true,
                _ => {
                    return Err(ConfigurationError::NotReferenceable { resource: name.to_string(), path: raw.clone() });
                }
            };
            if !entry.argument || entry.is_secret() {
                return Err(ConfigurationError::NotReferenceable { resource: name.to_string(), path: raw.clone() });
            }
            references.push(CompiledReference { path, multi, config: reference.clone() });
        }

        debug!(
            resource = %name,
            paths = index.len(),
            ignored = ignored.len(),
            references = references.len(),
            "resource configuration compiled"
        );
        Ok(Self { name: name.to_string(), config, index, ignored, ignore_when_set, references })
    }

    pub fn identity_strategy(&self) -> &dyn IdentityStrategy {
        match &self.config.identity.strategy {
            Some(s) => s.as_ref(),
            None => &DEFAULT_IDENTITY,
        }
    }

    pub fn name_initializer_enabled(&self) -> bool {
        !self.config.identity.disable_name_initializer
    }

    /// `path` equals or lies below an ignored path.
    pub fn is_ignored(&self, path: &FieldPath) -> bool {
        self.ignored.iter().any(|p| path.starts_with(p))
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    resources: FxHashMap<String, Arc<RegisteredResource>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and store `config` under `name`. A later registration for the
    /// same name replaces the earlier one.
    pub fn register(&mut self, name: &str, config: ResourceConfig) -> Result<(), ConfigurationError> {
        let compiled = RegisteredResource::compile(name, config)?;
        if self.resources.insert(name.to_string(), Arc::new(compiled)).is_some() {
            warn!(resource = %name, "resource registered twice; last registration wins");
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredResource>> {
        self.resources.get(name).cloned()
    }

    pub fn require(&self, name: &str) -> GraftResult<Arc<RegisteredResource>> {
        self.get(name).ok_or_else(|| GraftError::UnknownResource(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IdentityConfig, LateInitConfig};
    use graft_schema::{FieldSchema as F, ResourceSchema};

    fn schema() -> ResourceSchema {
        ResourceSchema::new(
            "example_db",
            vec![
                F::string("name").required(),
                F::int("storage_size"),
                F::block("storage_profile", vec![F::int("size")]),
                F::string("user"),
                F::list("security_group_ids", ScalarKind::String),
                F::string("arn").computed(),
            ],
        )
    }

    #[test]
    fn register_validates_paths() {
        let mut reg = Registry::new();
        let ok = ResourceConfig::new(schema())
            .with_late_init(LateInitConfig::default().ignore("storage_profile.size"))
            .with_reference("user", ReferenceConfig::to("User").unwrap())
            .with_reference("security_group_ids", ReferenceConfig::to("SecurityGroup").unwrap());
        reg.register("example_db", ok).unwrap();
        let r = reg.get("example_db").unwrap();
        assert!(r.is_ignored(&FieldPath::parse("storage_profile.size").unwrap()));
        assert!(r.references.iter().any(|c| c.multi));

        let bad = ResourceConfig::new(schema()).with_late_init(LateInitConfig::default().ignore("storage_profile.sise"));
        assert!(matches!(reg.register("x", bad), Err(ConfigurationError::UnknownPath { .. })));

        let computed_ref = ResourceConfig::new(schema()).with_reference("arn", ReferenceConfig::to("Role").unwrap());
        assert!(matches!(reg.register("x", computed_ref), Err(ConfigurationError::NotReferenceable { .. })));

        let int_ref = ResourceConfig::new(schema()).with_reference("storage_size", ReferenceConfig::to("Role").unwrap());
        assert!(matches!(reg.register("x", int_ref), Err(ConfigurationError::NotReferenceable { .. })));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn omitted_fields_cannot_be_configured() {
        let mut reg = Registry::new();
        let cfg = ResourceConfig::new(schema())
            .with_identity(IdentityConfig::name_as_identifier())
            .with_late_init(LateInitConfig::default().ignore("name"));
        assert!(matches!(reg.register("example_db", cfg), Err(ConfigurationError::UnknownPath { .. })));
    }

    #[test]
    fn last_registration_wins() {
        let mut reg = Registry::new();
        reg.register("example_db", ResourceConfig::new(schema())).unwrap();
        reg.register("example_db", ResourceConfig::new(schema()).with_identity(IdentityConfig::identifier_from_provider()))
            .unwrap();
        assert_eq!(reg.len(), 1);
        assert!(!reg.require("example_db").unwrap().name_initializer_enabled());
        assert!(matches!(reg.require("nope"), Err(GraftError::UnknownResource(_))));
    }
}
