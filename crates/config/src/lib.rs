//! Graft configuration: the immutable per-resource-type overrides an operator
//! registers at startup, the strategies they carry, and the registry holding
//! them.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use graft_core::KindRef;
use graft_schema::ResourceSchema;

pub mod overrides;
pub mod registry;
pub mod settings;
pub mod strategy;

pub use registry::{CompiledReference, RegisteredResource, Registry};
pub use settings::Settings;
pub use strategy::{
    ExternalName, FieldMapping, FieldValue, IdentityStrategy, NameAsIdentifier, ParameterAsIdentifier,
    ProviderIdentifier, ReferenceExtractor, SensitiveExtractor,
};

/// Everything the engine needs to know about one external resource type.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub schema: ResourceSchema,
    pub identity: IdentityConfig,
    /// Keyed by canonical field path of the referencing field.
    pub references: BTreeMap<String, ReferenceConfig>,
    pub sensitive: SensitiveConfig,
    pub late_init: LateInitConfig,
}

impl ResourceConfig {
    pub fn new(schema: ResourceSchema) -> Self {
        Self {
            schema,
            identity: IdentityConfig::default(),
            references: BTreeMap::new(),
            sensitive: SensitiveConfig::default(),
            late_init: LateInitConfig::default(),
        }
    }

    pub fn with_identity(mut self, identity: IdentityConfig) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_reference(mut self, path: &str, reference: ReferenceConfig) -> Self {
        self.references.insert(path.to_string(), reference);
        self
    }

    pub fn with_sensitive_extractor(mut self, extractor: impl SensitiveExtractor + 'static) -> Self {
        self.sensitive.extractor = Some(Arc::new(extractor));
        self
    }

    pub fn with_late_init(mut self, late_init: LateInitConfig) -> Self {
        self.late_init = late_init;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityConfig {
    /// `None` injects nothing and reads the observed `id`.
    pub strategy: Option<Arc<dyn IdentityStrategy>>,
    /// Top-level fields left out of the typed spec because the identity
    /// already carries them.
    pub omitted_fields: BTreeSet<String>,
    /// Identity is provider-assigned; never default it to the metadata name.
    pub disable_name_initializer: bool,
}

impl IdentityConfig {
    /// The provider allocates the identity (an id, an ARN); creation has to
    /// wait for it.
    pub fn identifier_from_provider() -> Self {
        Self { strategy: Some(Arc::new(ProviderIdentifier)), omitted_fields: BTreeSet::new(), disable_name_initializer: true }
    }

    /// The identity is the `name` argument.
    pub fn name_as_identifier() -> Self {
        Self::parameter_as_identifier("name")
    }

    /// The identity is the given top-level argument.
    pub fn parameter_as_identifier(param: &str) -> Self {
        let mut omitted = BTreeSet::new();
        omitted.insert(param.to_string());
        Self { strategy: Some(Arc::new(ParameterAsIdentifier::new(param))), omitted_fields: omitted, disable_name_initializer: false }
    }

    pub fn with_strategy(mut self, strategy: impl IdentityStrategy + 'static) -> Self {
        self.strategy = Some(Arc::new(strategy));
        self
    }

    pub fn omit(mut self, field: &str) -> Self {
        self.omitted_fields.insert(field.to_string());
        self
    }

    pub fn without_name_initializer(mut self) -> Self {
        self.disable_name_initializer = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    pub target: KindRef,
    /// `None` extracts the referent's external identity.
    pub extractor: Option<Arc<dyn ReferenceExtractor>>,
    /// Typed-tree name of the `{name}` reference field; defaults to
    /// `<field>Ref` (`<field>Refs` for lists).
    pub ref_field_name: Option<String>,
    /// Typed-tree name of the label selector field; defaults to `<field>Selector`.
    pub selector_field_name: Option<String>,
}

static DEFAULT_EXTRACTOR: ExternalName = ExternalName;

impl ReferenceConfig {
    pub fn new(target: KindRef) -> Self {
        Self { target, extractor: None, ref_field_name: None, selector_field_name: None }
    }

    pub fn to(kind: &str) -> Result<Self, graft_core::ConfigurationError> {
        Ok(Self::new(KindRef::parse(kind)?))
    }

    pub fn with_extractor(mut self, extractor: impl ReferenceExtractor + 'static) -> Self {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    pub fn with_ref_field_name(mut self, name: &str) -> Self {
        self.ref_field_name = Some(name.to_string());
        self
    }

    pub fn with_selector_field_name(mut self, name: &str) -> Self {
        self.selector_field_name = Some(name.to_string());
        self
    }

    pub fn extractor(&self) -> &dyn ReferenceExtractor {
        match &self.extractor {
            Some(e) => e.as_ref(),
            None => &DEFAULT_EXTRACTOR,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SensitiveConfig {
    /// Runs over the original raw tree; its keys are added to the payload.
    pub extractor: Option<Arc<dyn SensitiveExtractor>>,
}

#[derive(Debug, Clone, Default)]
pub struct LateInitConfig {
    /// Canonical paths never late-initialized (whole subtrees for blocks).
    pub ignored: BTreeSet<String>,
    /// `path -> guard`: skip `path` when `guard` is already set in the spec.
    pub ignore_when_set: BTreeMap<String, String>,
    /// Fill from empty strings, lists and maps too.
    pub keep_empty_values: bool,
}

impl LateInitConfig {
    pub fn ignore(mut self, path: &str) -> Self {
        self.ignored.insert(path.to_string());
        self
    }

    pub fn ignore_when_set(mut self, path: &str, guard: &str) -> Self {
        self.ignore_when_set.insert(path.to_string(), guard.to_string());
        self
    }

    pub fn keep_empty_values(mut self) -> Self {
        self.keep_empty_values = true;
        self
    }
}
