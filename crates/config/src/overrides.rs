//! Operator-authored overrides in YAML, turned into [`ResourceConfig`]s.
//!
//! ```yaml
//! resources:
//!   - type: aws_s3_bucket
//!     identity:
//!       strategy: parameter
//!       parameter: bucket
//!       omittedFields: [bucket_prefix]
//!     references:
//!       logging_role: { kind: iam.example.io/v1/Role, fieldPath: status.atProvider.arn }
//!     sensitive:
//!       connectionDetails: { id: aws_access_key_id }
//!     lateInit:
//!       ignore: [storage_size]
//!       ignoreWhenSet: { storage_profile.size: storage_size }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use graft_core::ConfigurationError;
use graft_schema::ResourceSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::strategy::{FieldMapping, FieldValue};
use crate::{IdentityConfig, LateInitConfig, ReferenceConfig, Registry, ResourceConfig, Settings};

#[derive(Debug, thiserror::Error)]
pub enum OverridesError {
    #[error("document too large ({size} bytes > {max})")]
    TooLarge { size: usize, max: usize },
    #[error("parsing YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("overrides for {0} have no matching schema")]
    MissingSchema(String),
    #[error("identity strategy `parameter` for {0} needs `parameter`")]
    MissingParameter(String),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// Nothing injected, identity observed as `id`, name initializer on.
    #[default]
    Default,
    /// Identity is the `name` argument.
    Name,
    /// Identity is allocated by the provider.
    Provider,
    /// Identity is the argument named by `parameter`.
    Parameter,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IdentityOverride {
    #[serde(default)]
    pub strategy: IdentityKind,
    #[serde(default)]
    pub parameter: Option<String>,
    #[serde(default)]
    pub omitted_fields: BTreeSet<String>,
    #[serde(default)]
    pub disable_name_initializer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReferenceOverride {
    /// `Kind`, `v1/Kind` or `group/v1/Kind`.
    pub kind: String,
    /// Extract this referent field instead of its external identity.
    #[serde(default)]
    pub field_path: Option<String>,
    #[serde(default)]
    pub ref_field_name: Option<String>,
    #[serde(default)]
    pub selector_field_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SensitiveOverride {
    /// Raw attribute path -> payload key.
    #[serde(default)]
    pub connection_details: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LateInitOverride {
    #[serde(default)]
    pub ignore: BTreeSet<String>,
    #[serde(default)]
    pub ignore_when_set: BTreeMap<String, String>,
    #[serde(default)]
    pub keep_empty_values: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceOverride {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub identity: IdentityOverride,
    #[serde(default)]
    pub references: BTreeMap<String, ReferenceOverride>,
    #[serde(default)]
    pub sensitive: SensitiveOverride,
    #[serde(default)]
    pub late_init: LateInitOverride,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverridesFile {
    #[serde(default)]
    pub resources: Vec<ResourceOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaFile {
    #[serde(default)]
    pub schemas: Vec<ResourceSchema>,
}

fn check_size(doc: &str, settings: &Settings) -> Result<(), OverridesError> {
    if doc.len() > settings.max_overrides_bytes {
        return Err(OverridesError::TooLarge { size: doc.len(), max: settings.max_overrides_bytes });
    }
    Ok(())
}

/// Parse an overrides document (YAML or JSON).
pub fn parse_overrides(doc: &str, settings: &Settings) -> Result<OverridesFile, OverridesError> {
    check_size(doc, settings)?;
    Ok(serde_yaml::from_str(doc)?)
}

/// Parse a schema document (YAML or JSON).
pub fn parse_schemas(doc: &str, settings: &Settings) -> Result<Vec<ResourceSchema>, OverridesError> {
    check_size(doc, settings)?;
    let file: SchemaFile = serde_yaml::from_str(doc)?;
    Ok(file.schemas)
}

impl ResourceOverride {
    pub fn into_config(self, schema: ResourceSchema) -> Result<ResourceConfig, OverridesError> {
        let mut identity = match self.identity.strategy {
            IdentityKind::Default => IdentityConfig::default(),
            IdentityKind::Name => IdentityConfig::name_as_identifier(),
            IdentityKind::Provider => IdentityConfig::identifier_from_provider(),
            IdentityKind::Parameter => match self.identity.parameter.as_deref() {
                Some(p) => IdentityConfig::parameter_as_identifier(p),
                None => return Err(OverridesError::MissingParameter(self.type_name)),
            },
        };
        identity.omitted_fields.extend(self.identity.omitted_fields);
        if self.identity.disable_name_initializer {
            identity.disable_name_initializer = true;
        }

        let mut config = ResourceConfig::new(schema).with_identity(identity);
        for (path, r) in self.references {
            let mut reference = ReferenceConfig::to(&r.kind)?;
            if let Some(fp) = r.field_path.as_deref() {
                reference = reference.with_extractor(FieldValue::new(fp));
            }
            if let Some(n) = r.ref_field_name.as_deref() {
                reference = reference.with_ref_field_name(n);
            }
            if let Some(n) = r.selector_field_name.as_deref() {
                reference = reference.with_selector_field_name(n);
            }
            config = config.with_reference(&path, reference);
        }
        if !self.sensitive.connection_details.is_empty() {
            config = config.with_sensitive_extractor(self.sensitive.connection_details.into_iter().collect::<FieldMapping>());
        }
        config.late_init = LateInitConfig {
            ignored: self.late_init.ignore,
            ignore_when_set: self.late_init.ignore_when_set,
            keep_empty_values: self.late_init.keep_empty_values,
        };
        Ok(config)
    }
}

/// Register every schema, applying the matching override when present.
/// Overrides naming an unknown type are an error.
pub fn build_registry(schemas: Vec<ResourceSchema>, overrides: OverridesFile) -> Result<Registry, OverridesError> {
    let mut by_type: BTreeMap<String, ResourceOverride> =
        overrides.resources.into_iter().map(|o| (o.type_name.clone(), o)).collect();
    let mut registry = Registry::new();
    for schema in schemas {
        let name = schema.name.clone();
        let config = match by_type.remove(&name) {
            Some(o) => o.into_config(schema)?,
            None => ResourceConfig::new(schema),
        };
        registry.register(&name, config)?;
    }
    if let Some(orphan) = by_type.into_keys().next() {
        return Err(OverridesError::MissingSchema(orphan));
    }
    info!(resources = registry.len(), "registry built");
    Ok(registry)
}
