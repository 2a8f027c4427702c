//! Graft core types: canonical field paths, raw attribute trees, the managed
//! resource model and the error taxonomy shared by every other crate.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod path;
pub mod raw;
pub mod resource;

pub use path::{ConcretePath, FieldPath, Segment, Step};
pub use raw::Attributes;
pub use resource::{Condition, ConditionStatus, ManagedResource, Referent, EXTERNAL_NAME_ANNOTATION};

/// Secret material for one resource: payload key -> bytes.
///
/// Rebuilt on every reconciliation; a `BTreeMap` keeps key order stable so
/// downstream secret writes do not churn.
pub type ConnectionPayload = BTreeMap<String, Vec<u8>>;

/// Prefix for payload keys derived from schema-sensitive raw paths.
pub const ATTRIBUTE_PREFIX: &str = "attribute.";

/// Separator between path segments inside flattened payload keys.
pub const PAYLOAD_KEY_SEPARATOR: char = '.';

pub mod prelude {
    pub use super::{
        Attributes, ConcretePath, Condition, ConditionStatus, ConfigurationError, ConnectionPayload, FieldPath,
        GraftError, GraftResult, KindRef, ManagedResource, Referent, Segment, Step,
    };
}

/// Registration-time errors. Fatal at startup, never produced at runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("invalid field path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("{resource}: unknown field path {path}")]
    UnknownPath { resource: String, path: String },
    #[error("{resource}: omitted field {field} is not a top-level field")]
    OmittedFieldNotTopLevel { resource: String, field: String },
    #[error("{resource}: reference path {path} must address a string or a list of strings")]
    NotReferenceable { resource: String, path: String },
    #[error("invalid kind reference {0:?} (expect Kind, v1/Kind or group/v1/Kind)")]
    InvalidKind(String),
}

/// Runtime error taxonomy of the engine.
#[derive(Debug, thiserror::Error)]
pub enum GraftError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("no configuration registered for resource type {0}")]
    UnknownResource(String),
    #[error("cannot determine external identity of {name:?}: nothing observed and name initializer is disabled")]
    IdentityUndetermined { name: String },
    #[error("references not ready: {}", .missing.join(", "))]
    ReferenceNotReady { missing: Vec<String>, timed_out: bool },
    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    MergeTypeMismatch { path: String, expected: &'static str, found: &'static str },
    #[error("connection detail extraction failed: {0}")]
    Extraction(String),
    #[error("reference lookup failed: {0}")]
    Lookup(String),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

impl GraftError {
    /// Short machine-readable reason used on status conditions.
    pub fn reason(&self) -> &'static str {
        match self {
            GraftError::Configuration(_) => "ConfigurationError",
            GraftError::UnknownResource(_) => "UnknownResource",
            GraftError::IdentityUndetermined { .. } => "IdentityUndetermined",
            GraftError::ReferenceNotReady { .. } => "ReferenceNotReady",
            GraftError::MergeTypeMismatch { .. } => "MergeTypeMismatch",
            GraftError::Extraction(_) => "ConnectionDetailsError",
            GraftError::Lookup(_) => "ReferenceLookupError",
            GraftError::Serde(_) => "SerializationError",
        }
    }
}

pub type GraftResult<T> = Result<T, GraftError>;

/// Target of a reference: a bare kind, optionally qualified by version and group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KindRef {
    pub group: Option<String>,
    pub version: Option<String>,
    pub kind: String,
}

impl KindRef {
    pub fn parse(key: &str) -> Result<Self, ConfigurationError> {
        let parts: Vec<&str> = key.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ConfigurationError::InvalidKind(key.to_string()));
        }
        match parts.as_slice() {
            [kind] => Ok(Self { group: None, version: None, kind: (*kind).to_string() }),
            [version, kind] => Ok(Self { group: None, version: Some((*version).to_string()), kind: (*kind).to_string() }),
            [group, version, kind] => Ok(Self {
                group: Some((*group).to_string()),
                version: Some((*version).to_string()),
                kind: (*kind).to_string(),
            }),
            _ => Err(ConfigurationError::InvalidKind(key.to_string())),
        }
    }

    pub fn is_qualified(&self) -> bool {
        self.group.is_some()
    }
}

impl fmt::Display for KindRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(g) = &self.group {
            write!(f, "{}/", g)?;
        }
        if let Some(v) = &self.version {
            write!(f, "{}/", v)?;
        }
        f.write_str(&self.kind)
    }
}

impl TryFrom<String> for KindRef {
    type Error = ConfigurationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        KindRef::parse(&s)
    }
}

impl From<KindRef> for String {
    fn from(k: KindRef) -> Self {
        k.to_string()
    }
}
