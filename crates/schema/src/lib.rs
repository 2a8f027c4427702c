//! Graft schema: the static shape of a typed resource and its compiled path index.
//!
//! Schemas are produced by an external generator; this crate only describes
//! them and compiles them into a [`PathIndex`] once, at registration.

#![forbid(unsafe_code)]

use heck::ToLowerCamelCase;
use serde::{Deserialize, Serialize};

mod index;

pub use index::{FieldEntry, Location, Naming, PathIndex, Shape};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// External resource type name, e.g. `aws_iam_access_key`.
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl ResourceSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self { name: name.into(), fields }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    String,
    Int,
    Float,
    Bool,
}

impl ScalarKind {
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Bool => "bool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Scalar { of: ScalarKind },
    List { of: ScalarKind },
    Map { of: ScalarKind },
    Block { fields: Vec<FieldSchema> },
    BlockList { fields: Vec<FieldSchema> },
}

/// How the external system treats a field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldMode {
    Required,
    #[default]
    Optional,
    /// Output only; never part of the desired state.
    Computed,
    /// Optional input the external system fills in when omitted.
    OptionalComputed,
}

impl FieldMode {
    pub fn is_argument(self) -> bool {
        !matches!(self, FieldMode::Computed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    /// Canonical (raw attribute) name, snake_case.
    pub name: String,
    /// Name in the typed tree; defaults to the lowerCamelCase of `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_name: Option<String>,
    pub kind: FieldKind,
    #[serde(default)]
    pub mode: FieldMode,
    #[serde(default)]
    pub sensitive: bool,
}

impl FieldSchema {
    fn with_kind(name: &str, kind: FieldKind) -> Self {
        Self { name: name.to_string(), json_name: None, kind, mode: FieldMode::Optional, sensitive: false }
    }

    pub fn string(name: &str) -> Self {
        Self::with_kind(name, FieldKind::Scalar { of: ScalarKind::String })
    }

    pub fn int(name: &str) -> Self {
        Self::with_kind(name, FieldKind::Scalar { of: ScalarKind::Int })
    }

    pub fn float(name: &str) -> Self {
        Self::with_kind(name, FieldKind::Scalar { of: ScalarKind::Float })
    }

    pub fn bool(name: &str) -> Self {
        Self::with_kind(name, FieldKind::Scalar { of: ScalarKind::Bool })
    }

    pub fn list(name: &str, of: ScalarKind) -> Self {
        Self::with_kind(name, FieldKind::List { of })
    }

    pub fn map(name: &str, of: ScalarKind) -> Self {
        Self::with_kind(name, FieldKind::Map { of })
    }

    pub fn block(name: &str, fields: Vec<FieldSchema>) -> Self {
        Self::with_kind(name, FieldKind::Block { fields })
    }

    pub fn block_list(name: &str, fields: Vec<FieldSchema>) -> Self {
        Self::with_kind(name, FieldKind::BlockList { fields })
    }

    pub fn required(mut self) -> Self {
        self.mode = FieldMode::Required;
        self
    }

    pub fn computed(mut self) -> Self {
        self.mode = FieldMode::Computed;
        self
    }

    pub fn optional_computed(mut self) -> Self {
        self.mode = FieldMode::OptionalComputed;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn with_json_name(mut self, json_name: &str) -> Self {
        self.json_name = Some(json_name.to_string());
        self
    }

    pub fn typed_name(&self) -> String {
        self.json_name.clone().unwrap_or_else(|| self.name.to_lower_camel_case())
    }

    /// Nested fields of a block or list of blocks.
    pub fn children(&self) -> Option<&[FieldSchema]> {
        match &self.kind {
            FieldKind::Block { fields } | FieldKind::BlockList { fields } => Some(fields),
            FieldKind::Scalar { .. } | FieldKind::List { .. } | FieldKind::Map { .. } => None,
        }
    }
}
