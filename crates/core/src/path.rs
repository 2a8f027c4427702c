//! Canonical field paths.
//!
//! A [`FieldPath`] addresses one field of a resource schema, independently of
//! any concrete tree: `delegation[].name` names the `name` field of every
//! element of the `delegation` list. Resolving it against a tree yields zero
//! or more [`ConcretePath`]s (`delegation[0].name`, `delegation[1].name`, ...).

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ConfigurationError;

static FIELD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("field name pattern is valid"));

const EACH_SUFFIX: &str = "[]";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Field(String),
    /// Every element of the list addressed by the preceding segment.
    Each,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    segments: SmallVec<[Segment; 4]>,
}

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(s: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidPath { path: s.to_string(), reason: reason.to_string() };
        if s.is_empty() {
            return Err(invalid("empty path"));
        }
        let mut segments = SmallVec::new();
        for part in s.split('.') {
            let (name, each) = match part.strip_suffix(EACH_SUFFIX) {
                Some(name) => (name, true),
                None => (part, false),
            };
            if name.is_empty() {
                return Err(invalid("empty segment"));
            }
            if !FIELD_NAME.is_match(name) {
                return Err(invalid("segments must be identifiers, optionally suffixed with []"));
            }
            segments.push(Segment::Field(name.to_string()));
            if each {
                segments.push(Segment::Each);
            }
        }
        Ok(Self { segments })
    }

    pub fn child(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.segments.push(Segment::Field(name.to_string()));
        next
    }

    pub fn each(&self) -> Self {
        let mut next = self.clone();
        next.segments.push(Segment::Each);
        next
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True for a single named field directly below the root.
    pub fn is_top_level(&self) -> bool {
        matches!(self.segments.as_slice(), [Segment::Field(_)])
    }

    /// Name of the last named segment, if any.
    pub fn leaf_name(&self) -> Option<&str> {
        self.segments.iter().rev().find_map(|s| match s {
            Segment::Field(n) => Some(n.as_str()),
            Segment::Each => None,
        })
    }

    pub fn has_repetition(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Each))
    }

    /// `self` equals `prefix` or lies underneath it.
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.segments.len() >= prefix.segments.len() && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// `a[]` and `a` name the same field; drop trailing repetition markers.
    pub fn without_trailing_each(&self) -> FieldPath {
        let mut segments = self.segments.clone();
        while matches!(segments.last(), Some(Segment::Each)) {
            segments.pop();
        }
        Self { segments }
    }

    /// Path of the enclosing field, dropping the last named segment and any
    /// repetition marker following it.
    pub fn parent(&self) -> Option<FieldPath> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        while matches!(segments.last(), Some(Segment::Each)) {
            segments.pop();
        }
        segments.pop();
        Some(Self { segments })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for seg in &self.segments {
            match seg {
                Segment::Field(name) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                    first = false;
                }
                Segment::Each => f.write_str(EACH_SUFFIX)?,
            }
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = ConfigurationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = ConfigurationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<FieldPath> for String {
    fn from(p: FieldPath) -> Self {
        p.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Step {
    Key(String),
    Index(usize),
}

/// A fully resolved location inside one concrete tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConcretePath {
    steps: SmallVec<[Step; 6]>,
}

impl ConcretePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn key(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.steps.push(Step::Key(name.to_string()));
        next
    }

    pub fn index(&self, i: usize) -> Self {
        let mut next = self.clone();
        next.steps.push(Step::Index(i));
        next
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Flattened form used for payload keys: `rule.1.user`.
    pub fn dotted(&self) -> String {
        let mut out = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                out.push(crate::PAYLOAD_KEY_SEPARATOR);
            }
            match step {
                Step::Key(k) => out.push_str(k),
                Step::Index(n) => out.push_str(&n.to_string()),
            }
        }
        out
    }

    /// Forget element positions: `rule[1].user` -> `rule[].user`.
    pub fn canonical(&self) -> FieldPath {
        let mut p = FieldPath::root();
        for step in &self.steps {
            p = match step {
                Step::Key(k) => p.child(k),
                Step::Index(_) => p.each(),
            };
        }
        p
    }
}

impl fmt::Display for ConcretePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            match step {
                Step::Key(k) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(k)?;
                }
                Step::Index(n) => write!(f, "[{}]", n)?,
            }
        }
        Ok(())
    }
}
