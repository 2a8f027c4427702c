//! Graft engine: the four reconciliation components and the entry points a
//! driver calls around each external apply.

#![forbid(unsafe_code)]

pub mod identity;
pub mod lateinit;
pub mod reconcile;
pub mod reference;
pub mod sensitive;

pub use identity::{Identity, IdentitySource, Observation};
pub use lateinit::LateInitOutcome;
pub use reconcile::{Engine, Observed, Prepared};
pub use reference::{apply_overrides, MemoryLookup, Override, ReferenceLookup, Resolution, ResolveContext};
pub use sensitive::Partition;
