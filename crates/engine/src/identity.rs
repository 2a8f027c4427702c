//! Identity codec: external identity <-> annotation and argument map.

use graft_config::RegisteredResource;
use graft_core::{Attributes, GraftError, GraftResult, ManagedResource};
use metrics::counter;
use tracing::{debug, warn};

/// What the external system told us, if anything.
#[derive(Debug, Clone, Copy)]
pub enum Observation<'a> {
    Nothing,
    /// Observed state after create/refresh.
    State(&'a Attributes),
    /// Operator-supplied import id.
    Import(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    Annotation,
    Import,
    Observed,
    Name,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub value: String,
    pub source: IdentitySource,
}

/// Determine the external identity of `resource`.
///
/// An existing annotation always wins. Without one, the import id or the
/// observed state is used, then the metadata name when the name initializer
/// is enabled.
pub fn decode(resource: &ManagedResource, observation: Observation<'_>, reg: &RegisteredResource) -> GraftResult<Identity> {
    let observed = match observation {
        Observation::Nothing => None,
        Observation::State(state) => reg.identity_strategy().external_name(state).map(|v| (v, IdentitySource::Observed)),
        Observation::Import(id) => Some(id.to_string()).filter(|s| !s.is_empty()).map(|v| (v, IdentitySource::Import)),
    };

    if let Some(current) = resource.external_name() {
        if let Some((obs, _)) = observed.as_ref().filter(|(obs, _)| obs != current) {
            warn!(
                resource = %reg.name,
                name = %resource.name(),
                annotation = %current,
                observed = %obs,
                "observed identity differs from annotation; keeping annotation"
            );
        }
        return Ok(Identity { value: current.to_string(), source: IdentitySource::Annotation });
    }

    if let Some((value, source)) = observed {
        return Ok(Identity { value, source });
    }

    if reg.name_initializer_enabled() && !resource.name().is_empty() {
        return Ok(Identity { value: resource.name().to_string(), source: IdentitySource::Name });
    }

    counter!("graft_identity_undetermined_total", 1u64);
    Err(GraftError::IdentityUndetermined { name: resource.name().to_string() })
}

/// Inject `identity` into a copy of `args` using the configured strategy.
pub fn encode(identity: &str, args: &Attributes, reg: &RegisteredResource) -> Attributes {
    let mut out = args.clone();
    reg.identity_strategy().set_identifier_argument(&mut out, identity);
    out
}

/// Record `identity` on the resource. Returns whether the annotation changed.
pub fn annotate(resource: &mut ManagedResource, identity: &Identity) -> bool {
    if resource.external_name() == Some(identity.value.as_str()) {
        return false;
    }
    debug!(name = %resource.name(), identity = %identity.value, source = ?identity.source, "setting external name");
    resource.set_external_name(&identity.value);
    true
}

/// Id the external tool needs to import the resource.
pub fn import_id(identity: &str, args: &Attributes, reg: &RegisteredResource) -> String {
    reg.identity_strategy().import_id(identity, args)
}
