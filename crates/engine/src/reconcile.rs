//! Reconciliation entry points: what a driver calls after observing a
//! resource and before submitting it to the external system.

use std::sync::Arc;

use graft_config::{RegisteredResource, Registry, Settings};
use graft_core::{Attributes, Condition, ConnectionPayload, GraftError, GraftResult, ManagedResource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::identity::{self, Identity, Observation};
use crate::lateinit::{self, LateInitOutcome};
use crate::reference::{self, ReferenceLookup, ResolveContext};
use crate::sensitive;

#[derive(Debug)]
pub struct Observed {
    pub identity: Identity,
    pub annotation_changed: bool,
    pub spec_changed: bool,
    pub filled: Vec<String>,
    pub skipped_mismatch: Vec<GraftError>,
    /// Non-secret argument fields as observed, typed names.
    pub parameters: Attributes,
    pub payload: ConnectionPayload,
}

impl Observed {
    /// The typed resource has to be persisted.
    pub fn changed(&self) -> bool {
        self.annotation_changed || self.spec_changed
    }
}

#[derive(Debug)]
pub struct Prepared {
    /// Argument map for the external system, raw names.
    pub args: Attributes,
    /// `None` until the provider has assigned one.
    pub identity: Option<Identity>,
    pub import_id: Option<String>,
}

pub struct Engine<'r> {
    registry: &'r Registry,
    settings: Settings,
}

fn mark_failed(resource: &mut ManagedResource, err: &GraftError) {
    resource.set_condition(Condition::unavailable(err.reason(), err.to_string()));
}

/// Submission problems live on `Synced` only; `Ready` tracks the last
/// observation.
fn mark_sync_failed(resource: &mut ManagedResource, err: &GraftError) {
    resource.set_condition(Condition::sync_failed(err.reason(), err.to_string()));
}

impl<'r> Engine<'r> {
    pub fn new(registry: &'r Registry, settings: &Settings) -> Self {
        Self { registry, settings: settings.clone() }
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn registered(&self, type_name: &str, resource: &mut ManagedResource) -> GraftResult<Arc<RegisteredResource>> {
        self.registry.require(type_name).map_err(|e| {
            mark_failed(resource, &e);
            e
        })
    }

    /// Fold an observation of the external system into the typed resource:
    /// record the identity, late-initialize the spec and publish the
    /// non-secret state. The secret part is returned, never stored.
    pub fn observe(&self, type_name: &str, resource: &mut ManagedResource, observed: &Attributes) -> GraftResult<Observed> {
        let reg = self.registered(type_name, resource)?;
        match observe_registered(&reg, resource, observed) {
            Ok(o) => Ok(o),
            Err(e) => {
                mark_failed(resource, &e);
                Err(e)
            }
        }
    }

    /// Adopt an existing external resource by its import id.
    pub fn adopt(&self, type_name: &str, resource: &mut ManagedResource, import_id: &str) -> GraftResult<Identity> {
        let reg = self.registered(type_name, resource)?;
        match identity::decode(resource, Observation::Import(import_id), &reg) {
            Ok(id) => {
                identity::annotate(resource, &id);
                Ok(id)
            }
            Err(e) => {
                mark_failed(resource, &e);
                Err(e)
            }
        }
    }

    /// Build the argument map to submit: resolve references, convert the
    /// typed spec and inject the identity.
    pub async fn prepare<L: ReferenceLookup + ?Sized>(
        &self,
        type_name: &str,
        resource: &mut ManagedResource,
        lookup: &L,
        cancel: &CancellationToken,
    ) -> GraftResult<Prepared> {
        let reg = self.registered(type_name, resource)?;
        let ctx = ResolveContext::new(self.settings.lookup_timeout).with_cancel(cancel.clone());
        let resolution = reference::resolve(&resource.spec.for_provider, &reg, lookup, &ctx).await;
        if let Some(err) = resolution.not_ready() {
            info!(resource = %reg.name, name = %resource.name(), missing = ?resolution.missing, timed_out = resolution.timed_out, "references not ready");
            mark_sync_failed(resource, &err);
            return Err(err);
        }

        let mut args = reg.index.typed_to_raw(&resource.spec.for_provider);
        reference::apply_overrides(&mut args, &resolution);

        // Provider-assigned identities only exist after creation.
        let identity = if resource.external_name().is_none() && !reg.name_initializer_enabled() {
            None
        } else {
            let id = identity::decode(resource, Observation::Nothing, &reg).map_err(|e| {
                mark_sync_failed(resource, &e);
                e
            })?;
            identity::annotate(resource, &id);
            args = identity::encode(&id.value, &args, &reg);
            Some(id)
        };
        let import_id = identity.as_ref().map(|id| identity::import_id(&id.value, &args, &reg));

        debug!(resource = %reg.name, name = %resource.name(), args = args.len(), identity = ?identity.as_ref().map(|i| &i.value), "arguments prepared");
        resource.set_condition(Condition::synced());
        Ok(Prepared { args, identity, import_id })
    }
}

fn observe_registered(reg: &RegisteredResource, resource: &mut ManagedResource, observed: &Attributes) -> GraftResult<Observed> {
    let identity = identity::decode(resource, Observation::State(observed), reg)?;
    let partition = sensitive::partition(observed, reg)?;
    let annotation_changed = identity::annotate(resource, &identity);

    let LateInitOutcome { spec, changed, filled, skipped_mismatch } =
        lateinit::merge(&resource.spec.for_provider, observed, reg);
    resource.spec.for_provider = spec;
    resource.status.at_provider = partition.observation;
    resource.set_condition(Condition::available());

    Ok(Observed {
        identity,
        annotation_changed,
        spec_changed: changed,
        filled,
        skipped_mismatch,
        parameters: partition.parameters,
        payload: partition.payload,
    })
}
