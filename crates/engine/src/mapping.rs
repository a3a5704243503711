//! Mapping handles and the service consumers use to obtain them.
//!
//! The engine never pushes updates to holders of a [`Mapping`]. Every
//! [`Mapping::resolve`] call re-runs the merge against the live provider set;
//! [`Mapping::is_stale`] and [`ChangeTracker`] let callers notice that the set
//! changed so they can re-fetch or re-resolve.

use std::{fmt, sync::Arc};

use confmap_types::{MappingIdentity, Properties, ProviderKey};

use crate::{
    error::ResolutionError,
    provider::{ProviderRegistry, RegistrySnapshot},
    resolve::{self, Resolution},
    store::ConfigStore,
};

/// Bindings of the providers that claim an identity, in registry order.
fn fingerprint(snapshot: &RegistrySnapshot, identity: &MappingIdentity) -> Vec<u64> {
    resolve::applicable(snapshot, identity)
        .into_iter()
        .map(|entry| entry.binding)
        .collect()
}

/// Live handle to the resolved configuration of one identity.
#[derive(Clone)]
pub struct Mapping {
    identity: MappingIdentity,
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn ConfigStore>,
    created_generation: u64,
    fingerprint: Vec<u64>,
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping")
            .field("identity", &self.identity)
            .field("created_generation", &self.created_generation)
            .field("providers", &self.fingerprint.len())
            .finish()
    }
}

impl Mapping {
    pub fn identity(&self) -> &MappingIdentity {
        &self.identity
    }

    /// Registry generation observed when this handle was created.
    pub fn created_generation(&self) -> u64 {
        self.created_generation
    }

    /// Merges all current contributions for this identity.
    pub fn resolve(&self) -> Result<Properties, ResolutionError> {
        self.resolve_detailed().map(|resolution| resolution.properties)
    }

    pub fn resolve_detailed(&self) -> Result<Resolution, ResolutionError> {
        resolve::resolve_snapshot(&self.registry.snapshot(), &self.identity, self.store.as_ref())
    }

    /// Whether the providers claiming this identity changed since the handle
    /// was created. Changes to unrelated providers do not make it stale.
    pub fn is_stale(&self) -> bool {
        let snapshot = self.registry.snapshot();
        if snapshot.generation == self.created_generation {
            return false;
        }
        fingerprint(&snapshot, &self.identity) != self.fingerprint
    }
}

/// Entry point for consumers: looks up mappings against a shared registry
/// and configuration store.
#[derive(Clone)]
pub struct MappingService {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn ConfigStore>,
}

impl fmt::Debug for MappingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingService")
            .field("registry", &self.registry)
            .field("store", &self.store)
            .finish()
    }
}

impl MappingService {
    pub fn new(registry: Arc<ProviderRegistry>, store: Arc<dyn ConfigStore>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Returns a handle for `identity` if at least one bound provider claims it.
    pub fn get_mapping(&self, identity: &MappingIdentity) -> Option<Mapping> {
        let snapshot = self.registry.snapshot();
        let fingerprint = fingerprint(&snapshot, identity);
        if fingerprint.is_empty() {
            return None;
        }
        Some(Mapping {
            identity: identity.clone(),
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            created_generation: snapshot.generation,
            fingerprint,
        })
    }

    /// Resolves `identity` directly; an identity nobody claims yields an empty map.
    pub fn resolve(&self, identity: &MappingIdentity) -> Result<Properties, ResolutionError> {
        self.resolve_detailed(identity).map(|resolution| resolution.properties)
    }

    pub fn resolve_detailed(&self, identity: &MappingIdentity) -> Result<Resolution, ResolutionError> {
        resolve::resolve_snapshot(&self.registry.snapshot(), identity, self.store.as_ref())
    }

    /// Full providers tied at the top rank for `identity` (a configuration conflict).
    pub fn full_provider_conflicts(&self, identity: &MappingIdentity) -> Vec<ProviderKey> {
        resolve::full_provider_conflicts(&self.registry.snapshot(), identity)
    }
}

/// Remembers the last registry generation a consumer acted on.
#[derive(Debug)]
pub struct ChangeTracker {
    registry: Arc<ProviderRegistry>,
    seen: u64,
}

impl ChangeTracker {
    /// Starts tracking from the registry's current generation.
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        let seen = registry.generation();
        Self { registry, seen }
    }

    /// Starts tracking so that the first `changed()` call reports a change.
    pub fn unsynced(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry, seen: u64::MAX }
    }

    /// Returns `true` once per registry change and records the new generation.
    pub fn changed(&mut self) -> bool {
        let current = self.registry.generation();
        if current == self.seen {
            return false;
        }
        self.seen = current;
        true
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{provider::StaticProvider, store::EmptyConfigStore};
    use serde_json::json;

    fn service() -> MappingService {
        MappingService::new(Arc::new(ProviderRegistry::new()), Arc::new(EmptyConfigStore))
    }

    fn props(key: &str, value: i64) -> Properties {
        Properties::from([(key.to_string(), json!(value))])
    }

    #[test]
    fn get_mapping_requires_a_claiming_provider() {
        let service = service();
        let identity = MappingIdentity::new("ddf.sts");
        assert!(service.get_mapping(&identity).is_none());
        assert!(service.resolve(&identity).expect("empty resolve").is_empty());

        service
            .registry()
            .bind(Arc::new(StaticProvider::partial("p", props("a", 1)).for_name("ddf.sts")));
        let mapping = service.get_mapping(&identity).expect("mapping");
        assert_eq!(mapping.identity(), &identity);
        assert_eq!(mapping.resolve().expect("resolve"), props("a", 1));
    }

    #[test]
    fn unrelated_changes_do_not_make_mapping_stale() {
        let service = service();
        let identity = MappingIdentity::new("ddf.sts");
        service
            .registry()
            .bind(Arc::new(StaticProvider::partial("sts", props("a", 1)).for_name("ddf.sts")));
        let mapping = service.get_mapping(&identity).expect("mapping");

        service
            .registry()
            .bind(Arc::new(StaticProvider::partial("other", props("b", 1)).for_name("ddf.platform")));
        assert!(!mapping.is_stale());

        service
            .registry()
            .bind(Arc::new(StaticProvider::partial("sts-extra", props("c", 1)).for_name("ddf.sts")));
        assert!(mapping.is_stale());
    }

    #[test]
    fn replacement_makes_mapping_stale_but_resolve_stays_live() {
        let service = service();
        let identity = MappingIdentity::new("ddf.sts");
        let key = ProviderKey::from("sts");
        service.registry().bind(Arc::new(StaticProvider::partial("sts", props("a", 1))));
        let mapping = service.get_mapping(&identity).expect("mapping");

        service
            .registry()
            .update(&key, Some(Arc::new(StaticProvider::partial("sts", props("a", 2)))));
        assert!(mapping.is_stale());
        assert_eq!(mapping.resolve().expect("resolve"), props("a", 2));
    }

    #[test]
    fn change_tracker_reports_each_change_once() {
        let registry = Arc::new(ProviderRegistry::new());
        let mut tracker = ChangeTracker::new(Arc::clone(&registry));
        assert!(!tracker.changed());

        registry.bind(Arc::new(StaticProvider::partial("a", Properties::new())));
        assert!(tracker.changed());
        assert!(!tracker.changed());

        let mut fresh = ChangeTracker::unsynced(registry);
        assert!(fresh.changed());
        assert_eq!(fresh.seen(), 1);
    }
}
