use std::{
    cmp::Reverse,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use confmap_types::ProviderKey;
use tracing::{debug, info, warn};

use super::{MappingProvider, provider_kind};
use crate::error::ProviderLoadError;

/// A bound provider together with the ordering data captured at bind time.
#[derive(Clone)]
pub struct RegisteredProvider {
    pub provider: Arc<dyn MappingProvider>,
    pub key: ProviderKey,
    pub rank: i32,
    pub partial: bool,
    /// Monotonic bind order; ties between equal ranks are broken by it.
    /// Survives `update`, so a reloaded provider keeps its place.
    pub sequence: u64,
    /// Unique per bind or replacement; changes whenever the instance changes.
    pub binding: u64,
}

impl fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("key", &self.key)
            .field("rank", &self.rank)
            .field("partial", &self.partial)
            .field("sequence", &self.sequence)
            .field("binding", &self.binding)
            .finish()
    }
}

impl RegisteredProvider {
    fn new(provider: Arc<dyn MappingProvider>, sequence: u64, binding: u64) -> Self {
        Self {
            key: provider.key(),
            rank: provider.rank(),
            partial: provider.is_partial(),
            provider,
            sequence,
            binding,
        }
    }

    /// Sort key for descending rank, then ascending bind order.
    fn order(&self) -> (Reverse<i32>, u64) {
        (Reverse(self.rank), self.sequence)
    }
}

/// Point-in-time view of the registry used by a single resolution.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub generation: u64,
    /// Descending rank, ties in bind order.
    pub entries: Vec<RegisteredProvider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Bound,
    /// A provider with the same key was already bound; it was kept.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The old provider was swapped for the new one.
    Replaced,
    /// Nothing was bound under the old key; the new provider was bound.
    Bound,
    /// No replacement was supplied; the old provider was removed.
    Removed,
    /// No replacement and nothing bound under the old key.
    Unchanged,
    /// The replacement's key belongs to another bound provider; nothing changed.
    Rejected,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: Vec<RegisteredProvider>,
    next_sequence: u64,
    generation: u64,
}

impl RegistryState {
    fn position(&self, key: &ProviderKey) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.key == key)
    }

    fn insert_sorted(&mut self, entry: RegisteredProvider) {
        let order = entry.order();
        let index = self.entries.partition_point(|existing| existing.order() <= order);
        self.entries.insert(index, entry);
    }

    fn allocate_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}

/// Thread-safe set of bound mapping providers.
///
/// Discovery collaborators call [`bind`](Self::bind), [`unbind`](Self::unbind)
/// and [`update`](Self::update); resolution reads a [`snapshot`](Self::snapshot).
/// Every operation holds one lock for its whole duration, so a snapshot never
/// observes a half-applied change. Registry operations never fail: duplicates
/// and unknown keys degrade to logged no-ops.
///
/// The registry is created by the wiring code and shared as `Arc<ProviderRegistry>`.
#[derive(Default)]
pub struct ProviderRegistry {
    state: Mutex<RegistryState>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ProviderRegistry")
            .field("providers", &state.entries.len())
            .field("generation", &state.generation)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // The state is consistent between statements, so a poisoned lock is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `provider` under its originating key unless that key is taken.
    /// The earliest-bound provider always wins a duplicate bind.
    pub fn bind(&self, provider: Arc<dyn MappingProvider>) -> BindOutcome {
        let mut state = self.lock();
        let key = provider.key();
        if state.position(&key).is_some() {
            warn!(provider = %key, "provider already exists; keeping the existing binding");
            return BindOutcome::Duplicate;
        }

        let sequence = state.allocate_sequence();
        let entry = RegisteredProvider::new(provider, sequence, sequence);
        info!(
            provider = %entry.key,
            rank = entry.rank,
            kind = provider_kind(entry.provider.as_ref()),
            "provider bound"
        );
        state.insert_sorted(entry);
        state.generation += 1;
        BindOutcome::Bound
    }

    /// Removes the provider bound under `key`. Returns `false` (and does nothing)
    /// when no such provider is bound.
    pub fn unbind(&self, key: &ProviderKey) -> bool {
        let mut state = self.lock();
        let Some(index) = state.position(key) else {
            debug!(provider = %key, "unbind ignored; provider not bound");
            return false;
        };
        state.entries.remove(index);
        state.generation += 1;
        info!(provider = %key, "provider unbound");
        true
    }

    /// Atomically swaps the provider bound under `old_key` for `replacement`.
    ///
    /// Old and new are exchanged inside one critical section, so readers see
    /// either the old provider or the new one and never neither. The
    /// replacement keeps the old entry's bind order. `None` removes the old key.
    pub fn update(&self, old_key: &ProviderKey, replacement: Option<Arc<dyn MappingProvider>>) -> UpdateOutcome {
        let mut state = self.lock();
        let old_index = state.position(old_key);

        let Some(provider) = replacement else {
            return match old_index {
                Some(index) => {
                    state.entries.remove(index);
                    state.generation += 1;
                    info!(provider = %old_key, "provider removed by update");
                    UpdateOutcome::Removed
                }
                None => UpdateOutcome::Unchanged,
            };
        };

        let new_key = provider.key();
        if &new_key != old_key && state.position(&new_key).is_some() {
            warn!(
                provider = %old_key,
                replacement = %new_key,
                "replacement key already bound by another provider; update rejected"
            );
            return UpdateOutcome::Rejected;
        }

        let binding = state.allocate_sequence();
        let (sequence, outcome) = match old_index {
            Some(index) => (state.entries.remove(index).sequence, UpdateOutcome::Replaced),
            None => (binding, UpdateOutcome::Bound),
        };
        let entry = RegisteredProvider::new(provider, sequence, binding);
        info!(
            provider = %old_key,
            replacement = %entry.key,
            rank = entry.rank,
            kind = provider_kind(entry.provider.as_ref()),
            "provider updated"
        );
        state.insert_sorted(entry);
        state.generation += 1;
        outcome
    }

    /// Replaces the provider under `old_key` with one produced by `loader`.
    ///
    /// The loader runs without holding the registry lock. If it fails, the old
    /// provider is unbound (the key is left empty) and the load error is
    /// returned to the caller.
    pub fn update_with<F>(&self, old_key: &ProviderKey, loader: F) -> Result<UpdateOutcome, ProviderLoadError>
    where
        F: FnOnce() -> Result<Arc<dyn MappingProvider>, ProviderLoadError>,
    {
        match loader() {
            Ok(provider) => Ok(self.update(old_key, Some(provider))),
            Err(error) => {
                warn!(provider = %old_key, error = %error, "replacement failed to load; unbinding");
                self.unbind(old_key);
                Err(error)
            }
        }
    }

    /// Bound providers in descending rank order, ties in bind order.
    pub fn list(&self) -> Vec<Arc<dyn MappingProvider>> {
        self.lock().entries.iter().map(|entry| Arc::clone(&entry.provider)).collect()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.lock();
        RegistrySnapshot {
            generation: state.generation,
            entries: state.entries.clone(),
        }
    }

    pub fn keys(&self) -> Vec<ProviderKey> {
        self.lock().entries.iter().map(|entry| entry.key.clone()).collect()
    }

    pub fn contains(&self, key: &ProviderKey) -> bool {
        self.lock().position(key).is_some()
    }

    pub fn get(&self, key: &ProviderKey) -> Option<Arc<dyn MappingProvider>> {
        let state = self.lock();
        state.position(key).map(|index| Arc::clone(&state.entries[index].provider))
    }

    /// Counter bumped on every effective bind, unbind or update.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}
