//! Merge of provider contributions into one property map.
//!
//! Resolution runs against a [`RegistrySnapshot`], so provider execution never
//! holds the registry lock. The highest-rank matching full provider supplies
//! the base map; matching partial providers are then applied in ascending rank
//! order so the highest rank wins each key. A `null` value deletes the key.
//!
//! Between providers of equal rank the earliest-bound one wins: it is the
//! authoritative full provider, and among partials it is applied last. This
//! matches the order [`ProviderRegistry::list`](crate::ProviderRegistry::list)
//! reports.

use confmap_types::{MappingIdentity, Properties, ProviderKey};
use indexmap::IndexSet;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    error::{ProviderError, ResolutionError},
    provider::RegisteredProvider,
    provider::RegistrySnapshot,
    store::ConfigStore,
};

/// What happened to one provider during a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ContributionOutcome {
    /// The contribution was merged; `keys` counts the entries it carried.
    Applied { keys: usize },
    /// The provider reported missing backing data and was skipped.
    Unavailable { reason: String },
    /// A full provider that lost to a higher-ranked (or earlier) full provider.
    Redundant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contribution {
    pub provider: ProviderKey,
    pub rank: i32,
    pub partial: bool,
    #[serde(flatten)]
    pub outcome: ContributionOutcome,
}

/// Full result of one resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub identity: MappingIdentity,
    /// Registry generation the resolution ran against.
    pub generation: u64,
    pub properties: Properties,
    /// Keys deleted by an explicit `null` contribution and absent from `properties`.
    pub removed: Vec<String>,
    /// Providers in the order they were consulted.
    pub contributors: Vec<Contribution>,
}

impl Resolution {
    fn empty(identity: &MappingIdentity, generation: u64) -> Self {
        Self {
            identity: identity.clone(),
            generation,
            properties: Properties::new(),
            removed: Vec::new(),
            contributors: Vec::new(),
        }
    }
}

/// Providers in `snapshot` that claim `identity`, in registry order.
pub fn applicable<'a>(snapshot: &'a RegistrySnapshot, identity: &MappingIdentity) -> Vec<&'a RegisteredProvider> {
    snapshot
        .entries
        .iter()
        .filter(|entry| entry.provider.can_provide_for(identity))
        .collect()
}

/// Keys of the full providers sharing the top rank for `identity`, when more than
/// one does. Such ties are a configuration conflict; resolution picks the
/// earliest-bound one.
pub fn full_provider_conflicts(snapshot: &RegistrySnapshot, identity: &MappingIdentity) -> Vec<ProviderKey> {
    let full: Vec<&RegisteredProvider> = applicable(snapshot, identity)
        .into_iter()
        .filter(|entry| !entry.partial)
        .collect();
    top_rank_ties(&full)
}

// `full` is in registry order, so the top-rank entries lead.
fn top_rank_ties(full: &[&RegisteredProvider]) -> Vec<ProviderKey> {
    let Some(top) = full.first() else {
        return Vec::new();
    };
    let tied: Vec<ProviderKey> = full
        .iter()
        .take_while(|entry| entry.rank == top.rank)
        .map(|entry| entry.key.clone())
        .collect();
    if tied.len() > 1 { tied } else { Vec::new() }
}

/// Resolves `identity` against `snapshot`.
pub fn resolve_snapshot(
    snapshot: &RegistrySnapshot,
    identity: &MappingIdentity,
    store: &dyn ConfigStore,
) -> Result<Resolution, ResolutionError> {
    let mut resolution = Resolution::empty(identity, snapshot.generation);
    let (full, partial): (Vec<&RegisteredProvider>, Vec<&RegisteredProvider>) =
        applicable(snapshot, identity).into_iter().partition(|entry| !entry.partial);

    if full.is_empty() && partial.is_empty() {
        debug!(identity = %identity, "no provider claims identity");
        return Ok(resolution);
    }

    let conflicts = top_rank_ties(&full);
    if !conflicts.is_empty() {
        let keys: Vec<&str> = conflicts.iter().map(ProviderKey::as_str).collect();
        warn!(
            identity = %identity,
            providers = ?keys,
            "multiple full providers share the top rank; using the earliest bound"
        );
    }

    let mut removed: IndexSet<String> = IndexSet::new();
    apply_base(&full, identity, store, &mut resolution)?;

    for entry in partial.iter().rev() {
        match entry.provider.provide(identity, store) {
            Ok(contribution) => {
                debug!(
                    identity = %identity,
                    provider = %entry.key,
                    rank = entry.rank,
                    keys = contribution.len(),
                    "applying partial contribution"
                );
                let keys = contribution.len();
                overlay(&mut resolution.properties, &mut removed, contribution);
                resolution.contributors.push(contribution_record(entry, ContributionOutcome::Applied { keys }));
            }
            Err(ProviderError::Unavailable { reason }) => {
                warn!(
                    identity = %identity,
                    provider = %entry.key,
                    reason = %reason,
                    "partial provider unavailable; skipping its contribution"
                );
                resolution
                    .contributors
                    .push(contribution_record(entry, ContributionOutcome::Unavailable { reason }));
            }
            Err(ProviderError::Failed { message }) => {
                return Err(ResolutionError::failed(identity, &entry.key, message));
            }
        }
    }

    resolution.removed = removed.into_iter().collect();
    Ok(resolution)
}

// Picks the authoritative full provider and installs its output as the base map.
fn apply_base(
    full: &[&RegisteredProvider],
    identity: &MappingIdentity,
    store: &dyn ConfigStore,
    resolution: &mut Resolution,
) -> Result<(), ResolutionError> {
    let mut authoritative = false;
    let mut last_reason = None;

    for entry in full {
        if authoritative {
            debug!(identity = %identity, provider = %entry.key, "ignoring redundant full provider");
            resolution.contributors.push(contribution_record(entry, ContributionOutcome::Redundant));
            continue;
        }
        match entry.provider.provide(identity, store) {
            Ok(base) => {
                debug!(
                    identity = %identity,
                    provider = %entry.key,
                    rank = entry.rank,
                    keys = base.len(),
                    "using full provider as base"
                );
                let keys = base.len();
                resolution.properties = base.into_iter().filter(|(_, value)| !value.is_null()).collect();
                resolution.contributors.push(contribution_record(entry, ContributionOutcome::Applied { keys }));
                authoritative = true;
            }
            Err(ProviderError::Unavailable { reason }) => {
                warn!(
                    identity = %identity,
                    provider = %entry.key,
                    reason = %reason,
                    "full provider unavailable"
                );
                resolution.contributors.push(contribution_record(
                    entry,
                    ContributionOutcome::Unavailable { reason: reason.clone() },
                ));
                last_reason = Some(reason);
            }
            Err(ProviderError::Failed { message }) => {
                return Err(ResolutionError::failed(identity, &entry.key, message));
            }
        }
    }

    match last_reason {
        Some(reason) if !authoritative => Err(ResolutionError::unavailable(identity, reason)),
        _ => Ok(()),
    }
}

fn overlay(properties: &mut Properties, removed: &mut IndexSet<String>, contribution: Properties) {
    for (key, value) in contribution {
        if value.is_null() {
            properties.shift_remove(&key);
            removed.insert(key);
        } else {
            removed.shift_remove(&key);
            properties.insert(key, value);
        }
    }
}

fn contribution_record(entry: &RegisteredProvider, outcome: ContributionOutcome) -> Contribution {
    Contribution {
        provider: entry.key.clone(),
        rank: entry.rank,
        partial: entry.partial,
        outcome,
    }
}
