//! Mapping provider contract and registry.
//!
//! Modules:
//! - `registry`: thread-safe set of bound providers with bind/unbind/update
//! - `static_provider`: programmatic provider backed by a fixed property map

mod registry;
mod static_provider;

use std::fmt::Debug;

use confmap_types::{DEFAULT_RANK, MappingIdentity, Properties, ProviderKey};

pub use registry::{BindOutcome, ProviderRegistry, RegisteredProvider, RegistrySnapshot, UpdateOutcome};
pub use static_provider::{Claim, StaticProvider};

use crate::{error::ProviderError, store::ConfigStore};

/// Pluggable unit of contribution to a resolved mapping.
///
/// Providers are either *full* (they alone supply a complete map for the
/// identities they claim) or *partial* (they supply a subset of keys that is
/// merged over the base). [`rank`](MappingProvider::rank) orders contributions:
/// higher rank wins key conflicts between partial providers and selects the
/// authoritative full provider.
pub trait MappingProvider: Send + Sync + Debug {
    /// Originating key (rule file, resource URL, label) used for deduplication.
    fn key(&self) -> ProviderKey;

    fn is_partial(&self) -> bool;

    /// Whether this provider contributes to `identity`. Must be pure; it is
    /// called for every provider on every resolution.
    fn can_provide_for(&self, identity: &MappingIdentity) -> bool;

    /// Produces the contribution for `identity`. A `Null` value removes the key
    /// from the merged result.
    fn provide(&self, identity: &MappingIdentity, store: &dyn ConfigStore) -> Result<Properties, ProviderError>;

    fn rank(&self) -> i32 {
        DEFAULT_RANK
    }
}

/// Human-readable provider kind for logs and listings.
pub fn provider_kind(provider: &dyn MappingProvider) -> &'static str {
    if provider.is_partial() { "partial" } else { "full" }
}
