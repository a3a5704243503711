//! # Confmap Engine
//!
//! The Confmap Engine resolves configuration mappings: given a
//! [`MappingIdentity`], it merges the contributions of every bound
//! [`MappingProvider`] that claims the identity into one property map, and keeps
//! the result live while providers are bound, unbound and replaced at runtime.
//!
//! ## Key Features
//!
//! - **Provider Registry**: thread-safe bind/unbind/update with duplicate rejection
//! - **Deterministic Merge**: full provider base, partial overlays in rank order, `null` deletes
//! - **Failure Isolation**: unavailable partial contributions are skipped; broken providers are named
//! - **Change Detection**: registry generations, stale mapping handles and change trackers
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use confmap_engine::{EmptyConfigStore, MappingService, ProviderRegistry, StaticProvider};
//! use confmap_types::{MappingIdentity, Properties};
//! use serde_json::json;
//!
//! let registry = Arc::new(ProviderRegistry::new());
//! registry.bind(Arc::new(
//!     StaticProvider::full("defaults", Properties::from([("port".to_string(), json!(8993))])).for_name("ddf.platform"),
//! ));
//! registry.bind(Arc::new(
//!     StaticProvider::partial("site", Properties::from([("port".to_string(), json!(9443))]))
//!         .with_rank(10)
//!         .for_name("ddf.platform"),
//! ));
//!
//! let service = MappingService::new(registry, Arc::new(EmptyConfigStore));
//! let mapping = service.get_mapping(&MappingIdentity::new("ddf.platform")).expect("claimed identity");
//! assert_eq!(mapping.resolve()?["port"], json!(9443));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`provider`**: the provider contract, static providers and the registry
//! - **`store`**: the configuration store boundary providers read from
//! - **`resolve`**: the merge algorithm over a registry snapshot
//! - **`mapping`**: mapping handles, the mapping service and change tracking
//! - **`error`**: provider, load and resolution errors

pub mod error;
pub mod mapping;
pub mod provider;
pub mod resolve;
pub mod store;

pub use confmap_types::{DEFAULT_RANK, MappingIdentity, Properties, ProviderKey};
pub use error::{ProviderError, ProviderLoadError, ResolutionError};
pub use mapping::{ChangeTracker, Mapping, MappingService};
pub use provider::{
    BindOutcome, Claim, MappingProvider, ProviderRegistry, RegisteredProvider, RegistrySnapshot, StaticProvider, UpdateOutcome,
    provider_kind,
};
pub use resolve::{Contribution, ContributionOutcome, Resolution};
pub use store::{ConfigStore, ConfigUnavailable, EmptyConfigStore, InMemoryConfigStore};
