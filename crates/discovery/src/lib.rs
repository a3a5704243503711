//! File-backed mapping providers.
//!
//! [`RuleProvider`] turns a declarative rule document into a
//! [`MappingProvider`](confmap_engine::MappingProvider), and
//! [`DirectoryDiscovery`] keeps a registry bound to the rule files found under
//! a directory.

pub mod directory;
pub mod rule;

pub use directory::{DirectoryDiscovery, DiscoveryReport};
pub use rule::{IDENTITY_INSTANCE, MappingRule, NameMatcher, RuleFormat, RuleProvider, SourceRef};
