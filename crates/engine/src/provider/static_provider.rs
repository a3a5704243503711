use confmap_types::{DEFAULT_RANK, MappingIdentity, Properties, ProviderKey};

use super::MappingProvider;
use crate::{error::ProviderError, store::ConfigStore};

/// Which identities a [`StaticProvider`] claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Exactly one identity.
    Identity(MappingIdentity),
    /// Every instance of a kind, including the singleton.
    Name(String),
    /// Every identity.
    Any,
}

impl Claim {
    pub fn matches(&self, identity: &MappingIdentity) -> bool {
        match self {
            Self::Identity(claimed) => claimed == identity,
            Self::Name(name) => name == identity.name(),
            Self::Any => true,
        }
    }
}

/// Provider assembled in code from a fixed property map.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    key: ProviderKey,
    claim: Claim,
    partial: bool,
    rank: i32,
    properties: Properties,
}

impl StaticProvider {
    /// A full provider claiming every identity until narrowed.
    pub fn full(key: impl Into<ProviderKey>, properties: Properties) -> Self {
        Self {
            key: key.into(),
            claim: Claim::Any,
            partial: false,
            rank: DEFAULT_RANK,
            properties,
        }
    }

    /// A partial provider claiming every identity until narrowed.
    pub fn partial(key: impl Into<ProviderKey>, properties: Properties) -> Self {
        Self {
            partial: true,
            ..Self::full(key, properties)
        }
    }

    pub fn with_rank(mut self, rank: i32) -> Self {
        self.rank = rank;
        self
    }

    pub fn for_identity(mut self, identity: MappingIdentity) -> Self {
        self.claim = Claim::Identity(identity);
        self
    }

    pub fn for_name(mut self, name: impl Into<String>) -> Self {
        self.claim = Claim::Name(name.into());
        self
    }

    pub fn for_any(mut self) -> Self {
        self.claim = Claim::Any;
        self
    }

    pub fn claim(&self) -> &Claim {
        &self.claim
    }
}

impl MappingProvider for StaticProvider {
    fn key(&self) -> ProviderKey {
        self.key.clone()
    }

    fn is_partial(&self) -> bool {
        self.partial
    }

    fn can_provide_for(&self, identity: &MappingIdentity) -> bool {
        self.claim.matches(identity)
    }

    fn provide(&self, _identity: &MappingIdentity, _store: &dyn ConfigStore) -> Result<Properties, ProviderError> {
        Ok(self.properties.clone())
    }

    fn rank(&self) -> i32 {
        self.rank
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EmptyConfigStore;
    use serde_json::json;

    #[test]
    fn name_claim_covers_all_instances() {
        let provider = StaticProvider::partial("defaults", Properties::new()).for_name("ddf.sts");
        assert!(provider.can_provide_for(&MappingIdentity::new("ddf.sts")));
        assert!(provider.can_provide_for(&MappingIdentity::instance("ddf.sts", "primary")));
        assert!(!provider.can_provide_for(&MappingIdentity::new("ddf.platform")));
    }

    #[test]
    fn identity_claim_is_exact() {
        let provider = StaticProvider::full("sts", Properties::new()).for_identity(MappingIdentity::instance("ddf.sts", "primary"));
        assert!(provider.can_provide_for(&MappingIdentity::instance("ddf.sts", "primary")));
        assert!(!provider.can_provide_for(&MappingIdentity::new("ddf.sts")));
    }

    #[test]
    fn defaults_to_rank_zero_and_returns_properties() {
        let properties = Properties::from([("issuer".to_string(), json!("local"))]);
        let provider = StaticProvider::full("sts", properties.clone());
        assert_eq!(provider.rank(), DEFAULT_RANK);
        assert!(!provider.is_partial());
        let provided = provider
            .provide(&MappingIdentity::new("ddf.sts"), &EmptyConfigStore)
            .expect("static provide");
        assert_eq!(provided, properties);
    }
}
