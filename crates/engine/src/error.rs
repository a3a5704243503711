//! Error types surfaced by providers, provider loading and resolution.

use std::path::PathBuf;

use confmap_types::{MappingIdentity, ProviderKey};
use thiserror::Error;

use crate::store::ConfigUnavailable;

/// Failure raised by a single provider while producing its contribution.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Backing data required by the provider is absent.
    #[error("mapping unavailable: {reason}")]
    Unavailable { reason: String },

    /// Any other provider fault (parse error, internal failure).
    #[error("mapping error: {message}")]
    Failed { message: String },
}

impl ProviderError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable { reason: reason.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed { message: message.into() }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<ConfigUnavailable> for ProviderError {
    fn from(error: ConfigUnavailable) -> Self {
        Self::Unavailable { reason: error.to_string() }
    }
}

/// Error returned by `resolve()`.
///
/// `Unavailable` means "not ready yet" and may be retried later; `Failed`
/// means a provider is broken and names it.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("mapping for '{identity}' is unavailable: {reason}")]
    Unavailable { identity: MappingIdentity, reason: String },

    #[error("provider '{provider}' failed while resolving '{identity}': {message}")]
    Failed {
        identity: MappingIdentity,
        provider: ProviderKey,
        message: String,
    },
}

impl ResolutionError {
    pub fn unavailable(identity: &MappingIdentity, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            identity: identity.clone(),
            reason: reason.into(),
        }
    }

    pub fn failed(identity: &MappingIdentity, provider: &ProviderKey, message: impl Into<String>) -> Self {
        Self::Failed {
            identity: identity.clone(),
            provider: provider.clone(),
            message: message.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    pub fn identity(&self) -> &MappingIdentity {
        match self {
            Self::Unavailable { identity, .. } | Self::Failed { identity, .. } => identity,
        }
    }
}

/// A provider definition could not be turned into a provider. The definition
/// is never bound; other providers are unaffected.
#[derive(Debug, Error)]
#[error("failed to load provider from '{}': {reason}", path.display())]
pub struct ProviderLoadError {
    pub path: PathBuf,
    pub reason: String,
}

impl ProviderLoadError {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_unavailable_converts_to_provider_unavailable() {
        let error: ProviderError = ConfigUnavailable::new("ddf.platform", None, "store offline").into();
        assert!(error.is_unavailable());
        assert!(error.to_string().contains("store offline"));
    }

    #[test]
    fn resolution_error_names_provider() {
        let identity = MappingIdentity::instance("ddf.sts", "primary");
        let err = ResolutionError::failed(&identity, &ProviderKey::from("rules/sts.yaml"), "bad value");
        assert!(!err.is_unavailable());
        assert_eq!(err.identity(), &identity);
        assert_eq!(
            err.to_string(),
            "provider 'rules/sts.yaml' failed while resolving 'ddf.sts:primary': bad value"
        );
    }

    #[test]
    fn load_error_displays_path() {
        let err = ProviderLoadError::new("/rules/broken.json", "expected value at line 1");
        assert_eq!(err.to_string(), "failed to load provider from '/rules/broken.json': expected value at line 1");
    }
}
