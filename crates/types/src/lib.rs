use std::{error::Error, fmt, path::Path, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rank assigned to every provider that does not declare one.
pub const DEFAULT_RANK: i32 = 0;

/// Merged property map and the shape of every provider contribution.
///
/// Inside a contribution a `Value::Null` entry means "remove this key"; merged
/// results never carry `Null` values.
pub type Properties = IndexMap<String, Value>;

/// Identifies which configuration is being resolved.
///
/// `name` is the logical configuration kind (for example a factory identifier)
/// and `instance` distinguishes multiple configured instances of the same kind.
/// An identity without an instance addresses a singleton kind.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MappingIdentity {
    name: String,
    #[serde(default)]
    instance: Option<String>,
}

impl MappingIdentity {
    /// Identity of a singleton configuration kind.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: None,
        }
    }

    /// Identity of one configured instance of `name`.
    pub fn instance(name: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: Some(instance.into()),
        }
    }

    /// Builds an identity from an optional instance, as parsed from user input.
    pub fn with_optional_instance(name: impl Into<String>, instance: Option<String>) -> Self {
        Self {
            name: name.into(),
            instance,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    pub fn is_singleton(&self) -> bool {
        self.instance.is_none()
    }
}

impl fmt::Display for MappingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{}:{}", self.name, instance),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for MappingIdentity {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (name, instance) = match trimmed.split_once(':') {
            Some((name, instance)) => (name.trim(), Some(instance.trim())),
            None => (trimmed, None),
        };
        if name.is_empty() {
            return Err(ParseIdentityError);
        }
        let instance = instance.filter(|value| !value.is_empty()).map(str::to_string);
        Ok(Self::with_optional_instance(name, instance))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseIdentityError;

impl fmt::Display for ParseIdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid mapping identity; expected 'name' or 'name:instance'")
    }
}

impl Error for ParseIdentityError {}

/// Originating key of a provider: the rule file, resource URL or label it was
/// built from. The registry deduplicates providers by this key.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderKey(String);

impl ProviderKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ProviderKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&Path> for ProviderKey {
    fn from(value: &Path) -> Self {
        Self(value.display().to_string())
    }
}
