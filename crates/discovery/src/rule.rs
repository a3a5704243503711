//! Declarative mapping rules and the provider built from them.
//!
//! A rule document (JSON or YAML) names the identities it claims, whether it is
//! partial, its rank, the configuration-store records it draws from and a
//! static property overlay:
//!
//! ```yaml
//! name: ddf.security.sts
//! instance: primary
//! partial: true
//! rank: 10
//! sources:
//!   - kind: ddf.platform
//!     required: false
//! properties:
//!   issuer: local
//!   legacy.setting: null
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use confmap_engine::{ConfigStore, MappingIdentity, MappingProvider, Properties, ProviderError, ProviderKey, ProviderLoadError};
use confmap_types::DEFAULT_RANK;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

/// Placeholder in a source `instance` that stands for the resolved identity's instance.
pub const IDENTITY_INSTANCE: &str = "$instance";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDocument {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    name_pattern: Option<String>,
    #[serde(default)]
    instance: Option<String>,
    #[serde(default)]
    partial: bool,
    #[serde(default = "default_rank")]
    rank: i32,
    #[serde(default)]
    sources: Vec<SourceRef>,
    #[serde(default)]
    properties: Properties,
}

fn default_rank() -> i32 {
    DEFAULT_RANK
}

fn default_required() -> bool {
    true
}

/// A configuration-store record merged into the rule's contribution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceRef {
    pub kind: String,
    #[serde(default)]
    pub instance: Option<String>,
    /// A missing required record makes the whole contribution unavailable.
    #[serde(default = "default_required")]
    pub required: bool,
}

impl SourceRef {
    fn instance_for<'a>(&'a self, identity: &'a MappingIdentity) -> Option<&'a str> {
        match self.instance.as_deref() {
            Some(IDENTITY_INSTANCE) => identity.instance_id(),
            other => other,
        }
    }
}

#[derive(Debug, Clone)]
pub enum NameMatcher {
    Exact(String),
    Pattern(Regex),
}

impl NameMatcher {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == name,
            Self::Pattern(pattern) => pattern.is_match(name),
        }
    }
}

/// A validated rule document.
#[derive(Debug, Clone)]
pub struct MappingRule {
    pub name: NameMatcher,
    /// `None` claims every instance of the matched kinds, including the singleton.
    pub instance: Option<String>,
    pub partial: bool,
    pub rank: i32,
    pub sources: Vec<SourceRef>,
    pub properties: Properties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFormat {
    Json,
    Yaml,
}

impl RuleFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

impl MappingRule {
    pub fn from_path(path: &Path) -> Result<Self, ProviderLoadError> {
        let format = RuleFormat::from_path(path).ok_or_else(|| ProviderLoadError::new(path, "unsupported rule file extension"))?;
        let content = fs::read_to_string(path).map_err(|error| ProviderLoadError::new(path, error.to_string()))?;
        Self::parse(&content, format).map_err(|reason| ProviderLoadError::new(path, reason))
    }

    /// Parses and validates a rule document, returning a human-readable reason on failure.
    pub fn parse(content: &str, format: RuleFormat) -> Result<Self, String> {
        let document: RuleDocument = match format {
            RuleFormat::Json => serde_json::from_str(content).map_err(|error| error.to_string())?,
            RuleFormat::Yaml => serde_yaml::from_str(content).map_err(|error| error.to_string())?,
        };
        Self::from_document(document)
    }

    fn from_document(document: RuleDocument) -> Result<Self, String> {
        let name = match (document.name, document.name_pattern) {
            (Some(_), Some(_)) => return Err("only one of 'name' and 'name_pattern' may be set".to_string()),
            (None, None) => return Err("one of 'name' or 'name_pattern' is required".to_string()),
            (Some(name), None) => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err("'name' must not be empty".to_string());
                }
                NameMatcher::Exact(name)
            }
            (None, Some(pattern)) => {
                NameMatcher::Pattern(Regex::new(&pattern).map_err(|error| format!("invalid 'name_pattern': {error}"))?)
            }
        };

        if let Some(source) = document.sources.iter().find(|source| source.kind.trim().is_empty()) {
            return Err(format!("source kind must not be empty (instance {:?})", source.instance));
        }

        Ok(Self {
            name,
            instance: document.instance.filter(|instance| !instance.trim().is_empty()),
            partial: document.partial,
            rank: document.rank,
            sources: document.sources,
            properties: document.properties,
        })
    }

    pub fn claims(&self, identity: &MappingIdentity) -> bool {
        if !self.name.matches(identity.name()) {
            return false;
        }
        match &self.instance {
            Some(instance) => identity.instance_id() == Some(instance.as_str()),
            None => true,
        }
    }
}

/// Provider backed by a rule file; its key is the file path.
#[derive(Debug, Clone)]
pub struct RuleProvider {
    path: PathBuf,
    rule: MappingRule,
}

impl RuleProvider {
    pub fn new(path: impl Into<PathBuf>, rule: MappingRule) -> Self {
        Self { path: path.into(), rule }
    }

    pub fn load(path: &Path) -> Result<Self, ProviderLoadError> {
        Ok(Self::new(path, MappingRule::from_path(path)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rule(&self) -> &MappingRule {
        &self.rule
    }
}

impl MappingProvider for RuleProvider {
    fn key(&self) -> ProviderKey {
        ProviderKey::from(self.path.as_path())
    }

    fn is_partial(&self) -> bool {
        self.rule.partial
    }

    fn can_provide_for(&self, identity: &MappingIdentity) -> bool {
        self.rule.claims(identity)
    }

    fn provide(&self, identity: &MappingIdentity, store: &dyn ConfigStore) -> Result<Properties, ProviderError> {
        let mut contribution = Properties::new();
        for source in &self.rule.sources {
            let instance = source.instance_for(identity);
            match store.lookup(&source.kind, instance)? {
                Some(record) => contribution.extend(record),
                None if source.required => {
                    let label = MappingIdentity::with_optional_instance(source.kind.clone(), instance.map(str::to_string));
                    return Err(ProviderError::unavailable(format!("required configuration '{label}' is absent")));
                }
                None => debug!(rule = %self.path.display(), kind = %source.kind, "optional source absent"),
            }
        }
        contribution.extend(self.rule.properties.clone());
        Ok(contribution)
    }

    fn rank(&self) -> i32 {
        self.rule.rank
    }
}
