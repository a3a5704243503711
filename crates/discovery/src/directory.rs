//! Keeps a [`ProviderRegistry`] in step with a directory of rule files.
//!
//! Every scan walks the root recursively, binds rule files that appeared,
//! replaces providers whose file changed and unbinds providers whose file went
//! away. A file is re-read only when its size or modification time moved; the
//! content digest then decides whether it really changed.

use std::{
    collections::{BTreeMap, BTreeSet, hash_map::DefaultHasher},
    fs,
    hash::{Hash, Hasher},
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use confmap_engine::{BindOutcome, MappingProvider, ProviderKey, ProviderLoadError, ProviderRegistry, UpdateOutcome};
use confmap_util::{ReloadPolicy, is_rule_file};
use tokio::{
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

use crate::rule::RuleProvider;

/// What a single scan changed in the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub bound: Vec<PathBuf>,
    pub updated: Vec<PathBuf>,
    pub unbound: Vec<PathBuf>,
    /// Changed files that failed to load while the previous provider stayed bound.
    pub retained: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl DiscoveryReport {
    pub fn is_empty(&self) -> bool {
        self.bound.is_empty() && self.updated.is_empty() && self.unbound.is_empty() && self.retained.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn of(metadata: &fs::Metadata) -> Self {
        Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }
}

#[derive(Debug, Clone)]
struct TrackedFile {
    stamp: FileStamp,
    digest: u64,
    /// Whether a provider for this file is currently bound by this discovery.
    bound: bool,
    /// Registry generation at which another provider held this file's key.
    blocked_at: Option<u64>,
}

#[derive(Debug)]
pub struct DirectoryDiscovery {
    root: PathBuf,
    registry: Arc<ProviderRegistry>,
    policy: ReloadPolicy,
    tracked: BTreeMap<PathBuf, TrackedFile>,
}

impl DirectoryDiscovery {
    pub fn new(root: impl Into<PathBuf>, registry: Arc<ProviderRegistry>, policy: ReloadPolicy) -> Self {
        Self {
            root: root.into(),
            registry,
            policy,
            tracked: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Paths whose providers this discovery currently has bound.
    pub fn bound_paths(&self) -> Vec<PathBuf> {
        self.tracked.iter().filter(|(_, file)| file.bound).map(|(path, _)| path.clone()).collect()
    }

    /// Reconciles the registry with the current content of the root directory.
    pub fn scan(&mut self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        let present = self.collect_rule_files();

        let vanished: Vec<PathBuf> = self.tracked.keys().filter(|path| !present.contains(*path)).cloned().collect();
        for path in vanished {
            if let Some(file) = self.tracked.remove(&path)
                && file.bound
                && self.registry.unbind(&provider_key(&path))
            {
                info!(path = %path.display(), "rule file removed; provider unbound");
                report.unbound.push(path);
            }
        }

        for path in present {
            self.reconcile(path, &mut report);
        }

        if !report.is_empty() {
            debug!(
                root = %self.root.display(),
                bound = report.bound.len(),
                updated = report.updated.len(),
                unbound = report.unbound.len(),
                retained = report.retained.len(),
                failed = report.failed.len(),
                "discovery scan finished"
            );
        }
        report
    }

    fn collect_rule_files(&self) -> BTreeSet<PathBuf> {
        let mut files = BTreeSet::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(error) if error.kind() == ErrorKind::NotFound => {
                    debug!(dir = %dir.display(), "rules directory not found");
                    continue;
                }
                Err(error) => {
                    warn!(dir = %dir.display(), error = %error, "failed to read rules directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                match entry.file_type() {
                    Ok(kind) if kind.is_dir() => pending.push(path),
                    Ok(kind) if kind.is_file() && is_rule_file(&path) => {
                        files.insert(path);
                    }
                    _ => {}
                }
            }
        }
        files
    }

    fn reconcile(&mut self, path: PathBuf, report: &mut DiscoveryReport) {
        let stamp = match fs::metadata(&path) {
            Ok(metadata) => FileStamp::of(&metadata),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "failed to stat rule file");
                return;
            }
        };
        let retry = self
            .tracked
            .get(&path)
            .is_some_and(|file| file.blocked_at.is_some_and(|generation| generation != self.registry.generation()));
        if !retry && self.tracked.get(&path).is_some_and(|file| file.stamp == stamp) {
            return;
        }

        let digest = match fs::read(&path) {
            Ok(bytes) => content_digest(&bytes),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "failed to read rule file");
                return;
            }
        };
        let previous = self.tracked.get(&path).cloned();
        if let Some(file) = previous.as_ref().filter(|file| !retry && file.digest == digest) {
            self.tracked.insert(path, TrackedFile { stamp, ..file.clone() });
            return;
        }

        let was_bound = previous.is_some_and(|file| file.bound);
        let (bound, blocked_at) = if was_bound && self.policy == ReloadPolicy::UnbindOnError {
            (self.reload_or_unbind(&path, report), None)
        } else {
            match RuleProvider::load(&path) {
                Ok(provider) => {
                    let bound = self.install(&path, provider, was_bound, report);
                    (bound, (!bound).then(|| self.registry.generation()))
                }
                Err(load_error) => (self.report_load_error(&path, load_error, was_bound, report), None),
            }
        };
        self.tracked.insert(
            path,
            TrackedFile {
                stamp,
                digest,
                bound,
                blocked_at,
            },
        );
    }

    fn install(&self, path: &Path, provider: RuleProvider, was_bound: bool, report: &mut DiscoveryReport) -> bool {
        let provider: Arc<dyn MappingProvider> = Arc::new(provider);
        if was_bound {
            let outcome = self.registry.update(&provider_key(path), Some(provider));
            return self.record_update(path, outcome, report);
        }

        match self.registry.bind(provider) {
            BindOutcome::Bound => {
                info!(path = %path.display(), "rule file discovered; provider bound");
                report.bound.push(path.to_path_buf());
                true
            }
            BindOutcome::Duplicate => {
                warn!(path = %path.display(), "rule file key already bound elsewhere; retrying after the registry changes");
                report.failed.push((path.to_path_buf(), "a provider with this key is already bound".to_string()));
                false
            }
        }
    }

    fn reload_or_unbind(&self, path: &Path, report: &mut DiscoveryReport) -> bool {
        let loaded = self.registry.update_with(&provider_key(path), || {
            RuleProvider::load(path).map(|provider| Arc::new(provider) as Arc<dyn MappingProvider>)
        });
        match loaded {
            Ok(outcome) => self.record_update(path, outcome, report),
            Err(load_error) => {
                error!(path = %path.display(), reason = %load_error.reason, "changed rule file could not be loaded; provider unbound");
                report.unbound.push(path.to_path_buf());
                report.failed.push((path.to_path_buf(), load_error.reason));
                false
            }
        }
    }

    fn record_update(&self, path: &Path, outcome: UpdateOutcome, report: &mut DiscoveryReport) -> bool {
        match outcome {
            UpdateOutcome::Replaced | UpdateOutcome::Bound => {
                info!(path = %path.display(), "rule file changed; provider replaced");
                report.updated.push(path.to_path_buf());
                true
            }
            outcome => {
                warn!(path = %path.display(), outcome = ?outcome, "registry refused the updated provider");
                report.failed.push((path.to_path_buf(), format!("update {outcome:?}")));
                false
            }
        }
    }

    /// Records a load failure for a new file, or for a changed file whose
    /// previous provider stays bound.
    fn report_load_error(&self, path: &Path, load_error: ProviderLoadError, was_bound: bool, report: &mut DiscoveryReport) -> bool {
        let reason = load_error.reason;
        if was_bound {
            error!(path = %path.display(), reason = %reason, "changed rule file could not be loaded; keeping previous provider");
            report.retained.push(path.to_path_buf());
        } else {
            warn!(path = %path.display(), reason = %reason, "rule file could not be loaded");
        }
        report.failed.push((path.to_path_buf(), reason));
        was_bound
    }

    /// Scans every `interval` until `shutdown` flips to `true` or its sender is
    /// dropped, forwarding non-empty reports to `reports`.
    ///
    /// Scans run on the blocking pool. The discovery is handed back once the
    /// loop stops so callers can keep using its state.
    pub async fn watch(
        self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        reports: mpsc::Sender<DiscoveryReport>,
    ) -> Result<Self> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut discovery = self;
        info!(root = %discovery.root.display(), interval_ms = interval.as_millis() as u64, "watching rules directory");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (returned, report) = tokio::task::spawn_blocking(move || {
                        let report = discovery.scan();
                        (discovery, report)
                    })
                    .await
                    .context("discovery scan task failed")?;
                    discovery = returned;
                    if !report.is_empty() && reports.send(report).await.is_err() {
                        debug!("discovery report receiver dropped");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(root = %discovery.root.display(), "stopped watching rules directory");
        Ok(discovery)
    }
}

fn provider_key(path: &Path) -> ProviderKey {
    ProviderKey::from(path)
}

fn content_digest(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}
