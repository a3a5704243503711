use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use confmap_discovery::{DirectoryDiscovery, DiscoveryReport};
use confmap_engine::{
    ChangeTracker, ConfigStore, EmptyConfigStore, InMemoryConfigStore, MappingIdentity, MappingService, ProviderRegistry, ResolutionError,
    provider_kind,
};
use confmap_util::{AppConfig, SyncOutcome, load_config, load_config_from_path, sync_json_file};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status for a mapping whose backing configuration is not ready yet.
const EXIT_NOT_READY: u8 = 2;
const EXIT_FAILURE: u8 = 1;

#[derive(Debug, Parser)]
#[command(name = "confmap", version, about = "Resolve layered configuration mappings")]
struct Cli {
    /// Path to confmap.json (defaults to $CONFMAP_CONFIG_PATH or the user config dir).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List bound providers in resolution order.
    List,
    /// Print the merged property map of a mapping as JSON.
    Resolve(IdentityArgs),
    /// Show how each provider contributed to a mapping.
    Explain(IdentityArgs),
    /// Write every configured sync target once.
    Sync,
    /// Poll the rules directory and keep sync targets current until Ctrl-C.
    Watch,
}

#[derive(Debug, Args)]
struct IdentityArgs {
    /// Configuration kind, e.g. `ddf.security.sts`.
    name: String,
    #[arg(long)]
    instance: Option<String>,
}

impl IdentityArgs {
    fn identity(&self) -> MappingIdentity {
        MappingIdentity::with_optional_instance(self.name.clone(), self.instance.clone())
    }
}

struct Runtime {
    config: AppConfig,
    service: MappingService,
    discovery: DirectoryDiscovery,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => ExitCode::from(report_failure(&error)),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

/// Prints the failure and returns the process exit status for it.
fn report_failure(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<ResolutionError>() {
        Some(resolution) if resolution.is_unavailable() => {
            eprintln!("not ready: {resolution}");
            EXIT_NOT_READY
        }
        Some(resolution) => {
            eprintln!("broken: {resolution}");
            EXIT_FAILURE
        }
        None => {
            eprintln!("error: {error:#}");
            EXIT_FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let runtime = bootstrap(cli.config.as_deref())?;
    match cli.command {
        Command::List => {
            list_providers(&runtime.service);
            Ok(())
        }
        Command::Resolve(args) => resolve(&runtime.service, &args.identity()),
        Command::Explain(args) => explain(&runtime.service, &args.identity()),
        Command::Sync => sync_targets(&runtime.config, &runtime.service),
        Command::Watch => run_watch(runtime).await,
    }
}

fn bootstrap(config_path: Option<&Path>) -> Result<Runtime> {
    let config = match config_path {
        Some(path) if !path.exists() => bail!("config file {} does not exist", path.display()),
        Some(path) => load_config_from_path(path),
        None => load_config(),
    }
    .context("load confmap configuration")?;

    let store: Arc<dyn ConfigStore> = match &config.store_file {
        Some(path) => Arc::new(InMemoryConfigStore::from_json_file(path)?),
        None => Arc::new(EmptyConfigStore),
    };
    let registry = Arc::new(ProviderRegistry::new());
    let mut discovery = DirectoryDiscovery::new(&config.rules_dir, registry.clone(), config.reload_policy);
    log_report(&discovery.scan());

    Ok(Runtime {
        service: MappingService::new(registry, store),
        discovery,
        config,
    })
}

fn list_providers(service: &MappingService) {
    let providers = service.registry().list();
    if providers.is_empty() {
        println!("no providers bound");
        return;
    }
    for provider in providers {
        println!("{:>6}  {:<7}  {}", provider.rank(), provider_kind(provider.as_ref()), provider.key());
    }
}

fn resolve(service: &MappingService, identity: &MappingIdentity) -> Result<()> {
    if service.get_mapping(identity).is_none() {
        warn!(identity = %identity, "no provider claims this mapping");
    }
    let properties = service.resolve(identity)?;
    println!("{}", serde_json::to_string_pretty(&properties)?);
    Ok(())
}

fn explain(service: &MappingService, identity: &MappingIdentity) -> Result<()> {
    let conflicts = service.full_provider_conflicts(identity);
    if !conflicts.is_empty() {
        let keys: Vec<String> = conflicts.iter().map(ToString::to_string).collect();
        warn!(identity = %identity, providers = %keys.join(", "), "full providers tie on rank");
    }
    let resolution = service.resolve_detailed(identity)?;
    println!("{}", serde_json::to_string_pretty(&resolution)?);
    Ok(())
}

/// Writes every target, continuing past failures; the first failure is returned.
fn sync_targets(config: &AppConfig, service: &MappingService) -> Result<()> {
    if config.targets.is_empty() {
        info!("no sync targets configured");
        return Ok(());
    }

    let mut first_error = None;
    for target in &config.targets {
        let identity = MappingIdentity::with_optional_instance(target.name.clone(), target.instance.clone());
        let outcome = service.resolve_detailed(&identity).map_err(anyhow::Error::from).and_then(|resolution| {
            sync_json_file(&target.path, &resolution.properties, &resolution.removed, target.mode).map_err(anyhow::Error::from)
        });
        match outcome {
            Ok(SyncOutcome::Written) => info!(identity = %identity, path = %target.path.display(), "sync target written"),
            Ok(SyncOutcome::Unchanged) => debug!(identity = %identity, path = %target.path.display(), "sync target unchanged"),
            Err(error) => {
                warn!(identity = %identity, path = %target.path.display(), error = %error, "sync target not written");
                first_error.get_or_insert(error);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

async fn run_watch(runtime: Runtime) -> Result<()> {
    let Runtime { config, service, discovery } = runtime;
    let mut tracker = ChangeTracker::unsynced(service.registry().clone());
    resync_if_changed(&config, &service, &mut tracker);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (report_tx, mut report_rx) = mpsc::channel(16);
    let interval = Duration::from_millis(config.poll_interval_ms);
    let watcher = tokio::spawn(discovery.watch(interval, shutdown_rx, report_tx));

    loop {
        tokio::select! {
            report = report_rx.recv() => match report {
                Some(report) => {
                    log_report(&report);
                    resync_if_changed(&config, &service, &mut tracker);
                }
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("listen for Ctrl-C")?;
                info!("interrupt received; stopping");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    watcher.await.context("join discovery watcher")??;
    Ok(())
}

fn resync_if_changed(config: &AppConfig, service: &MappingService, tracker: &mut ChangeTracker) {
    if !tracker.changed() {
        return;
    }
    debug!(generation = tracker.seen(), "registry changed; syncing targets");
    // Failures are logged per target; the loop keeps running.
    let _ = sync_targets(config, service);
}

fn log_report(report: &DiscoveryReport) {
    for (path, reason) in &report.failed {
        warn!(path = %path.display(), reason = %reason, "rule file rejected");
    }
    if !report.is_empty() {
        info!(
            bound = report.bound.len(),
            updated = report.updated.len(),
            unbound = report.unbound.len(),
            retained = report.retained.len(),
            "rules directory reconciled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_resolve_with_instance() {
        let cli = Cli::try_parse_from(["confmap", "--config", "/tmp/confmap.json", "resolve", "ddf.sts", "--instance", "primary"])
            .expect("parse");
        assert_eq!(cli.config.as_deref(), Some(Path::new("/tmp/confmap.json")));
        let Command::Resolve(args) = cli.command else {
            panic!("expected resolve");
        };
        assert_eq!(args.identity(), MappingIdentity::instance("ddf.sts", "primary"));
    }

    #[test]
    fn exit_status_distinguishes_not_ready_from_broken() {
        let identity = MappingIdentity::new("ddf.sts");
        let not_ready = anyhow::Error::from(ResolutionError::unavailable(&identity, "store offline"));
        assert_eq!(report_failure(&not_ready), EXIT_NOT_READY);

        let broken = anyhow::Error::from(ResolutionError::failed(&identity, &"rules/sts.yaml".into(), "boom"));
        assert_eq!(report_failure(&broken), EXIT_FAILURE);
        assert_eq!(report_failure(&anyhow::anyhow!("config missing")), EXIT_FAILURE);
    }

    #[test]
    fn sync_writes_configured_targets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rules = dir.path().join("rules");
        std::fs::create_dir_all(&rules).expect("rules dir");
        std::fs::write(rules.join("sts.yaml"), "name: ddf.sts\nproperties:\n  issuer: local\n").expect("rule");
        let output = dir.path().join("out/sts.json");
        let config_path = dir.path().join("confmap.json");
        std::fs::write(
            &config_path,
            r#"{ "rulesDir": "rules", "targets": [ { "name": "ddf.sts", "path": "out/sts.json" } ] }"#,
        )
        .expect("config");

        let runtime = bootstrap(Some(&config_path)).expect("bootstrap");
        sync_targets(&runtime.config, &runtime.service).expect("sync");

        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(output).expect("read output")).expect("json");
        assert_eq!(written, serde_json::json!({ "issuer": "local" }));
    }
}
