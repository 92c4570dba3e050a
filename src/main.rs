use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mup::config::Config;
use mup::errors::ControlFlowError;
use mup::hooks::registry::HookRegistry;
use mup::hooks::types::HookEvent;
use mup::mongo::ClusterProbe;
use mup::node_ops::NodeOperations;
use mup::orchestrator::{Orchestrator, OrchestratorError};
use mup::prompt::{PromptLevel, Prompter};
use mup::state::store::StateStore;
use mup::supervisor::config_gen::program_name_for;
use mup::supervisor::{LocalNodeOperations, RealSupervisorLauncher, SupervisorHandle};
use mup::topology::Topology;
use mup::version::Version;
use mup::version_env::VersionEnv;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mup")]
#[command(version, about = "In-place version upgrade orchestrator for a single-host MongoDB cluster")]
struct Cli {
    /// Directory holding `current`/`previous`/`next` version symlinks, state,
    /// and (optionally) `mup.toml` and `topology.yaml`.
    #[arg(long, global = true, default_value = ".")]
    cluster_root: PathBuf,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, global = true, value_enum)]
    prompt_level: Option<PromptLevelArg>,

    /// Never prompt; always answer "continue". Overrides `--prompt-level`.
    #[arg(long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum PromptLevelArg {
    None,
    Phase,
    Node,
    Critical,
}

impl From<PromptLevelArg> for PromptLevel {
    fn from(value: PromptLevelArg) -> Self {
        match value {
            PromptLevelArg::None => PromptLevel::None,
            PromptLevelArg::Phase => PromptLevel::Phase,
            PromptLevelArg::Node => PromptLevel::Node,
            PromptLevelArg::Critical => PromptLevel::Critical,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Upgrade the cluster from its current version to `to`.
    Upgrade {
        to: String,
        /// Print the phase/step plan without touching the cluster.
        #[arg(long)]
        dry_run: bool,
    },
    /// Resume an upgrade that was paused or interrupted.
    Resume,
    /// Print the live upgrade state without mutating anything.
    Status,
    /// Alias for `upgrade --dry-run`.
    Plan { to: String },
    /// Archive and remove any live upgrade state.
    Reset {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli.cluster_root);

    match &cli.command {
        Commands::Upgrade { to, dry_run } if *dry_run => cmd_plan(&cli, to).await,
        Commands::Upgrade { to, .. } => cmd_upgrade(&cli, to).await,
        Commands::Plan { to } => cmd_plan(&cli, to).await,
        Commands::Resume => cmd_resume(&cli).await,
        Commands::Status => cmd_status(&cli),
        Commands::Reset { force } => cmd_reset(&cli, *force),
    }
}

/// Installs a `fmt` layer on stderr plus a non-blocking rolling file writer
/// under `<cluster_root>/upgrade.log`. The returned guard must stay alive for
/// the process lifetime or the file writer's background thread is dropped.
fn init_logging(cluster_root: &std::path::Path) -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let _ = std::fs::create_dir_all(cluster_root);
    let file_appender = tracing_appender::rolling::never(cluster_root, "upgrade.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(non_blocking))
        .init();

    guard
}

fn load_topology(cluster_root: &std::path::Path) -> Result<Topology> {
    let path = cluster_root.join("topology.yaml");
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading topology from {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing topology at {}", path.display()))
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::new(cli.cluster_root.clone()).load_overlay()?;
    if let Some(level) = cli.prompt_level {
        config.prompt_level = level.into();
    }
    Ok(config)
}

/// Load every hook script under `<cluster_root>/hooks/<event>.sh` (or
/// extensionless) and register it against the matching event.
fn load_hooks(cluster_root: &std::path::Path) -> HookRegistry {
    let mut registry = HookRegistry::new();
    let hooks_dir = cluster_root.join("hooks");
    if !hooks_dir.is_dir() {
        return registry;
    }
    for event in HookEvent::all() {
        for candidate in [hooks_dir.join(event.as_str()), hooks_dir.join(format!("{}.sh", event.as_str()))] {
            if candidate.is_file() {
                registry.register(Box::new(mup::hooks::ExternalCommandHook::new(
                    event.as_str(),
                    *event,
                    candidate.display().to_string(),
                    hooks_dir.clone(),
                )));
            }
        }
    }
    registry
}

/// Build one `LocalNodeOperations` per topology node, against the supervisor
/// handles for `from` (old, already running) and `to` (new, staged by
/// `VersionEnv::stage`/`expose` before the orchestrator launches it).
fn build_node_ops(
    topology: &Topology,
    version_env: &VersionEnv,
    from_mm: &str,
    to_mm: &str,
) -> HashMap<String, Box<dyn NodeOperations>> {
    let old = SupervisorHandle {
        control_port: version_env.control_port(from_mm),
        ini_path: version_env.ini_path(from_mm),
    };
    let new = SupervisorHandle {
        control_port: version_env.control_port(to_mm),
        ini_path: version_env.ini_path(to_mm),
    };

    let mut nodes: HashMap<String, Box<dyn NodeOperations>> = HashMap::new();
    for node in &topology.mongod {
        let program = program_name_for(node, false);
        nodes.insert(
            node.id(),
            Box::new(LocalNodeOperations::new(node.clone(), program, old.clone(), new.clone())),
        );
    }
    for node in &topology.config_svr {
        let program = program_name_for(node, false);
        nodes.insert(
            node.id(),
            Box::new(LocalNodeOperations::new(node.clone(), program, old.clone(), new.clone())),
        );
    }
    for node in &topology.mongos {
        let program = program_name_for(node, true);
        nodes.insert(
            node.id(),
            Box::new(LocalNodeOperations::new(node.clone(), program, old.clone(), new.clone())),
        );
    }
    nodes
}

async fn build_orchestrator(cli: &Cli, from: &Version, to: &Version) -> Result<Orchestrator> {
    let config = build_config(cli)?;
    let topology = load_topology(&config.cluster_root)?;
    let hooks = load_hooks(&config.cluster_root);

    let mut prompter = Prompter::new(config.prompt_level);
    prompter.auto_continue = cli.yes;

    let probe = ClusterProbe::connect(&topology)
        .await
        .context("connecting to the cluster")?;

    let version_env = VersionEnv::new(config.cluster_root.clone(), config.port_base);
    let from_mm = from.major_minor_string();
    let to_mm = to.major_minor_string();
    let nodes = build_node_ops(&topology, &version_env, &from_mm, &to_mm);

    let old_supervisor = SupervisorHandle {
        control_port: version_env.control_port(&from_mm),
        ini_path: version_env.ini_path(&from_mm),
    };

    let cluster_name = config
        .cluster_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cluster0".to_string());

    Ok(Orchestrator::new(
        config,
        cluster_name,
        topology,
        hooks,
        prompter,
        Box::new(probe),
        nodes,
        old_supervisor,
        Box::new(RealSupervisorLauncher),
    ))
}

async fn cmd_upgrade(cli: &Cli, to: &str) -> Result<()> {
    let config = build_config(cli)?;
    let to = Version::parse(to)?;
    let from = current_version(&config)?;

    let mut orchestrator = build_orchestrator(cli, &from, &to).await?;
    run_and_report(orchestrator.run_upgrade(from, to).await)
}

async fn cmd_resume(cli: &Cli) -> Result<()> {
    let config = build_config(cli)?;
    let store = StateStore::new(config.state_file.clone(), config.history_dir.clone());
    if !store.exists() {
        anyhow::bail!("no upgrade state found at {}; nothing to resume", config.state_file.display());
    }
    let state = store.load()?;
    let from = Version::parse(&state.previous_version)?;
    let to = Version::parse(&state.target_version)?;

    let mut orchestrator = build_orchestrator(cli, &from, &to).await?;
    run_and_report(orchestrator.run_upgrade(from, to).await)
}

fn run_and_report(result: Result<(), OrchestratorError>) -> Result<()> {
    match result {
        Ok(()) => {
            println!("upgrade completed");
            Ok(())
        }
        Err(OrchestratorError::ControlFlow(ControlFlowError::PausedByUser { reason })) => {
            println!("upgrade paused: {reason}");
            std::process::exit(2);
        }
        Err(OrchestratorError::ControlFlow(ControlFlowError::AbortedByUser)) => {
            println!("upgrade aborted by user");
            std::process::exit(3);
        }
        Err(err) => Err(err.into()),
    }
}

async fn cmd_plan(cli: &Cli, to: &str) -> Result<()> {
    let config = build_config(cli)?;
    let topology = load_topology(&config.cluster_root)?;
    let to = Version::parse(to)?;
    let from = current_version(&config)?;

    let plan = mup::orchestrator::plan::generate(&topology, &from, &to);
    let rendered = serde_json::to_string_pretty(&plan)?;
    println!("{rendered}");
    Ok(())
}

fn cmd_status(cli: &Cli) -> Result<()> {
    let config = build_config(cli)?;
    let store = StateStore::new(config.state_file.clone(), config.history_dir.clone());
    if !store.exists() {
        println!("no upgrade in progress at {}", config.cluster_root.display());
        return Ok(());
    }
    let state = store.load()?;
    println!("cluster:  {}", state.cluster_name);
    println!("upgrade:  {} -> {} ({:?})", state.previous_version, state.target_version, state.overall);
    println!("phase:    {}", state.current_phase);
    println!();
    for (name, phase) in &state.phases {
        println!("  [{:?}] {name}", phase.status);
    }
    println!();
    for (id, node) in &state.nodes {
        println!("  {id}: {:?}", node.status);
    }
    if !state.failovers.is_empty() {
        println!();
        println!("failovers:");
        for event in &state.failovers {
            println!("  {} -> {} ({})", event.old_primary, event.new_primary, event.replica_set);
        }
    }
    Ok(())
}

fn cmd_reset(cli: &Cli, force: bool) -> Result<()> {
    let config = build_config(cli)?;
    let store = StateStore::new(config.state_file.clone(), config.history_dir.clone());
    if !store.exists() {
        println!("no upgrade state found; nothing to reset");
        return Ok(());
    }

    if !force {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("This discards the live upgrade state (it is archived first). Continue?")
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirmed {
            println!("reset cancelled");
            return Ok(());
        }
    }

    let state = store.load()?;
    let archive_path = store.archive(&state)?;
    println!("state archived to {} and reset", archive_path.display());
    Ok(())
}

/// The cluster's current major.minor, read from whichever version directory
/// `current` points at, falling back to the live FCV if `current` is absent.
fn current_version(config: &Config) -> Result<Version> {
    let version_env = VersionEnv::new(config.cluster_root.clone(), config.port_base);
    let target = version_env
        .current_target()
        .context("reading the `current` version symlink; is this cluster root initialized?")?;
    let dir_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("`current` does not point at a version directory"))?;
    let mm = dir_name.strip_prefix('v').unwrap_or(dir_name);
    Version::parse(mm).with_context(|| format!("`current` points at an unparseable version directory: {dir_name}"))
}
