//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use tierconf::cluster::exec::{HostExecutor, ShellExecutor};
use tierconf::cluster::fanout::{FanoutOptions, FanoutReport, JobStatus, teardown};
use tierconf::cluster::hostfile::HostSet;
use tierconf::core::config::DeployConfig;
use tierconf::core::errors::TcfError;
use tierconf::logger::activity::{ActivityEvent, ActivityLog};
use tierconf::platform::pal::{StaticDiscovery, StorageDiscovery, detect_discovery};
use tierconf::synth::pass::{
    DeploymentInputs, PassContext, PassOutcome, StorageSource, SynthesisPlan, dry_run, run_pass,
};
use tierconf::synth::persist::{CLIENT_DOC_NAME, RenderedDocuments, SERVER_DOC_NAME};
use tierconf::synth::propagate::EngineEnvironment;
use tierconf::synth::state::DeploymentState;

/// Synthesizes tiered-buffering engine configuration and deploys it to a host set.
/// Parsed command line.
#[derive(Debug, Parser)]
#[command(
    name = "tierconf",
    author,
    version,
    about = "Tiered buffering configuration synthesizer",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Discover storage, build tiers, create backing dirs, and write engine documents.
    Configure(ConfigureArgs),
    /// List the storage resources discovery would offer.
    Discover(DiscoverArgs),
    /// Remove backing directories and documents recorded by the last configure.
    Clean(SharedDirArgs),
    /// Print the engine environment as shell exports.
    Env(SharedDirArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct ConfigureArgs {
    /// Shared directory for generated documents (overrides paths.shared_dir).
    #[arg(long, value_name = "DIR")]
    shared_dir: Option<PathBuf>,
    /// Hostfile listing the hosts to materialize directories on.
    #[arg(long, value_name = "PATH")]
    hostfile: Option<PathBuf>,
    /// Plan and print the documents without touching any host or engine document.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args)]
struct DiscoverArgs {
    /// Include mounts writable only by a privileged user.
    #[arg(long)]
    require_root: bool,
}

#[derive(Debug, Clone, Args)]
struct SharedDirArgs {
    /// Shared directory holding the deployment (overrides paths.shared_dir).
    #[arg(long, value_name = "DIR")]
    shared_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<TcfError> for CliError {
    fn from(err: TcfError) -> Self {
        match &err {
            TcfError::InvalidConfig { .. }
            | TcfError::MissingConfig { .. }
            | TcfError::ConfigParse { .. }
            | TcfError::InvalidChoice { .. }
            | TcfError::InvalidSize { .. }
            | TcfError::NoUsableStorage { .. } => Self::User(err.to_string()),
            TcfError::PartialFailure { .. } => Self::Partial(err.to_string()),
            TcfError::Serialization { .. } => Self::Internal(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Configure(args) => run_configure(cli, args),
        Command::Discover(args) => run_discover(cli, args),
        Command::Clean(args) => run_clean(cli, args),
        Command::Env(args) => run_env(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli, shared_dir: Option<&PathBuf>) -> Result<DeployConfig, CliError> {
    let mut config = DeployConfig::load(cli.config.as_deref())?;
    if let Some(dir) = shared_dir {
        config.paths.shared_dir.clone_from(dir);
    }
    Ok(config)
}

fn open_log(cli: &Cli, config: &DeployConfig) -> ActivityLog {
    let log = ActivityLog::open(&config.paths.activity_log_path());
    if cli.quiet { log.quiet() } else { log }
}

fn resolve_hosts(config: &DeployConfig) -> Result<HostSet, TcfError> {
    let mut hosts = match &config.cluster.hostfile {
        Some(path) => HostSet::load(path)?,
        None => HostSet::default(),
    };
    hosts.extend(HostSet::from_patterns(&config.cluster.hosts)?);
    Ok(if hosts.is_empty() {
        HostSet::local()
    } else {
        hosts
    })
}

fn discovery_for(inputs: &DeploymentInputs) -> Result<Arc<dyn StorageDiscovery>, TcfError> {
    match inputs.source {
        StorageSource::Discover { .. } => detect_discovery(),
        StorageSource::Declared(_) => Ok(Arc::new(StaticDiscovery::default())),
    }
}

fn run_configure(cli: &Cli, args: &ConfigureArgs) -> Result<(), CliError> {
    let mut config = load_config(cli, args.shared_dir.as_ref())?;
    if let Some(hostfile) = &args.hostfile {
        config.cluster.hostfile = Some(hostfile.clone());
    }
    let inputs = config.inputs()?;
    let discovery = discovery_for(&inputs)?;

    let config_hash = config.stable_hash()?;
    let log = open_log(cli, &config);

    if args.dry_run {
        let (synthesis, rendered) = dry_run(&inputs, discovery.as_ref(), &log, &config_hash)?;
        return emit_plan(cli, &synthesis, &rendered);
    }

    let hosts = resolve_hosts(&config)?.into_vec();
    let executor: Arc<dyn HostExecutor> = Arc::new(ShellExecutor::from_config(&config.cluster));
    let ctx = PassContext {
        shared_dir: &config.paths.shared_dir,
        hosts: &hosts,
        executor,
        fanout: FanoutOptions::from_config(&config.cluster),
        config_hash,
        log: &log,
    };

    let outcome = run_pass(&inputs, discovery.as_ref(), &ctx)?;
    emit_outcome(cli, &outcome, &hosts)?;
    if cli.verbose && output_mode(cli) == OutputMode::Human {
        println!(
            "  Activity log: {}",
            config.paths.activity_log_path().display()
        );
    }

    match outcome.to_error() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn emit_plan(
    cli: &Cli,
    synthesis: &SynthesisPlan,
    rendered: &RenderedDocuments,
) -> Result<(), CliError> {
    let server_text = &rendered.server;
    let client_text = &rendered.client;
    match output_mode(cli) {
        OutputMode::Human => {
            println!("{}", format!("# {SERVER_DOC_NAME} (dry run)").bold());
            println!("{server_text}");
            println!("{}", format!("# {CLIENT_DOC_NAME} (dry run)").bold());
            println!("{client_text}");
            println!("{}", "# backing directories".bold());
            for dir in &synthesis.backing_dirs {
                println!("{}", dir.display());
            }
            for skipped in &synthesis.skipped {
                println!(
                    "{} candidate {} ({}): {}",
                    "skipped".yellow(),
                    skipped.index,
                    skipped.raw_mount,
                    skipped.reason
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "configure",
                "dry_run": true,
                "server": serde_json::to_value(&synthesis.server)?,
                "client": serde_json::to_value(&synthesis.client)?,
                "backing_dirs": synthesis.backing_dirs,
                "skipped": synthesis.skipped,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn emit_outcome(cli: &Cli, outcome: &PassOutcome, hosts: &[String]) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            if cli.quiet {
                return Ok(());
            }
            let status = if outcome.is_complete() {
                "configured".green()
            } else {
                "partially configured".yellow()
            };
            println!(
                "{status}: {} tier(s) on {} host(s)",
                outcome.tiers.len(),
                hosts.len()
            );
            println!("  Tiers: {}", outcome.tiers.join(", "));
            println!(
                "  Server: {}{}",
                outcome.documents.server_path.display(),
                unchanged_suffix(outcome.documents.server_changed)
            );
            println!(
                "  Client: {}{}",
                outcome.documents.client_path.display(),
                unchanged_suffix(outcome.documents.client_changed)
            );
            println!("  Env: source {}", outcome.env_path.display());
            print_failures(&outcome.materialize);
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "configure",
                "dry_run": false,
                "complete": outcome.is_complete(),
                "outcome": serde_json::to_value(outcome)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn unchanged_suffix(changed: bool) -> &'static str {
    if changed { "" } else { " (unchanged)" }
}

fn print_failures(report: &FanoutReport) {
    for job in report.failures() {
        let detail = match &job.status {
            JobStatus::Failed { message, .. } => message.clone(),
            _ => "timed out".to_string(),
        };
        eprintln!(
            "  {} {} {}: {detail}",
            "FAILED".red(),
            job.host,
            job.path.display()
        );
    }
}

fn run_discover(cli: &Cli, args: &DiscoverArgs) -> Result<(), CliError> {
    let config = load_config(cli, None)?;
    let require_root = args.require_root || config.discovery.require_root;
    let resources = detect_discovery()?.discover(require_root)?;

    match output_mode(cli) {
        OutputMode::Human => {
            if resources.is_empty() {
                println!("No usable storage discovered.");
                return Ok(());
            }
            println!("{:<8} {:>10} {:<7} MOUNT", "CLASS", "AVAILABLE", "SHARED");
            for res in &resources {
                println!(
                    "{:<8} {:>10} {:<7} {}",
                    res.device_class.as_str(),
                    human_bytes(res.available_bytes),
                    if res.shared { "yes" } else { "no" },
                    res.mount
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "discover",
                "require_root": require_root,
                "resources": resources,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_clean(cli: &Cli, args: &SharedDirArgs) -> Result<(), CliError> {
    let config = load_config(cli, args.shared_dir.as_ref())?;
    let shared_dir = &config.paths.shared_dir;
    let Some(state) = DeploymentState::load(shared_dir)? else {
        match output_mode(cli) {
            OutputMode::Human => println!("Nothing to clean in {}.", shared_dir.display()),
            OutputMode::Json => write_json_line(&json!({
                "command": "clean",
                "found": false,
                "shared_dir": shared_dir,
            }))?,
        }
        return Ok(());
    };

    let log = open_log(cli, &config);
    let executor: Arc<dyn HostExecutor> = Arc::new(ShellExecutor::from_config(&config.cluster));
    let report = teardown(
        &state.backing_dirs,
        &state.hosts,
        &executor,
        FanoutOptions::from_config(&config.cluster),
        &log,
    );
    // Keep the state file on partial failure so a retry knows what is left.
    if report.is_success() {
        state.remove_artifacts(shared_dir)?;
    } else if let Some(err) = report.to_error() {
        log.record(ActivityEvent::from_error(&err));
    }
    log.flush();

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                println!(
                    "Removed {} of {} backing director{} across {} host(s).",
                    report.total() - report.failed_count(),
                    report.total(),
                    if report.total() == 1 { "y" } else { "ies" },
                    state.hosts.len()
                );
            }
            print_failures(&report);
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "clean",
                "found": true,
                "complete": report.is_success(),
                "report": serde_json::to_value(&report)?,
            }))?;
        }
    }

    match report.to_error() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn run_env(cli: &Cli, args: &SharedDirArgs) -> Result<(), CliError> {
    let config = load_config(cli, args.shared_dir.as_ref())?;
    let shared_dir = &config.paths.shared_dir;
    // A recorded deployment owns its environment; later config edits do not apply to it.
    let environment = match DeploymentState::load(shared_dir)? {
        Some(state) => EngineEnvironment::load(&state.env_path)?,
        None => EngineEnvironment::new(
            config.runtime.log_verbosity,
            config.adapter.adapter_mode,
            &shared_dir.join(SERVER_DOC_NAME),
            &shared_dir.join(CLIENT_DOC_NAME),
        ),
    };

    match output_mode(cli) {
        OutputMode::Human => print!("{}", environment.render_shell()),
        OutputMode::Json => write_json_line(&json!({
            "command": "env",
            "vars": environment.vars(),
        }))?,
    }
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(DeployConfig::default_path);
            let exists = path.exists();
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "config path",
                    "path": path.to_string_lossy(),
                    "exists": exists,
                }))?,
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli, None)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    let rendered = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{rendered}");
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "config show",
                    "config": serde_json::to_value(&config)?,
                }))?,
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => {
            let result = DeployConfig::load(cli.config.as_deref())
                .and_then(|config| config.inputs().map(|_| config));
            match result {
                Ok(config) => {
                    let hash = config.stable_hash()?;
                    match output_mode(cli) {
                        OutputMode::Human => {
                            println!("Configuration is {}.", "valid".green());
                            println!("  Source: {}", config.paths.config_file.display());
                            println!("  Hash: {hash}");
                        }
                        OutputMode::Json => write_json_line(&json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        }))?,
                    }
                    Ok(())
                }
                Err(e) => {
                    match output_mode(cli) {
                        OutputMode::Human => eprintln!("Configuration is {}: {e}", "INVALID".red()),
                        OutputMode::Json => write_json_line(&json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        }))?,
                    }
                    Err(e.into())
                }
            }
        }
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("TCF_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
