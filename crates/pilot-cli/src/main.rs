//! shellpilot: natural-language shell driven by a remote Gemini model
//!
//! Each request is sent to the model, which answers with a short response and
//! optionally a shell command. Commands are run locally and their results fed
//! back until the model has nothing left to run.

mod agent;
mod executor;
mod interpreter;
mod memory;
mod repl;
mod security;
mod session;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pilot_core::{Config, GeminiClient};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::agent::{AgentConfig, AgentLoop};
use crate::executor::ShellExecutor;
use crate::memory::MemoryLog;
use crate::security::{AllowAll, CommandGuard, TerminalConfirmation};
use crate::session::{load_pilot_prompt, Session};

#[derive(Debug, Parser)]
#[command(name = "shellpilot")]
#[command(about = "Natural-language shell driven by a remote model", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: pilot.toml in this or a parent directory)
    #[arg(short, long, global = true, env = "SHELLPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Model to use (overrides config)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Pilot prompt file
    #[arg(long, global = true)]
    pilot: Option<PathBuf>,

    /// Memory file
    #[arg(long, global = true)]
    memory: Option<PathBuf>,

    /// Maximum commands the model may chain for one request
    #[arg(long, global = true)]
    max_chain_depth: Option<usize>,

    /// Ask before running each command
    #[arg(long, global = true)]
    confirm: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the interactive session (default)
    Chat,

    /// Write a default configuration file
    InitConfig {
        /// Destination (default: user config directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::InitConfig { output }) => init_config(output.as_deref()),
        Some(Commands::Chat) | None => chat(&cli).await,
    }
}

fn init_config(output: Option<&Path>) -> Result<()> {
    let path = match output {
        Some(path) => path.to_path_buf(),
        None => Config::user_config_path().context("Could not determine config directory")?,
    };

    Config::create_default(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

async fn chat(cli: &Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    apply_overrides(&mut config, cli);

    let _log_guard = init_logging(&config.log_path(), cli.verbose)?;
    info!(model = %config.model.name, "Starting shellpilot");

    let pilot_path = config.pilot_prompt_path();
    let pilot_prompt = load_pilot_prompt(&pilot_path).inspect_err(|e| {
        error!(path = %pilot_path.display(), error = %e, "Failed to load pilot prompt");
    })?;

    let client = GeminiClient::new(&config)?;
    info!(model = client.model(), "Gemini client ready");

    let memory = MemoryLog::load(config.memory_path())?;
    info!(path = %memory.path().display(), entries = memory.entries().len(), "Memory ready");

    let user = repl::current_user();
    let host = repl::host_name();

    let agent = AgentLoop::new(
        AgentConfig::new(user.clone()).with_max_chain_depth(config.agent.max_chain_depth),
        config.retry.clone(),
        Arc::new(build_executor(&config)),
    )
    .with_guard(build_guard(cli.confirm))
    .with_memory(memory);

    let session = Session::start(Arc::new(client), &pilot_prompt);

    repl::run(agent, session, &user, &host).await
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(model) = &cli.model {
        config.model.name = model.clone();
    }
    if let Some(pilot) = &cli.pilot {
        config.paths.pilot_prompt = Some(pilot.clone());
    }
    if let Some(memory) = &cli.memory {
        config.paths.memory_file = Some(memory.clone());
    }
    if let Some(depth) = cli.max_chain_depth {
        config.agent.max_chain_depth = depth;
    }
}

fn build_executor(config: &Config) -> ShellExecutor {
    let mut executor = ShellExecutor::new()
        .with_timeout(Duration::from_secs(config.agent.command_timeout_secs))
        .with_max_output_len(config.agent.max_output_len);

    if let Some(shell) = &config.agent.shell {
        executor = executor.with_shell(shell.clone());
    }
    if let Some(dir) = &config.agent.working_dir {
        executor = executor.with_working_dir(dir.clone());
    }
    executor
}

fn build_guard(confirm: bool) -> Arc<dyn CommandGuard> {
    if confirm {
        Arc::new(TerminalConfirmation)
    } else {
        Arc::new(AllowAll)
    }
}

/// Send tracing output to `path`; the returned guard flushes it on drop
fn init_logging(path: &Path, verbose: bool) -> Result<WorkerGuard> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .context("Log path has no file name")?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(guard)
}
