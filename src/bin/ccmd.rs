//! ccmd - Runs coding agents in git worktrees, with an optional autopilot
//!
//! # Usage
//!
//! ```bash
//! # One agent per worktree of the current repository
//! ccmd run
//!
//! # Specific worktrees, a named preset, autopilot on
//! ccmd run --preset gemini --autopilot ../repo/.worktrees/feat-a ../repo/.worktrees/feat-b
//!
//! # Repositories under $CCMANAGER_MULTI_PROJECT_ROOT
//! ccmd projects
//!
//! # Worktrees of a repository, dirty ones marked with `*`
//! ccmd worktrees ~/src/repo
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ccm_core::{
    BaseGuidanceSource, CommandPreset, ConcurrencyLimiter, Config, GuidancePipeline, GuidanceSource,
};
use ccm_tmux::{is_tmux_available, TmuxSpawner};
use ccmd::git::{self, Worktree};
use ccmd::projects::{discover_projects, multi_project_root};
use ccmd::{
    spawn_autopilot, CommandAnalysisClient, ManagerConfig, SessionEvent, SessionOptions,
    SessionOrchestrator,
};

/// ccm - worktree session manager for coding agents
#[derive(Parser, Debug)]
#[command(name = "ccmd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start an agent session in each worktree and watch them until Ctrl+C
    Run {
        /// Configuration file (defaults to the user config, if present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Preset to launch (defaults to the configured default preset)
        #[arg(short, long)]
        preset: Option<String>,

        /// Repository whose worktrees are used when none are listed
        #[arg(long)]
        project: Option<PathBuf>,

        /// Enable the autopilot regardless of configuration
        #[arg(long)]
        autopilot: bool,

        /// Worktree directories
        worktrees: Vec<PathBuf>,
    },
    /// List git repositories under the multi-project root
    Projects,
    /// List the worktrees of a repository
    Worktrees {
        /// Any directory inside the repository (defaults to the current one)
        path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ccmd=info".parse()?)
                .add_directive("ccm_core=info".parse()?)
                .add_directive("ccm_tmux=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Run {
            config,
            preset,
            project,
            autopilot,
            worktrees,
        } => run_sessions(RunOptions {
            config,
            preset,
            project,
            autopilot,
            worktrees,
        }),
        Command::Projects => list_projects(),
        Command::Worktrees { path } => list_worktrees(path),
    }
}

// ============================================================================
// run
// ============================================================================

struct RunOptions {
    config: Option<PathBuf>,
    preset: Option<String>,
    project: Option<PathBuf>,
    autopilot: bool,
    worktrees: Vec<PathBuf>,
}

#[tokio::main]
async fn run_sessions(options: RunOptions) -> Result<()> {
    let mut config = match &options.config {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::load_or_default().context("Failed to load configuration")?,
    };
    if options.autopilot {
        config.autopilot.enabled = true;
    }
    let preset = select_preset(&config, options.preset.as_deref())?;

    if !is_tmux_available().await {
        bail!("tmux is not installed or not on PATH");
    }

    let start = match options.project {
        Some(path) => path,
        None => env::current_dir().context("Failed to read current directory")?,
    };
    let project = blocking(move || Ok(git::find_repository_root(&start).unwrap_or(start))).await?;
    let worktrees = if options.worktrees.is_empty() {
        let root = project.clone();
        blocking(move || {
            let worktrees = git::list_worktrees(&root)
                .with_context(|| format!("Failed to list worktrees of {}", root.display()))?;
            Ok(worktrees
                .into_iter()
                .filter(|w| !w.is_bare && !w.is_prunable)
                .map(|w| w.path)
                .collect::<Vec<_>>())
        })
        .await?
    } else {
        options.worktrees
    };
    if worktrees.is_empty() {
        bail!("No worktrees to run in");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        project = %project.display(),
        preset = %preset.id,
        worktrees = worktrees.len(),
        autopilot = config.autopilot.enabled,
        "ccmd starting"
    );

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let orchestrator = SessionOrchestrator::new(Arc::new(TmuxSpawner::new()), ManagerConfig::default());
    let manager = orchestrator.get_manager_for_project(Some(project.as_path()));
    let mut events = manager.subscribe();

    let autopilot_handle = if config.autopilot.enabled {
        let client = Arc::new(CommandAnalysisClient::new(&config.autopilot));
        let limiter = ConcurrencyLimiter::new(config.autopilot.max_concurrency)?;
        let base = BaseGuidanceSource::new(client, limiter, &config.autopilot);
        let pipeline = GuidancePipeline::new(vec![Arc::new(base) as Arc<dyn GuidanceSource>]);
        Some(spawn_autopilot(
            manager.clone(),
            pipeline,
            config.autopilot.clone(),
            project.clone(),
            cancel_token.clone(),
        ))
    } else {
        None
    };

    let mut started = 0usize;
    for worktree in &worktrees {
        match manager
            .create_session(worktree.clone(), SessionOptions::from_preset(preset.clone()))
            .await
        {
            Ok(view) => {
                started += 1;
                info!(session = %view.id, process = %view.process_id, agent = ?view.agent, "Session started");
            }
            Err(e) => error!(worktree = %worktree.display(), error = %e, "Failed to start session"),
        }
    }

    if started == 0 {
        cancel_token.cancel();
        orchestrator.destroy_all_sessions().await;
        bail!("No session could be started");
    }

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            result = events.recv() => match result {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event log lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
        if manager.session_count().await == 0 {
            info!("All sessions have ended");
            break;
        }
    }

    cancel_token.cancel();
    if let Some(handle) = autopilot_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "Autopilot task failed");
        }
    }
    orchestrator.destroy_all_sessions().await;

    info!("ccmd stopped");
    Ok(())
}

fn select_preset(config: &Config, id: Option<&str>) -> Result<CommandPreset> {
    let preset = match id {
        Some(id) => config
            .presets
            .preset(id)
            .with_context(|| format!("Unknown preset '{id}'"))?,
        None => config
            .presets
            .default_preset()
            .context("No presets configured")?,
    };
    Ok(preset.clone())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Created { .. } => {}
        SessionEvent::StateChanged {
            session_id,
            previous,
            state,
        } => info!(session = %session_id.short(), from = %previous, to = %state, "State changed"),
        SessionEvent::BackgroundTaskChanged { session_id, active } => {
            info!(session = %session_id.short(), active, "Background task")
        }
        SessionEvent::Destroyed { session_id, reason } => {
            info!(session = %session_id.short(), reason = %reason, "Session ended")
        }
    }
}

/// Runs blocking git and filesystem work off the async runtime.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("Blocking task failed")?
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

// ============================================================================
// projects / worktrees
// ============================================================================

fn list_projects() -> Result<()> {
    let root = multi_project_root()?;
    let projects = discover_projects(&root)?;
    if projects.is_empty() {
        println!("No git repositories under {}", root.display());
        return Ok(());
    }
    for project in projects {
        println!("{:<24} {}", project.name, project.relative_path);
    }
    Ok(())
}

fn list_worktrees(path: Option<PathBuf>) -> Result<()> {
    let start = match path {
        Some(path) => path,
        None => env::current_dir().context("Failed to read current directory")?,
    };
    let root = git::find_repository_root(&start).unwrap_or(start);
    let worktrees = git::list_worktrees(&root)
        .with_context(|| format!("Failed to list worktrees of {}", root.display()))?;

    for worktree in &worktrees {
        println!("{}", describe_worktree(worktree, &root));
    }
    if !git::is_worktree_config_enabled(&root) {
        info!("extensions.worktreeConfig is not enabled for this repository");
    }
    Ok(())
}

fn describe_worktree(worktree: &Worktree, root: &Path) -> String {
    let dirty = if !worktree.is_bare && git::has_uncommitted_changes(&worktree.path) {
        "*"
    } else {
        " "
    };
    let branch = match (&worktree.branch, worktree.is_bare, worktree.is_detached) {
        (_, true, _) => "(bare)".to_string(),
        (_, _, true) => format!(
            "(detached {})",
            worktree.head.as_deref().map_or("", |h| h.get(..7).unwrap_or(h))
        ),
        (Some(branch), _, _) => branch.clone(),
        (None, _, _) => "-".to_string(),
    };
    let path = worktree
        .path
        .strip_prefix(root)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty())
        .map_or_else(|| worktree.path.display().to_string(), |rel| rel.display().to_string());

    let mut flags = Vec::new();
    if worktree.is_main {
        flags.push("main");
    }
    if worktree.is_locked {
        flags.push("locked");
    }
    if worktree.is_prunable {
        flags.push("prunable");
    }
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };

    format!("{dirty} {branch:<30} {path}{flags}")
}
