//! deckd - Headless terminal supervision core
//!
//! Runs the core with a JSON-lines event sink on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Run with the hook listener and one Claude session
//! deckd run --hooks --project web=/home/u/web --spawn /home/u/web --claude
//!
//! # Print the port handler scripts should POST to
//! deckd port
//! ```

use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use deck_core::{ProjectId, SessionId};
use deck_protocol::{BusEvent, BusEventKind, CreateRequest};
use deckd::hooks::read_port_file;
use deckd::{Core, CoreConfig, SubscriptionFilter};

/// Sink queue depth; a slow stdout pushes back onto the bus.
const SINK_BUFFER: usize = 1024;

/// deck core - PTY supervisor and Claude session state
#[derive(Parser, Debug)]
#[command(name = "deckd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the core until SIGINT/SIGTERM
    Run(RunArgs),
    /// Print the hook listener port from the port file
    Port {
        /// Config file (defaults to <app-data>/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Config file (defaults to <app-data>/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable the hook listener
    #[arg(long)]
    hooks: bool,

    /// Register a project root, as ID=ROOT (repeatable)
    #[arg(long = "project", value_name = "ID=ROOT", value_parser = parse_project)]
    projects: Vec<(String, String)>,

    /// Spawn a session in this directory; stdin is forwarded to it
    #[arg(long, value_name = "CWD")]
    spawn: Option<String>,

    /// Launch the Claude CLI in the spawned session
    #[arg(long, requires = "spawn")]
    claude: bool,

    /// Pass --dangerously-skip-permissions to the Claude CLI
    #[arg(long, requires = "claude")]
    skip_permissions: bool,

    /// Resume a Claude CLI session by id
    #[arg(long, value_name = "ID", requires = "claude")]
    resume: Option<String>,

    /// Include PTY output text in pty.data lines
    #[arg(long)]
    raw: bool,
}

fn parse_project(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((id, root)) if !id.trim().is_empty() && !root.trim().is_empty() => {
            Ok((id.trim().to_string(), root.trim().to_string()))
        }
        _ => Err(format!("expected ID=ROOT, got {s:?}")),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(run) => run_core(run),
        Command::Port { config } => {
            let config = CoreConfig::load(config.as_deref())?;
            match read_port_file(&config.app_data_dir()) {
                Some(port) => {
                    println!("{port}");
                    Ok(())
                }
                None => {
                    eprintln!(
                        "No hook listener port at {}",
                        config.port_file_path().display()
                    );
                    process::exit(1);
                }
            }
        }
    }
}

#[tokio::main]
async fn run_core(args: RunArgs) -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("deckd=info".parse()?)
                .add_directive("deck_core=info".parse()?)
                .add_directive("deck_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "deck core starting"
    );

    let mut config = CoreConfig::load(args.config.as_deref())?;
    if args.hooks {
        config.hooks.enabled = true;
    }

    let core = Core::start(config).await.context("Failed to start core")?;

    for (id, root) in &args.projects {
        core.registry()
            .register_project(ProjectId::from(id.as_str()), root.as_str())
            .await
            .with_context(|| format!("Failed to register project {id}"))?;
    }

    let (_sink_id, events) = core
        .bus()
        .subscribe_channel(SubscriptionFilter::all(), SINK_BUFFER);
    let sink = tokio::spawn(write_events(events, args.raw));

    let spawned = match &args.spawn {
        Some(cwd) => Some(spawn_session(&core, cwd, &args).await?),
        None => None,
    };
    let forward = spawned.map(|id| {
        let supervisor = core.supervisor().clone();
        tokio::spawn(async move { forward_stdin(supervisor, id).await })
    });

    if let Err(e) = wait_for_shutdown_signal().await {
        error!(error = %e, "Error waiting for shutdown signal");
    }
    info!("Shutdown signal received");

    if let Some(forward) = forward {
        forward.abort();
    }
    core.shutdown().await;
    sink.abort();

    info!("deck core stopped");
    Ok(())
}

async fn spawn_session(core: &Core, cwd: &str, args: &RunArgs) -> Result<SessionId> {
    let mut request = if args.claude {
        CreateRequest::claude(cwd)
    } else {
        CreateRequest::shell(cwd)
    };
    request.skip_permissions = args.skip_permissions;
    request.resume_session_id = args.resume.clone();

    match core.supervisor().create(request).await {
        Ok(id) => {
            info!(session_id = %id, "Session spawned");
            Ok(id)
        }
        Err(e) => bail!("Failed to spawn session: {e}"),
    }
}

async fn forward_stdin(supervisor: deckd::Supervisor, id: SessionId) {
    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; 4096];
    loop {
        match stdin.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let bytes = buf.get(..n).map(<[u8]>::to_vec).unwrap_or_default();
                if let Err(e) = supervisor.write(id, bytes).await {
                    warn!(session_id = %id, error = %e, "Forwarding stdin failed");
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Reading stdin failed");
                break;
            }
        }
    }
}

/// Writes one JSON object per bus event to stdout.
async fn write_events(mut events: tokio::sync::mpsc::Receiver<BusEvent>, raw: bool) {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        let mut line = match serde_json::to_value(&event) {
            Ok(value) => value,
            Err(e) => {
                warn!(kind = %event.kind, error = %e, "Unserializable bus event");
                continue;
            }
        };
        if raw && event.kind == BusEventKind::PtyData {
            if let (Some(data), Some(payload)) = (
                event.data.as_deref(),
                line.get_mut("payload").and_then(Value::as_object_mut),
            ) {
                payload.insert(
                    "text".to_string(),
                    Value::String(String::from_utf8_lossy(data).into_owned()),
                );
            }
        }
        let mut text = line.to_string();
        text.push('\n');
        if stdout.write_all(text.as_bytes()).await.is_err() {
            break;
        }
        let _ = stdout.flush().await;
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_project() {
        assert_eq!(
            parse_project("web=/home/u/web").unwrap(),
            ("web".to_string(), "/home/u/web".to_string())
        );
        assert!(parse_project("web").is_err());
        assert!(parse_project("=/x").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let args = Args::try_parse_from([
            "deckd", "run", "--hooks", "--project", "p=/tmp", "--spawn", "/tmp", "--claude",
        ])
        .unwrap();
        match args.command {
            Some(Command::Run(run)) => {
                assert!(run.hooks);
                assert!(run.claude);
                assert_eq!(run.projects.len(), 1);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_claude_requires_spawn() {
        assert!(Args::try_parse_from(["deckd", "run", "--claude"]).is_err());
    }
}
