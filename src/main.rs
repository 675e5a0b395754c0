// ABOUTME: Command-line entry point for dev-swap
// Resolves config, connects to the host, runs the swap and restores everything on exit

use anyhow::{bail, Context, Result};
use clap::Parser;
use dev_swap::config::{Config, HostMode, Selection};
use dev_swap::executor;
use dev_swap::swap::{ConfirmPrompt, FixedAnswer, SwapAction, SwapOrchestrator};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "dev-swap",
    version,
    about = "Swap a running service container for a local dev build"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Target service, overriding the component's target_service
    #[arg(short, long)]
    service: Option<String>,

    #[arg(long)]
    component: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    project: Option<String>,

    /// Remove a leftover dev container without asking
    #[arg(short, long)]
    yes: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(verbose: bool) {
    use tracing_subscriber::prelude::*;

    let default_filter = if verbose { "dev_swap=debug" } else { "dev_swap=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let runtime = config
        .resolve(&Selection {
            component: cli.component,
            host: cli.host,
            project: cli.project,
            service: cli.service,
        })
        .context("Failed to resolve configuration")?;

    if !runtime.component.local_binary.is_file() {
        bail!(
            "Local binary {} does not exist",
            runtime.component.local_binary.display()
        );
    }

    match &runtime.host.mode {
        HostMode::Local => info!("Host: {} (local)", runtime.host.name),
        HostMode::Remote(target) => info!(
            "Host: {} ({}@{}:{})",
            runtime.host.name, target.user, target.host, target.port
        ),
    }
    info!(
        "Service: {} -> {}",
        runtime.component.target_service,
        runtime.dev_container_name()
    );

    let executor = executor::connect(&runtime.host)
        .await
        .with_context(|| format!("Failed to connect to host {}", runtime.host.name))?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("Interrupt received, restoring original container");
            cancel.cancel();
        }
    });

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            println!("{line}");
        }
    });

    let (action_tx, action_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    spawn_action_reader(action_tx, ready_rx);

    let prompt: Arc<dyn ConfirmPrompt> = if cli.yes {
        Arc::new(FixedAnswer(true))
    } else {
        Arc::new(TerminalPrompt)
    };

    let orchestrator = SwapOrchestrator::new(runtime, executor.clone(), prompt, line_tx);
    let result = orchestrator.run(cancel.clone(), action_rx, Some(ready_tx)).await;

    cancel.cancel();
    if let Err(e) = executor.close().await {
        debug!("Closing connection failed: {}", e);
    }
    let _ = printer.await;

    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Read `d`, `r` and `q` commands from stdin once the swap is running.
///
/// Runs on a plain thread so a pending read never holds up runtime shutdown.
fn spawn_action_reader(actions: mpsc::UnboundedSender<SwapAction>, ready: oneshot::Receiver<()>) {
    std::thread::spawn(move || {
        // Waiting keeps stdin free for the cleanup prompt
        if ready.blocking_recv().is_err() {
            return;
        }
        eprintln!("Commands: d = toggle debugger, r = redeploy, q = quit");

        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<SwapAction>() {
                Ok(action) => {
                    if actions.send(action).is_err() {
                        break;
                    }
                }
                Err(e) => eprintln!("{e}"),
            }
        }
    });
}

struct TerminalPrompt;

impl ConfirmPrompt for TerminalPrompt {
    fn confirm(&self, message: &str) -> bool {
        dialoguer::Confirm::new()
            .with_prompt(message)
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}
