//! kubeop CLI.
//!
//! Runs commands across pod containers and cluster nodes, multiplexing their
//! output back to one terminal.

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kubeop::commands::node_exec::NodeExecCommand;
use kubeop::commands::pod_exec::PodExecCommand;
use kubeop::commands::Context;
use kubeop::{kubeconfig, terminal, ui, DispatchError, KubeCluster, KubeExec, ShutdownRegistry};

/// Exit status after an interrupt.
const INTERRUPTED: i32 = 130;

/// kubeop - remote execution across pods and nodes.
#[derive(Parser)]
#[command(
    name = "kubeop",
    version,
    about = "Run commands across pod containers and cluster nodes",
    long_about = "Run one command in many containers or on many nodes at once.\n\n\
                  Node commands run inside a short-lived privileged helper pod that\n\
                  enters the host namespaces. Helper pods are removed when the\n\
                  command finishes or the CLI is interrupted."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Kubeconfig file, or a path list as in `KUBECONFIG` (default: ~/.kube/config).
    #[arg(long, global = true, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use.
    #[arg(long, global = true)]
    context: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command in one or more pod containers.
    ///
    /// Targets are `[namespace/]pod[/container]` globs separated by commas,
    /// or `all`.
    PodExec(PodExecCommand),

    /// Run a command on one or more nodes.
    ///
    /// Each node gets a privileged helper pod in kube-system that is deleted
    /// afterwards.
    NodeExec(NodeExecCommand),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("warn,kubeop=debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let color = ui::color_enabled(terminal::stdout_is_terminal());
    ui::configure_color(color);

    let registry = Arc::new(ShutdownRegistry::new());

    let code = tokio::select! {
        result = run(cli, Arc::clone(&registry), color) => match result {
            Ok(()) => 0,
            Err(e) => report(&e),
        },
        () = shutdown_signal() => {
            registry.run_all().await;
            INTERRUPTED
        }
    };

    // Exit directly: a pending stdin read would otherwise hold up runtime shutdown.
    std::process::exit(code);
}

async fn run(cli: Cli, registry: Arc<ShutdownRegistry>, color: bool) -> Result<()> {
    let client = kubeconfig::connect(cli.kubeconfig.as_deref(), cli.context.as_deref()).await?;
    let exec = Arc::new(KubeExec::new(client.clone()));
    let ctx = Context {
        cluster: Arc::new(KubeCluster::new(client)),
        registry,
        color,
    };

    match cli.command {
        Commands::PodExec(cmd) => cmd.run(&ctx, exec).await,
        Commands::NodeExec(cmd) => cmd.run(&ctx, exec).await,
    }
}

fn report(error: &anyhow::Error) -> i32 {
    ui::print_error(&format!("{error:#}"));
    error
        .downcast_ref::<DispatchError>()
        .map_or(1, DispatchError::exit_code)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, cleaning up");
        },
        () = terminate => {
            info!("Received SIGTERM, cleaning up");
        },
    }
}
