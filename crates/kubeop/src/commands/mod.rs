//! Subcommand implementations.

pub mod node_exec;
pub mod pod_exec;

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::{info, warn};

use crate::cluster::Cluster;
use crate::config::{default_shell, TargetKind};
use crate::dispatch::{DispatchOptions, Dispatcher, TargetRunner};
use crate::output::RenderMode;
use crate::shutdown::ShutdownRegistry;
use crate::target::TargetResolver;
use crate::ui;

/// State shared by every subcommand.
pub struct Context {
    pub cluster: Arc<dyn Cluster>,
    pub registry: Arc<ShutdownRegistry>,
    pub color: bool,
}

/// Flags common to `pod-exec` and `node-exec`.
#[derive(Args, Debug, Clone)]
pub struct ExecArgs {
    /// Allocate a TTY (single target only).
    #[arg(short, long)]
    pub tty: bool,

    /// Deprecated: TTY is off unless --tty is given.
    #[arg(long, conflicts_with = "tty", hide = true)]
    pub no_tty: bool,

    /// Forward local stdin to the remote command.
    #[arg(short = 'i', long)]
    pub stdin: bool,

    /// Group output by target instead of interleaving it.
    #[arg(long)]
    pub block: bool,

    /// Maximum concurrent sessions (0 = one per target).
    #[arg(long, env = "KUBEOP_MAX_PARALLEL", default_value_t = 0)]
    pub max_parallel: usize,

    /// Only report how many targets failed.
    #[arg(long)]
    pub quiet_errors: bool,
}

impl ExecArgs {
    /// Effective TTY request after the deprecated flag.
    #[must_use]
    pub fn tty_requested(&self) -> bool {
        if self.no_tty {
            warn!("--no-tty is deprecated; TTY is disabled unless --tty is given");
            return false;
        }
        self.tty
    }

    /// Build dispatch options, substituting the interactive shell for an
    /// empty command.
    #[must_use]
    pub fn options(&self, command: &[String]) -> DispatchOptions {
        let command = if command.is_empty() {
            default_shell()
        } else {
            command.to_vec()
        };
        DispatchOptions {
            command,
            tty: self.tty_requested(),
            stdin: self.stdin,
            mode: RenderMode::from_block_flag(self.block),
            max_parallel: self.max_parallel,
            error_detail: !self.quiet_errors,
        }
    }
}

/// List targets when no expression is given, otherwise resolve and dispatch.
///
/// # Errors
///
/// Returns resolution failures and the combined dispatch failure.
pub async fn run_exec(
    ctx: &Context,
    kind: TargetKind,
    expression: Option<&str>,
    options: DispatchOptions,
    runner: Arc<dyn TargetRunner>,
) -> Result<()> {
    let resolver = TargetResolver::new(ctx.cluster.as_ref());

    let Some(expression) = expression else {
        let names = resolver.available(kind).await?;
        ui::print_targets(kind, &names);
        return Ok(());
    };

    let targets = resolver.resolve(kind, expression).await?;
    info!(%kind, expression, targets = targets.len(), "Resolved targets");

    Dispatcher::new(runner)
        .with_color(ctx.color)
        .dispatch(targets, options)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        exec: ExecArgs,
    }

    #[test]
    fn test_empty_command_uses_shell() {
        let args = Harness::parse_from(["kubeop"]).exec;
        assert_eq!(args.options(&[]).command, default_shell());
        let custom = args.options(&["uptime".to_string()]);
        assert_eq!(custom.command, vec!["uptime".to_string()]);
    }

    #[test]
    fn test_no_tty_conflicts_with_tty() {
        assert!(Harness::try_parse_from(["kubeop", "--tty", "--no-tty"]).is_err());
    }

    #[test]
    fn test_no_tty_forces_tty_off() {
        let args = Harness::parse_from(["kubeop", "--no-tty", "-i"]).exec;
        let options = args.options(&[]);
        assert!(!options.tty);
        assert!(options.stdin);
    }

    #[test]
    fn test_flags_map_onto_options() {
        let args = Harness::parse_from([
            "kubeop",
            "-t",
            "--block",
            "--max-parallel",
            "3",
            "--quiet-errors",
        ])
        .exec;
        let options = args.options(&[]);
        assert!(options.tty);
        assert_eq!(options.mode, RenderMode::Block);
        assert_eq!(options.max_parallel, 3);
        assert!(!options.error_detail);
    }
}
