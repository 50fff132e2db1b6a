//! `pod-exec`: run a command in one or more containers.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use super::{run_exec, Context, ExecArgs};
use crate::config::{HelperDefaults, TargetKind};
use crate::dispatch::ClusterRunner;
use crate::exec::{KubeExec, RemoteExec};
use crate::helper_pod::HelperPodProvisioner;

/// Run a command in pod containers.
#[derive(Args, Debug)]
pub struct PodExecCommand {
    #[command(flatten)]
    exec: ExecArgs,

    /// Comma-separated `[namespace/]pod[/container]` globs, or `all`.
    /// Lists available containers when omitted.
    target: Option<String>,

    /// Command to run; defaults to an interactive shell.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl PodExecCommand {
    /// Run the command.
    ///
    /// # Errors
    ///
    /// Returns an error if the targets cannot be resolved or any session fails.
    pub async fn run(&self, ctx: &Context, exec: Arc<KubeExec>) -> Result<()> {
        let exec: Arc<dyn RemoteExec> = exec;
        // Pod targets never reach the provisioner; it only completes the runner.
        let helpers = HelperPodProvisioner::new(
            Arc::clone(&ctx.cluster),
            Arc::clone(&exec),
            Arc::clone(&ctx.registry),
            HelperDefaults::default(),
        );
        let runner = Arc::new(ClusterRunner::new(exec, helpers));

        run_exec(
            ctx,
            TargetKind::Pod,
            self.target.as_deref(),
            self.exec.options(&self.command),
            runner,
        )
        .await
    }
}
