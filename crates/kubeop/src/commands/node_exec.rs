//! `node-exec`: run a command in the host namespaces of one or more nodes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use super::{run_exec, Context, ExecArgs};
use crate::config::{HelperDefaults, TargetKind, DEFAULT_HELPER_IMAGE};
use crate::dispatch::ClusterRunner;
use crate::exec::{KubeExec, RemoteExec};
use crate::helper_pod::HelperPodProvisioner;

/// Run a command on cluster nodes through privileged helper pods.
#[derive(Args, Debug)]
pub struct NodeExecCommand {
    #[command(flatten)]
    exec: ExecArgs,

    /// Helper pod image; must provide `nsenter`.
    #[arg(long, env = "KUBEOP_NODE_IMAGE", default_value = DEFAULT_HELPER_IMAGE)]
    image: String,

    /// Seconds to wait for each helper pod to become ready.
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Comma-separated node names, or `all`. Lists nodes when omitted.
    target: Option<String>,

    /// Command to run; defaults to an interactive shell.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl NodeExecCommand {
    fn defaults(&self) -> HelperDefaults {
        HelperDefaults::default()
            .with_image(self.image.clone())
            .with_ready_timeout(Duration::from_secs(self.timeout))
    }

    /// Run the command.
    ///
    /// # Errors
    ///
    /// Returns an error if the nodes cannot be resolved or any session fails.
    pub async fn run(&self, ctx: &Context, exec: Arc<KubeExec>) -> Result<()> {
        let exec: Arc<dyn RemoteExec> = exec;
        let helpers = HelperPodProvisioner::new(
            Arc::clone(&ctx.cluster),
            Arc::clone(&exec),
            Arc::clone(&ctx.registry),
            self.defaults(),
        );
        let runner = Arc::new(ClusterRunner::new(exec, helpers));

        run_exec(
            ctx,
            TargetKind::Node,
            self.target.as_deref(),
            self.exec.options(&self.command),
            runner,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        node: NodeExecCommand,
    }

    #[test]
    fn test_target_and_command() {
        let cmd = Harness::parse_from(["kubeop", "--timeout", "5", "n1,n2", "uptime", "-p"]).node;
        assert_eq!(cmd.target.as_deref(), Some("n1,n2"));
        assert_eq!(cmd.command, vec!["uptime".to_string(), "-p".to_string()]);
        assert_eq!(cmd.defaults().ready_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_no_target_lists() {
        let cmd = Harness::parse_from(["kubeop"]).node;
        assert!(cmd.target.is_none());
        assert!(cmd.command.is_empty());
    }
}
