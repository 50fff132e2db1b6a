//! Run one command across resolved targets.
//!
//! A single target gets the process's own terminal. Several targets run
//! through a bounded [`WorkerPool`], with each session's output tagged and
//! funnelled to one renderer.

pub mod pool;
pub mod tee;

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::TargetKind;
use crate::exec::{ExecConfig, ExecError, RemoteExec, Source};
use crate::helper_pod::HelperPodProvisioner;
use crate::output::{RenderMode, Renderer, TaggedWriter};
use crate::target::Target;
use crate::terminal::{self, ResizeQueue};

pub use pool::{pool_size, WorkerPool};
pub use tee::tee;

/// Effective TTY and stdin settings for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecPolicy {
    pub tty: bool,
    pub stdin: bool,
}

impl ExecPolicy {
    /// Reconcile the requested flags with the target count.
    ///
    /// Several targets never share a terminal. Pod targets also lose stdin;
    /// node targets keep it and each receive a copy. A lone target keeps what
    /// was asked for, except that TTY needs a real terminal.
    #[must_use]
    pub fn resolve(
        kind: TargetKind,
        targets: usize,
        tty: bool,
        stdin: bool,
        is_terminal: bool,
    ) -> Self {
        if targets > 1 {
            return Self {
                tty: false,
                stdin: match kind {
                    TargetKind::Node => stdin,
                    TargetKind::Pod => false,
                },
            };
        }
        Self {
            tty: tty && is_terminal,
            stdin,
        }
    }
}

/// Per-invocation settings.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub command: Vec<String>,
    pub tty: bool,
    pub stdin: bool,
    pub mode: RenderMode,
    /// Zero means no limit.
    pub max_parallel: usize,
    /// Include per-target messages in the combined failure.
    pub error_detail: bool,
}

/// Runs a command on one resolved target.
#[async_trait]
pub trait TargetRunner: Send + Sync {
    async fn run(&self, target: &Target, config: ExecConfig) -> Result<(), ExecError>;
}

/// [`TargetRunner`] that execs into pods directly and reaches nodes through
/// helper pods.
pub struct ClusterRunner {
    exec: Arc<dyn RemoteExec>,
    helpers: HelperPodProvisioner,
}

impl ClusterRunner {
    #[must_use]
    pub fn new(exec: Arc<dyn RemoteExec>, helpers: HelperPodProvisioner) -> Self {
        Self { exec, helpers }
    }
}

#[async_trait]
impl TargetRunner for ClusterRunner {
    async fn run(&self, target: &Target, config: ExecConfig) -> Result<(), ExecError> {
        match target {
            Target::Pod(pod) => self.exec.exec(pod, config).await,
            Target::Node(node) => self.helpers.exec_on_node(node, config).await,
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Single(ExecError),

    #[error("{}", summarize(.failures, *.total, *.detail))]
    Multiple {
        failures: Vec<ExecError>,
        total: usize,
        detail: bool,
    },
}

impl DispatchError {
    /// Exit code to report for this failure.
    ///
    /// A lone target that ran to completion passes its own code through.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Single(e) => e.exit_code().unwrap_or(1),
            Self::Multiple { .. } => 1,
        }
    }
}

fn summarize(failures: &[ExecError], total: usize, detail: bool) -> String {
    let mut message = format!("{} of {total} targets failed", failures.len());
    if detail {
        for failure in failures {
            message.push_str(&format!("\n  {failure}"));
        }
    }
    message
}

/// Fans one command out over targets. Consumed by [`Dispatcher::dispatch`].
pub struct Dispatcher {
    runner: Arc<dyn TargetRunner>,
    input: Option<Source>,
    output: Box<dyn Write + Send>,
    color: bool,
    is_terminal: bool,
}

impl Dispatcher {
    /// Dispatcher bound to the process's stdin and stdout.
    #[must_use]
    pub fn new(runner: Arc<dyn TargetRunner>) -> Self {
        Self {
            runner,
            input: None,
            output: Box::new(std::io::stdout()),
            color: false,
            is_terminal: terminal::stdin_is_terminal(),
        }
    }

    /// Read stdin for the remote commands from `input` instead.
    #[must_use]
    pub fn with_input(mut self, input: Source) -> Self {
        self.input = Some(input);
        self
    }

    /// Render multi-target output to `output` instead of stdout.
    #[must_use]
    pub fn with_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    #[must_use]
    pub fn with_terminal(mut self, is_terminal: bool) -> Self {
        self.is_terminal = is_terminal;
        self
    }

    /// Run `options.command` on every target.
    ///
    /// # Errors
    ///
    /// A lone target's failure is returned as is. With several targets every
    /// target runs to completion and failures are combined.
    pub async fn dispatch(
        self,
        targets: Vec<Target>,
        options: DispatchOptions,
    ) -> Result<(), DispatchError> {
        let Some(kind) = targets.first().map(Target::kind) else {
            return Ok(());
        };
        let policy = ExecPolicy::resolve(
            kind,
            targets.len(),
            options.tty,
            options.stdin,
            self.is_terminal,
        );
        debug!(%kind, targets = targets.len(), ?policy, "Dispatching command");

        if targets.len() == 1 {
            let mut targets = targets;
            let target = targets.remove(0);
            return self.run_single(&target, policy, options).await;
        }
        self.run_many(targets, policy, options).await
    }

    async fn run_single(
        self,
        target: &Target,
        policy: ExecPolicy,
        options: DispatchOptions,
    ) -> Result<(), DispatchError> {
        let mut config = ExecConfig::stdio(options.command, policy.stdin, policy.tty);
        if policy.stdin {
            if let Some(input) = self.input {
                config.stdin = Some(input);
            }
        }
        if policy.tty && policy.stdin {
            match ResizeQueue::start() {
                Ok(queue) => config.resize = Some(queue),
                Err(e) => warn!(error = %e, "Terminal resize tracking unavailable"),
            }
        }
        self.runner
            .run(target, config)
            .await
            .map_err(DispatchError::Single)
    }

    async fn run_many(
        self,
        targets: Vec<Target>,
        policy: ExecPolicy,
        options: DispatchOptions,
    ) -> Result<(), DispatchError> {
        let total = targets.len();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut renderer = Renderer::new(options.mode, total, self.color);
        let mut output = self.output;
        let render_task = tokio::task::spawn_blocking(move || {
            renderer.render(std::iter::from_fn(move || rx.blocking_recv()), &mut output)
        });

        let (inputs, pump) = if policy.stdin {
            let source = self
                .input
                .unwrap_or_else(|| Box::new(tokio::io::stdin()) as Source);
            let (readers, pump) = tee(source, total);
            let inputs: Vec<Option<Source>> = readers
                .into_iter()
                .map(|reader| Some(Box::new(reader) as Source))
                .collect();
            (inputs, Some(pump))
        } else {
            ((0..total).map(|_| None).collect(), None)
        };

        let runner = self.runner;
        let command = options.command;
        let work = move |(target, stdin): (Target, Option<Source>)| {
            let runner = Arc::clone(&runner);
            let tx = tx.clone();
            let command = command.clone();
            async move {
                let origin = target.to_string();
                let (stdout, stderr) = TaggedWriter::pair(&origin, &tx);
                let mut config = ExecConfig::new(command, Box::new(stdout), Box::new(stderr));
                config.stdin = stdin;
                runner.run(&target, config).await
            }
        };

        let items: Vec<_> = targets.into_iter().zip(inputs).collect();
        let results = WorkerPool::new(pool_size(options.max_parallel, total))
            .run(items, work)
            .await;

        if let Some(pump) = pump {
            pump.abort();
        }
        match render_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to write output"),
            Err(e) => warn!(error = %e, "Output renderer stopped"),
        }

        let failures: Vec<ExecError> = results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            info!(targets = total, "Command succeeded on all targets");
            return Ok(());
        }
        Err(DispatchError::Multiple {
            failures,
            total,
            detail: options.error_detail,
        })
    }
}
