//! Streaming command execution against a pod's exec endpoint.

use async_trait::async_trait;
use futures::SinkExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams, AttachedProcess};
use kube::Client;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::error::{ExecError, ExecErrorKind};
use crate::target::PodTarget;
use crate::terminal::{RawModeGuard, ResizeQueue};

/// Boxed byte source for remote stdin.
pub type Source = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed byte sink for remote stdout/stderr.
pub type Sink = Box<dyn AsyncWrite + Send + Unpin>;

/// One command and the local streams wired to it.
pub struct ExecConfig {
    /// argv of the remote command.
    pub command: Vec<String>,
    /// Local input forwarded to the remote process; `None` leaves stdin detached.
    pub stdin: Option<Source>,
    pub stdout: Sink,
    /// Unused when `tty` is set: TTY sessions carry stderr on the combined stream.
    pub stderr: Sink,
    pub tty: bool,
    /// Terminal size updates, forwarded for the life of a TTY session.
    pub resize: Option<ResizeQueue>,
}

impl std::fmt::Debug for ExecConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecConfig")
            .field("command", &self.command)
            .field("stdin", &self.stdin.is_some())
            .field("tty", &self.tty)
            .field("resize", &self.resize.is_some())
            .finish_non_exhaustive()
    }
}

impl ExecConfig {
    /// Non-interactive config writing to the given sinks.
    #[must_use]
    pub fn new(command: Vec<String>, stdout: Sink, stderr: Sink) -> Self {
        Self {
            command,
            stdin: None,
            stdout,
            stderr,
            tty: false,
            resize: None,
        }
    }

    /// Config bound to the process's own stdin/stdout/stderr.
    #[must_use]
    pub fn stdio(command: Vec<String>, stdin: bool, tty: bool) -> Self {
        Self {
            command,
            stdin: stdin.then(|| Box::new(tokio::io::stdin()) as Source),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
            tty,
            resize: None,
        }
    }

    /// Replace the command, keeping the streams.
    #[must_use]
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }
}

/// Runs one command inside one container.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Stream `config` against `target` until the remote process ends.
    async fn exec(&self, target: &PodTarget, config: ExecConfig) -> Result<(), ExecError>;
}

/// [`RemoteExec`] over the Kubernetes exec sub-resource.
#[derive(Clone)]
pub struct KubeExec {
    client: Client,
}

impl KubeExec {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteExec for KubeExec {
    async fn exec(&self, target: &PodTarget, config: ExecConfig) -> Result<(), ExecError> {
        let fail = |kind: ExecErrorKind| ExecError::new(target.to_string(), kind);

        let params = AttachParams::default()
            .container(target.container.clone())
            .stdin(config.stdin.is_some())
            .stdout(true)
            .stderr(!config.tty)
            .tty(config.tty);

        // Held until return so every exit path restores the terminal.
        let _raw_mode = if config.tty {
            RawModeGuard::acquire().map_err(|e| fail(ExecErrorKind::Terminal(e)))?
        } else {
            None
        };

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        debug!(target = %target, command = ?config.command, tty = config.tty, "Opening exec session");
        let attached = pods
            .exec(&target.pod, config.command.clone(), &params)
            .await
            .map_err(|e| fail(ExecErrorKind::Connect(e)))?;

        stream_session(attached, config).await.map_err(fail)
    }
}

async fn stream_session(
    mut attached: AttachedProcess,
    config: ExecConfig,
) -> Result<(), ExecErrorKind> {
    let ExecConfig {
        stdin,
        mut stdout,
        mut stderr,
        resize,
        ..
    } = config;

    let status = attached.take_status();

    let resize_stop = match (resize, attached.terminal_size()) {
        (Some(mut queue), Some(mut sizes)) => {
            let stop = queue.stopper();
            tokio::spawn(async move {
                while let Some(size) = queue.next().await {
                    if sizes.send(size).await.is_err() {
                        break;
                    }
                }
            });
            Some(stop)
        }
        _ => None,
    };

    let stdin_task = match (stdin, attached.stdin()) {
        (Some(mut source), Some(mut remote)) => Some(tokio::spawn(async move {
            if let Err(e) = tokio::io::copy(&mut source, &mut remote).await {
                debug!(error = %e, "stdin forwarding stopped");
            }
            let _ = remote.shutdown().await;
        })),
        _ => None,
    };

    let stdout_reader = attached.stdout();
    let stderr_reader = attached.stderr();
    let stdout_copy = async {
        if let Some(mut reader) = stdout_reader {
            tokio::io::copy(&mut reader, &mut stdout).await?;
        }
        stdout.shutdown().await
    };
    let stderr_copy = async {
        if let Some(mut reader) = stderr_reader {
            tokio::io::copy(&mut reader, &mut stderr).await?;
        }
        stderr.shutdown().await
    };
    let (stdout_result, stderr_result) = tokio::join!(stdout_copy, stderr_copy);

    let status = match status {
        Some(status) => status.await,
        None => None,
    };
    let joined = attached.join().await;

    if let Some(task) = stdin_task {
        task.abort();
    }
    if let Some(stop) = resize_stop {
        stop.cancel();
    }

    stdout_result?;
    stderr_result?;
    joined.map_err(|e| ExecErrorKind::Remote(e.to_string()))?;
    check_status(status)
}

/// Translate the remote status message into a result.
///
/// A missing status means the stream closed without a verdict, which the
/// exec protocol only does on success.
///
/// # Errors
///
/// Returns `NonZeroExit` when the status carries an exit code, `Remote` for
/// any other failure.
pub fn check_status(status: Option<Status>) -> Result<(), ExecErrorKind> {
    let Some(status) = status else {
        return Ok(());
    };
    if status.status.as_deref() == Some("Success") {
        return Ok(());
    }

    if status.reason.as_deref() == Some("NonZeroExitCode") {
        let code = status
            .details
            .as_ref()
            .and_then(|details| details.causes.as_ref())
            .and_then(|causes| {
                causes
                    .iter()
                    .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
            })
            .and_then(|cause| cause.message.as_deref())
            .and_then(|message| message.trim().parse::<i32>().ok());
        if let Some(code) = code {
            return Err(ExecErrorKind::NonZeroExit { code });
        }
    }

    Err(ExecErrorKind::Remote(
        status
            .message
            .unwrap_or_else(|| "unknown remote failure".to_string()),
    ))
}
