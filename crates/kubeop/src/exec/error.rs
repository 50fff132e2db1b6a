//! Error types for remote command execution.

use thiserror::Error;

use crate::helper_pod::ProvisionError;

/// Why a remote session failed.
#[derive(Debug, Error)]
pub enum ExecErrorKind {
    /// The exec endpoint could not be reached or the protocol negotiation failed.
    #[error("failed to open exec session: {0}")]
    Connect(#[source] kube::Error),

    /// Copying between local and remote streams failed.
    #[error("stream error: {0}")]
    Stream(#[from] std::io::Error),

    /// The remote side reported a failure other than an exit code.
    #[error("remote command failed: {0}")]
    Remote(String),

    /// The remote command ran and exited unsuccessfully.
    #[error("command terminated with exit code {code}")]
    NonZeroExit { code: i32 },

    /// The local terminal could not be prepared.
    #[error("terminal setup failed: {0}")]
    Terminal(#[source] std::io::Error),

    /// The node helper pod could not be brought up.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// A failed session, tagged with the target it ran against.
#[derive(Debug, Error)]
#[error("{target}: {kind}")]
pub struct ExecError {
    /// Human-readable target identifier.
    pub target: String,
    pub kind: ExecErrorKind,
}

impl ExecError {
    #[must_use]
    pub fn new(target: impl Into<String>, kind: impl Into<ExecErrorKind>) -> Self {
        Self {
            target: target.into(),
            kind: kind.into(),
        }
    }

    /// Exit code of the remote command, if it ran to completion.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self.kind {
            ExecErrorKind::NonZeroExit { code } => Some(code),
            _ => None,
        }
    }

    /// Same failure, attributed to a different target.
    #[must_use]
    pub fn retarget(self, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: self.kind,
        }
    }
}
