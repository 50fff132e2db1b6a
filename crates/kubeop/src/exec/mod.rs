//! Remote command execution.
//!
//! [`RemoteExec`] opens one attach session against one container and streams
//! stdin/stdout/stderr until the remote process ends.

pub mod error;
pub mod transport;

pub use error::{ExecError, ExecErrorKind};
pub use transport::{check_status, ExecConfig, KubeExec, RemoteExec, Sink, Source};
