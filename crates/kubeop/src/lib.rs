//! kubeop library.
//!
//! Remote command execution across Kubernetes pod containers and nodes:
//! target resolution, streaming exec sessions, node helper pods, bounded
//! fan-out and output multiplexing.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kubeop::{Dispatcher, DispatchOptions, TargetKind, TargetResolver};
//!
//! let targets = TargetResolver::new(cluster.as_ref())
//!     .resolve(TargetKind::Pod, "default/web-*")
//!     .await?;
//! Dispatcher::new(runner).dispatch(targets, options).await?;
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]
// Allow imports after statements in functions
#![allow(clippy::items_after_statements)]

pub mod cluster;
pub mod commands;
pub mod config;
pub mod describe;
pub mod dispatch;
pub mod exec;
pub mod helper_pod;
pub mod kubeconfig;
pub mod output;
pub mod shutdown;
pub mod target;
pub mod terminal;
pub mod ui;

// Re-export commonly used types at the crate root
pub use cluster::{Cluster, ClusterError, KubeCluster};
pub use config::{HelperDefaults, TargetKind};
pub use dispatch::{
    ClusterRunner, DispatchError, DispatchOptions, Dispatcher, ExecPolicy, TargetRunner,
};
pub use exec::{ExecConfig, ExecError, ExecErrorKind, KubeExec, RemoteExec};
pub use helper_pod::{HelperPodConfig, HelperPodProvisioner, ProvisionError};
pub use output::{OutputMessage, RenderMode, Renderer, StreamTag, TaggedWriter};
pub use shutdown::ShutdownRegistry;
pub use target::{PodTarget, ResolveError, Target, TargetResolver};
