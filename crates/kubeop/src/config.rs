//! Execution defaults.
//!
//! This module defines the knobs shared by `pod-exec` and `node-exec`. The CLI
//! layer overrides individual fields from flags; everything else falls back to
//! the values below.

use std::time::Duration;

/// Namespace the node helper pods are created in.
pub const HELPER_NAMESPACE: &str = "kube-system";

/// Prefix for generated helper pod names.
pub const HELPER_NAME_PREFIX: &str = "kubeop-node-exec-";

/// Image used for node helper pods unless overridden.
pub const DEFAULT_HELPER_IMAGE: &str = "docker.io/library/alpine:3.20";

/// Readiness wait for node helper pods.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Label selecting a node by hostname.
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Which kind of endpoint an invocation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Containers of running pods.
    Pod,
    /// Cluster nodes, reached through a helper pod.
    Node,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pod => write!(f, "pods"),
            Self::Node => write!(f, "nodes"),
        }
    }
}

/// Settings for node helper pods.
#[derive(Debug, Clone)]
pub struct HelperDefaults {
    /// Namespace the helper pod is created in.
    pub namespace: String,
    /// Generated name prefix.
    pub name_prefix: String,
    /// Container image.
    pub image: String,
    /// Container entrypoint; keeps the pod alive while commands are exec'd into it.
    pub command: Vec<String>,
    /// How long to wait for the helper pod to become ready.
    pub ready_timeout: Duration,
}

impl Default for HelperDefaults {
    fn default() -> Self {
        Self {
            namespace: HELPER_NAMESPACE.to_string(),
            name_prefix: HELPER_NAME_PREFIX.to_string(),
            image: DEFAULT_HELPER_IMAGE.to_string(),
            command: vec!["sleep".to_string(), "infinity".to_string()],
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

impl HelperDefaults {
    /// Override the image, keeping every other default.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Override the readiness timeout.
    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

/// Command run when the operator does not supply one.
#[must_use]
pub fn default_shell() -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        "if command -v bash >/dev/null 2>&1; then exec bash; else exec sh; fi".to_string(),
    ]
}

/// Prefix that enters the host namespaces of PID 1 on the node.
#[must_use]
pub fn host_namespace_wrapper() -> Vec<String> {
    ["nsenter", "--target", "1", "--mount", "--uts", "--ipc", "--net", "--pid", "--"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_defaults() {
        let defaults = HelperDefaults::default();
        assert_eq!(defaults.namespace, "kube-system");
        assert_eq!(defaults.ready_timeout, Duration::from_secs(60));
        assert!(defaults.name_prefix.ends_with('-'));
    }

    #[test]
    fn test_helper_overrides() {
        let defaults = HelperDefaults::default()
            .with_image("busybox:1.36")
            .with_ready_timeout(Duration::from_secs(5));
        assert_eq!(defaults.image, "busybox:1.36");
        assert_eq!(defaults.ready_timeout, Duration::from_secs(5));
        assert_eq!(defaults.namespace, HELPER_NAMESPACE);
    }

    #[test]
    fn test_wrapper_ends_with_separator() {
        let wrapper = host_namespace_wrapper();
        assert_eq!(wrapper.first().map(String::as_str), Some("nsenter"));
        assert_eq!(wrapper.last().map(String::as_str), Some("--"));
    }

    #[test]
    fn test_target_kind_display() {
        assert_eq!(TargetKind::Pod.to_string(), "pods");
        assert_eq!(TargetKind::Node.to_string(), "nodes");
    }
}
