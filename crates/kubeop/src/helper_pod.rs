//! Ephemeral privileged pods used to run commands in a node's host namespaces.
//!
//! Lifecycle of one helper pod:
//!
//! ```text
//! Requested → Created → WaitingReady ─┬─ Ready → (command runs) ─┬→ Deleting → Deleted
//!                                     └─ TimedOut ───────────────┘
//! ```
//!
//! A cleanup callback is registered with the [`ShutdownRegistry`] before the
//! pod is created, so an interrupt during the readiness wait still removes it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use k8s_openapi::api::core::v1::{
    Container, Node, Pod, PodSpec, SecurityContext, Toleration,
};
use kube::api::ObjectMeta;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cluster::{Cluster, ClusterError};
use crate::config::{host_namespace_wrapper, HelperDefaults, HOSTNAME_LABEL};
use crate::exec::{ExecConfig, ExecError, RemoteExec};
use crate::shutdown::ShutdownRegistry;
use crate::target::PodTarget;

/// Name of the single container in a helper pod.
pub const HELPER_CONTAINER: &str = "shell";

const NAME_CHARSET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const NAME_SUFFIX_LEN: usize = 5;

/// Errors bringing a helper pod up.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The node to pin the helper pod to does not exist.
    #[error("node {0} not found")]
    NodeNotFound(String),

    /// Looking up the node failed.
    #[error("failed to look up node {node}: {source}")]
    NodeLookup {
        node: String,
        #[source]
        source: ClusterError,
    },

    /// Creating the helper pod failed.
    #[error("failed to create helper pod {pod}: {source}")]
    Create {
        pod: String,
        #[source]
        source: ClusterError,
    },

    /// The readiness watch failed.
    #[error("failed waiting for helper pod {pod}: {source}")]
    Wait {
        pod: String,
        #[source]
        source: ClusterError,
    },

    /// The helper pod did not become ready in time.
    #[error("helper pod {pod} not ready after {}s\n{description}", .timeout.as_secs())]
    NotReady {
        pod: String,
        timeout: Duration,
        description: String,
    },
}

/// Lifecycle states of one helper pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperPodState {
    Requested,
    Created,
    WaitingReady,
    Ready,
    TimedOut,
    Deleting,
    Deleted,
}

/// Everything needed to materialise one helper pod.
#[derive(Debug, Clone)]
pub struct HelperPodConfig {
    pub name: String,
    pub namespace: String,
    pub node: String,
    /// Value of the node's hostname label.
    pub hostname: String,
    pub image: String,
    pub command: Vec<String>,
    pub tolerations: Vec<Toleration>,
    pub ready_timeout: Duration,
}

impl HelperPodConfig {
    /// Build a fresh config pinned to `node`, with a newly generated name.
    #[must_use]
    pub fn for_node(node: &Node, defaults: &HelperDefaults) -> Self {
        let node_name = node.metadata.name.clone().unwrap_or_default();
        let hostname = node
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(HOSTNAME_LABEL))
            .cloned()
            .unwrap_or_else(|| node_name.clone());

        Self {
            name: generate_name(&defaults.name_prefix),
            namespace: defaults.namespace.clone(),
            node: node_name,
            hostname,
            image: defaults.image.clone(),
            command: defaults.command.clone(),
            tolerations: mirror_taints(node),
            ready_timeout: defaults.ready_timeout,
        }
    }

    /// Identifier used in logs and errors.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// The container commands are exec'd into.
    #[must_use]
    pub fn exec_target(&self) -> PodTarget {
        PodTarget {
            namespace: self.namespace.clone(),
            pod: self.name.clone(),
            container: HELPER_CONTAINER.to_string(),
        }
    }

    /// The pod object to create.
    #[must_use]
    pub fn to_pod(&self) -> Pod {
        let labels = BTreeMap::from([
            (
                "app.kubernetes.io/managed-by".to_string(),
                "kubeop".to_string(),
            ),
            ("kubeop/node".to_string(), self.node.clone()),
        ]);
        let node_selector = BTreeMap::from([(HOSTNAME_LABEL.to_string(), self.hostname.clone())]);

        Pod {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: HELPER_CONTAINER.to_string(),
                    image: Some(self.image.clone()),
                    command: Some(self.command.clone()),
                    security_context: Some(SecurityContext {
                        privileged: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                host_pid: Some(true),
                host_network: Some(true),
                node_selector: Some(node_selector),
                tolerations: Some(self.tolerations.clone()),
                restart_policy: Some("Never".to_string()),
                termination_grace_period_seconds: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// `prefix` plus a short random suffix of DNS-safe characters.
#[must_use]
pub fn generate_name(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..NAME_SUFFIX_LEN)
        .map(|_| char::from(NAME_CHARSET[rng.gen_range(0..NAME_CHARSET.len())]))
        .collect();
    format!("{prefix}{suffix}")
}

/// One `Equal` toleration per taint on the node.
#[must_use]
pub fn mirror_taints(node: &Node) -> Vec<Toleration> {
    node.spec
        .as_ref()
        .and_then(|spec| spec.taints.as_ref())
        .map(|taints| {
            taints
                .iter()
                .map(|taint| Toleration {
                    key: Some(taint.key.clone()),
                    operator: Some("Equal".to_string()),
                    value: taint.value.clone(),
                    effect: Some(taint.effect.clone()),
                    ..Default::default()
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Runs commands on nodes through helper pods.
pub struct HelperPodProvisioner {
    cluster: Arc<dyn Cluster>,
    exec: Arc<dyn RemoteExec>,
    registry: Arc<ShutdownRegistry>,
    defaults: HelperDefaults,
}

impl HelperPodProvisioner {
    #[must_use]
    pub fn new(
        cluster: Arc<dyn Cluster>,
        exec: Arc<dyn RemoteExec>,
        registry: Arc<ShutdownRegistry>,
        defaults: HelperDefaults,
    ) -> Self {
        Self {
            cluster,
            exec,
            registry,
            defaults,
        }
    }

    /// Run `config` in the host namespaces of `node`.
    ///
    /// The helper pod is deleted afterwards whether or not the command
    /// succeeded; deletion failures are only logged.
    ///
    /// # Errors
    ///
    /// Returns an error tagged with the node name if the helper pod cannot be
    /// brought up or the command fails.
    pub async fn exec_on_node(&self, node: &str, config: ExecConfig) -> Result<(), ExecError> {
        let node_object = match self.cluster.get_node(node).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                return Err(ExecError::new(
                    node,
                    ProvisionError::NodeNotFound(node.to_string()),
                ))
            }
            Err(source) => {
                return Err(ExecError::new(
                    node,
                    ProvisionError::NodeLookup {
                        node: node.to_string(),
                        source,
                    },
                ))
            }
        };

        let helper = HelperPodConfig::for_node(&node_object, &self.defaults);
        let result = self.run_in_helper(&helper, config).await;
        self.teardown(&helper).await;
        result.map_err(|e| e.retarget(node))
    }

    async fn run_in_helper(
        &self,
        helper: &HelperPodConfig,
        config: ExecConfig,
    ) -> Result<(), ExecError> {
        self.provision(helper)
            .await
            .map_err(|e| ExecError::new(helper.node.clone(), e))?;

        let mut command = host_namespace_wrapper();
        command.extend(config.command.iter().cloned());
        self.exec
            .exec(&helper.exec_target(), config.with_command(command))
            .await
    }

    /// Create the helper pod and wait for it to become ready.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails, the watch fails, or readiness is not
    /// reached within the configured timeout.
    pub async fn provision(&self, helper: &HelperPodConfig) -> Result<(), ProvisionError> {
        let pod_name = helper.qualified_name();
        log_state(helper, HelperPodState::Requested);
        self.register_cleanup(helper);

        self.cluster
            .create_pod(&helper.namespace, &helper.to_pod())
            .await
            .map_err(|source| ProvisionError::Create {
                pod: pod_name.clone(),
                source,
            })?;
        log_state(helper, HelperPodState::Created);

        log_state(helper, HelperPodState::WaitingReady);
        let wait = self.cluster.wait_pod_ready(&helper.namespace, &helper.name);
        match tokio::time::timeout(helper.ready_timeout, wait).await {
            Ok(Ok(())) => {
                log_state(helper, HelperPodState::Ready);
                Ok(())
            }
            Ok(Err(source)) => Err(ProvisionError::Wait {
                pod: pod_name,
                source,
            }),
            Err(_) => {
                log_state(helper, HelperPodState::TimedOut);
                let description = self
                    .cluster
                    .describe_pod(&helper.namespace, &helper.name)
                    .await
                    .unwrap_or_else(|e| format!("unable to describe pod: {e}"));
                Err(ProvisionError::NotReady {
                    pod: pod_name,
                    timeout: helper.ready_timeout,
                    description,
                })
            }
        }
    }

    fn register_cleanup(&self, helper: &HelperPodConfig) {
        let cluster = Arc::clone(&self.cluster);
        let namespace = helper.namespace.clone();
        let name = helper.name.clone();
        self.registry.register(move || {
            async move {
                if let Err(e) = cluster.delete_pod(&namespace, &name).await {
                    debug!(namespace = %namespace, pod = %name, error = %e, "Interrupt cleanup skipped");
                }
            }
            .boxed()
        });
    }

    /// Best-effort deletion; never fails.
    pub async fn teardown(&self, helper: &HelperPodConfig) {
        log_state(helper, HelperPodState::Deleting);
        match self.cluster.delete_pod(&helper.namespace, &helper.name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(pod = %helper.qualified_name(), "Helper pod already gone");
            }
            Err(e) => {
                warn!(pod = %helper.qualified_name(), error = %e, "Failed to delete helper pod");
            }
        }
        log_state(helper, HelperPodState::Deleted);
    }
}

fn log_state(helper: &HelperPodConfig, state: HelperPodState) {
    match state {
        HelperPodState::Ready => {
            info!(pod = %helper.qualified_name(), node = %helper.node, "Helper pod ready");
        }
        HelperPodState::TimedOut => {
            warn!(
                pod = %helper.qualified_name(),
                node = %helper.node,
                timeout_secs = helper.ready_timeout.as_secs(),
                "Helper pod readiness timed out"
            );
        }
        _ => debug!(pod = %helper.qualified_name(), node = %helper.node, ?state, "Helper pod state"),
    }
}
