//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, Node, NodeSpec, Pod, PodSpec, Taint};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kubeop::exec::{ExecConfig, ExecError, ExecErrorKind, RemoteExec};
use kubeop::target::{PodTarget, Target};
use kubeop::{Cluster, ClusterError, TargetRunner};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

// =============================================================================
// Fixtures
// =============================================================================

pub fn pod(namespace: &str, name: &str, containers: &[&str]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers: containers
                .iter()
                .map(|c| Container {
                    name: (*c).to_string(),
                    ..Container::default()
                })
                .collect(),
            ..PodSpec::default()
        }),
        ..Pod::default()
    }
}

pub fn node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                "kubernetes.io/hostname".to_string(),
                name.to_string(),
            )])),
            ..ObjectMeta::default()
        },
        ..Node::default()
    }
}

pub fn tainted_node(name: &str, key: &str, effect: &str) -> Node {
    let mut node = node(name);
    node.spec = Some(NodeSpec {
        taints: Some(vec![Taint {
            key: key.to_string(),
            value: Some("true".to_string()),
            effect: effect.to_string(),
            ..Taint::default()
        }]),
        ..NodeSpec::default()
    });
    node
}

pub fn pod_target(namespace: &str, pod: &str, container: &str) -> Target {
    Target::Pod(PodTarget {
        namespace: namespace.to_string(),
        pod: pod.to_string(),
        container: container.to_string(),
    })
}

// =============================================================================
// Fake Cluster
// =============================================================================

/// In-memory cluster. Helper pods become ready only when `ready` is set.
#[derive(Default)]
pub struct FakeCluster {
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
    pub ready: bool,
    /// Namespaces requested from `list_pods`; `None` means all.
    pub pod_queries: Mutex<Vec<Option<String>>>,
    pub created: Mutex<Vec<Pod>>,
    /// Names of helper pods that currently exist.
    pub live: Mutex<HashSet<String>>,
    pub delete_attempts: AtomicUsize,
}

impl FakeCluster {
    pub fn with_pods(pods: Vec<Pod>) -> Self {
        Self {
            pods,
            ..Self::default()
        }
    }

    pub fn with_nodes(nodes: Vec<Node>, ready: bool) -> Self {
        Self {
            nodes,
            ready,
            ..Self::default()
        }
    }

    pub fn live_pods(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn created_pods(&self) -> Vec<Pod> {
        self.created.lock().unwrap().clone()
    }

    /// Remove a helper pod behind the provisioner's back.
    pub fn remove_externally(&self, name: &str) {
        self.live.lock().unwrap().remove(name);
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        Ok(self.nodes.clone())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>, ClusterError> {
        Ok(self
            .nodes
            .iter()
            .find(|n| n.metadata.name.as_deref() == Some(name))
            .cloned())
    }

    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<Pod>, ClusterError> {
        self.pod_queries
            .lock()
            .unwrap()
            .push(namespace.map(str::to_string));
        Ok(self
            .pods
            .iter()
            .filter(|p| namespace.is_none() || p.metadata.namespace.as_deref() == namespace)
            .cloned()
            .collect())
    }

    async fn create_pod(&self, _namespace: &str, pod: &Pod) -> Result<Pod, ClusterError> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.live.lock().unwrap().insert(name);
        self.created.lock().unwrap().push(pod.clone());
        Ok(pod.clone())
    }

    async fn wait_pod_ready(&self, _namespace: &str, _name: &str) -> Result<(), ClusterError> {
        if self.ready {
            return Ok(());
        }
        std::future::pending().await
    }

    async fn describe_pod(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
        Ok(format!(
            "Pod: {namespace}/{name}\nPhase: Pending\nEvents:\n  Warning FailedScheduling: 0/3 nodes are available"
        ))
    }

    async fn delete_pod(&self, _namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.delete_attempts.fetch_add(1, Ordering::SeqCst);
        if self.live.lock().unwrap().remove(name) {
            Ok(())
        } else {
            Err(ClusterError::NotFound {
                kind: "pod",
                name: name.to_string(),
            })
        }
    }
}

// =============================================================================
// Fake RemoteExec
// =============================================================================

/// One recorded exec session.
#[derive(Debug, Clone)]
pub struct Session {
    pub target: PodTarget,
    pub command: Vec<String>,
    pub stdin: bool,
    pub tty: bool,
}

/// Writes two stdout lines per session and echoes any stdin it receives.
#[derive(Default)]
pub struct FakeExec {
    pub delay: Duration,
    pub failing: HashSet<String>,
    running: AtomicUsize,
    pub peak: AtomicUsize,
    pub sessions: Mutex<Vec<Session>>,
}

impl FakeExec {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Sessions on this pod exit with code 3; `*` fails every session.
    pub fn failing(mut self, pod: &str) -> Self {
        self.failing.insert(pod.to_string());
        self
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn fails(&self, target: &PodTarget) -> bool {
        self.failing.contains(&target.pod) || self.failing.contains("*")
    }
}

#[async_trait]
impl RemoteExec for FakeExec {
    async fn exec(&self, target: &PodTarget, mut config: ExecConfig) -> Result<(), ExecError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.sessions.lock().unwrap().push(Session {
            target: target.clone(),
            command: config.command.clone(),
            stdin: config.stdin.is_some(),
            tty: config.tty,
        });

        let result = async {
            config
                .stdout
                .write_all(format!("line 1 from {}\n", target.pod).as_bytes())
                .await?;
            tokio::time::sleep(self.delay).await;
            if let Some(mut stdin) = config.stdin.take() {
                let mut input = String::new();
                stdin.read_to_string(&mut input).await?;
                config.stdout.write_all(input.as_bytes()).await?;
            }
            config
                .stdout
                .write_all(format!("line 2 from {}\n", target.pod).as_bytes())
                .await?;
            if self.fails(target) {
                config.stderr.write_all(b"something broke\n").await?;
            }
            config.stdout.shutdown().await?;
            config.stderr.shutdown().await
        }
        .await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        result.map_err(|e| ExecError::new(target.to_string(), e))?;

        if self.fails(target) {
            return Err(ExecError::new(
                target.to_string(),
                ExecErrorKind::NonZeroExit { code: 3 },
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Fake TargetRunner
// =============================================================================

/// Records the effective session settings without running anything.
#[derive(Default)]
pub struct RecordingRunner {
    pub calls: Mutex<Vec<(Target, bool, bool)>>,
}

#[async_trait]
impl TargetRunner for RecordingRunner {
    async fn run(&self, target: &Target, config: ExecConfig) -> Result<(), ExecError> {
        self.calls
            .lock()
            .unwrap()
            .push((target.clone(), config.tty, config.stdin.is_some()));
        Ok(())
    }
}

// =============================================================================
// Output capture
// =============================================================================

/// Cloneable in-memory `Write` sink.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
