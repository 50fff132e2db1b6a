//! Cluster inventory and pod lifecycle operations.
//!
//! The [`Cluster`] trait is the seam between the execution engine and the
//! Kubernetes API. [`KubeCluster`] implements it with a `kube::Client`; tests
//! substitute in-memory fakes.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, Node, Pod};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::runtime::wait::await_condition;
use kube::Client;
use thiserror::Error;
use tracing::debug;

use crate::describe::{describe, ClusterObject};

/// Errors returned by cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Kubernetes API call failed.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Watching a resource failed before the awaited condition was observed.
    #[error("Failed waiting for {name}: {message}")]
    Wait { name: String, message: String },

    /// Resource does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },
}

impl ClusterError {
    /// Whether this error means the resource is already gone.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }
}

/// Read and lifecycle operations the execution engine needs from the cluster.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Every node in the cluster.
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError>;

    /// One node by exact name, `None` if it does not exist.
    async fn get_node(&self, name: &str) -> Result<Option<Node>, ClusterError>;

    /// Pods in `namespace`, or in every namespace when `None`.
    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<Pod>, ClusterError>;

    /// Create a pod.
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError>;

    /// Block until the pod reports `Ready=True`. Callers apply their own timeout.
    async fn wait_pod_ready(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Human-readable account of the pod's state and recent events.
    async fn describe_pod(&self, namespace: &str, name: &str) -> Result<String, ClusterError>;

    /// Delete a pod with a short grace period.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
}

/// Whether the pod carries a `Ready=True` condition.
#[must_use]
pub fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// [`Cluster`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        Ok(nodes.list(&ListParams::default()).await?.items)
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>, ClusterError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        Ok(nodes.get_opt(name).await?)
    }

    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<Pod>, ClusterError> {
        let pods: Api<Pod> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        Ok(pods.list(&ListParams::default()).await?.items)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError> {
        Ok(self.pods(namespace).create(&PostParams::default(), pod).await?)
    }

    async fn wait_pod_ready(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let ready = |pod: Option<&Pod>| pod.is_some_and(pod_is_ready);
        await_condition(self.pods(namespace), name, ready)
            .await
            .map_err(|e| ClusterError::Wait {
                name: format!("{namespace}/{name}"),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn describe_pod(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
        let mut objects = Vec::new();
        if let Some(pod) = self.pods(namespace).get_opt(name).await? {
            objects.push(ClusterObject::Pod(Box::new(pod)));
        }

        let events: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().fields(&format!("involvedObject.name={name}"));
        objects.extend(
            events
                .list(&params)
                .await?
                .items
                .into_iter()
                .map(|event| ClusterObject::Event(Box::new(event))),
        );

        Ok(describe(&objects))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let params = DeleteParams {
            grace_period_seconds: Some(1),
            ..Default::default()
        };
        match self.pods(namespace).delete(name, &params).await {
            Ok(_) => {
                debug!(namespace, pod = name, "Deleted pod");
                Ok(())
            }
            Err(kube::Error::Api(response)) if response.code == 404 => Err(ClusterError::NotFound {
                kind: "pod",
                name: format!("{namespace}/{name}"),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
