//! Execution targets and address resolution.
//!
//! Operators address targets with short expressions:
//!
//! - nodes: `all`, or `node-a,node-b` (exact names)
//! - pods: `all`, or comma-separated `[namespace/]pod[/container]` globs
//!
//! [`TargetResolver`] expands an expression against a freshly fetched
//! inventory into a deduplicated list of [`Target`]s.

use std::collections::HashSet;
use std::fmt;

use glob::Pattern;
use k8s_openapi::api::core::v1::{Node, Pod};
use thiserror::Error;
use tracing::debug;

use crate::cluster::{Cluster, ClusterError};
use crate::config::TargetKind;

/// Expression selecting every known target.
pub const ALL: &str = "all";

/// A container in a pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodTarget {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl fmt::Display for PodTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

/// One execution endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// A container of a running pod.
    Pod(PodTarget),
    /// A node, reached through a helper pod.
    Node(String),
}

impl Target {
    #[must_use]
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Pod(_) => TargetKind::Pod,
            Self::Node(_) => TargetKind::Node,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pod(pod) => pod.fmt(f),
            Self::Node(name) => f.write_str(name),
        }
    }
}

/// Errors raised while resolving a target expression.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Fetching the inventory failed.
    #[error("Failed to fetch inventory: {0}")]
    Inventory(#[from] ClusterError),

    /// A node named in a list does not exist.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// A single-target expression matched nothing.
    #[error("No {kind} match '{expression}'. Available {kind}:\n{}", format_available(.available))]
    NoMatch {
        kind: TargetKind,
        expression: String,
        available: Vec<String>,
    },

    /// The expression matched nothing at all, including `all` on an empty
    /// inventory.
    #[error("No {kind} match '{expression}'")]
    NoTargets {
        kind: TargetKind,
        expression: String,
    },

    /// The expression could not be parsed.
    #[error("Invalid target expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },
}

fn format_available(available: &[String]) -> String {
    if available.is_empty() {
        return "  <none>".to_string();
    }
    available
        .iter()
        .map(|name| format!("  {name}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One `[namespace/]pod[/container]` entry; omitted segments match anything.
#[derive(Debug, Clone)]
struct PodPattern {
    namespace: Option<Pattern>,
    pod: Pattern,
    container: Option<Pattern>,
}

impl PodPattern {
    fn parse(entry: &str) -> Result<Self, ResolveError> {
        let invalid = |reason: String| ResolveError::InvalidExpression {
            expression: entry.to_string(),
            reason,
        };
        let compile = |segment: &str| {
            if segment.is_empty() {
                return Err(invalid("empty segment".to_string()));
            }
            Pattern::new(segment).map_err(|e| invalid(e.to_string()))
        };

        let segments: Vec<&str> = entry.split('/').collect();
        match segments.as_slice() {
            [pod] => Ok(Self {
                namespace: None,
                pod: compile(pod)?,
                container: None,
            }),
            [namespace, pod] => Ok(Self {
                namespace: Some(compile(namespace)?),
                pod: compile(pod)?,
                container: None,
            }),
            [namespace, pod, container] => Ok(Self {
                namespace: Some(compile(namespace)?),
                pod: compile(pod)?,
                container: Some(compile(container)?),
            }),
            _ => Err(invalid(
                "expected [namespace/]pod[/container]".to_string(),
            )),
        }
    }

    fn matches(&self, target: &PodTarget) -> bool {
        self.namespace
            .as_ref()
            .map_or(true, |ns| ns.matches(&target.namespace))
            && self.pod.matches(&target.pod)
            && self
                .container
                .as_ref()
                .map_or(true, |c| c.matches(&target.container))
    }

    /// Literal namespace, when the namespace segment contains no glob syntax.
    fn literal_namespace(&self) -> Option<&str> {
        self.namespace
            .as_ref()
            .map(Pattern::as_str)
            .filter(|ns| !ns.contains(['*', '?', '[']))
    }
}

/// Every `(namespace, pod, container)` triple in the given pods.
#[must_use]
pub fn pod_targets(pods: &[Pod]) -> Vec<PodTarget> {
    let mut targets = Vec::new();
    for pod in pods {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();
        let Some(spec) = pod.spec.as_ref() else {
            continue;
        };
        for container in &spec.containers {
            targets.push(PodTarget {
                namespace: namespace.clone(),
                pod: name.clone(),
                container: container.name.clone(),
            });
        }
    }
    targets
}

fn node_names(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter_map(|node| node.metadata.name.clone())
        .collect()
}

fn split_entries(expression: &str) -> Vec<&str> {
    expression
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect()
}

fn non_empty(
    kind: TargetKind,
    expression: &str,
    targets: Vec<Target>,
) -> Result<Vec<Target>, ResolveError> {
    if targets.is_empty() {
        return Err(ResolveError::NoTargets {
            kind,
            expression: expression.to_string(),
        });
    }
    Ok(targets)
}

/// Resolves target expressions against the live cluster.
pub struct TargetResolver<'a> {
    cluster: &'a dyn Cluster,
}

impl<'a> TargetResolver<'a> {
    #[must_use]
    pub fn new(cluster: &'a dyn Cluster) -> Self {
        Self { cluster }
    }

    /// Identifiers of every currently available target of `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if the inventory cannot be fetched.
    pub async fn available(&self, kind: TargetKind) -> Result<Vec<String>, ResolveError> {
        match kind {
            TargetKind::Node => Ok(node_names(&self.cluster.list_nodes().await?)),
            TargetKind::Pod => Ok(pod_targets(&self.cluster.list_pods(None).await?)
                .iter()
                .map(ToString::to_string)
                .collect()),
        }
    }

    /// Resolve a target expression of the given kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the inventory cannot be fetched or the expression
    /// selects nothing.
    pub async fn resolve(
        &self,
        kind: TargetKind,
        expression: &str,
    ) -> Result<Vec<Target>, ResolveError> {
        let targets = match kind {
            TargetKind::Node => self.resolve_nodes(expression).await?,
            TargetKind::Pod => self.resolve_pods(expression).await?,
        };
        debug!(%kind, expression, count = targets.len(), "Resolved targets");
        Ok(targets)
    }

    /// Resolve a node expression.
    ///
    /// # Errors
    ///
    /// Returns an error if a named node does not exist.
    pub async fn resolve_nodes(&self, expression: &str) -> Result<Vec<Target>, ResolveError> {
        if expression.trim() == ALL {
            let targets = node_names(&self.cluster.list_nodes().await?)
                .into_iter()
                .map(Target::Node)
                .collect();
            return non_empty(TargetKind::Node, expression, targets);
        }

        let entries = split_entries(expression);
        if entries.is_empty() {
            return Err(ResolveError::InvalidExpression {
                expression: expression.to_string(),
                reason: "no node names given".to_string(),
            });
        }

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for name in &entries {
            if !seen.insert(*name) {
                continue;
            }
            if self.cluster.get_node(name).await?.is_none() {
                if entries.len() == 1 {
                    return Err(ResolveError::NoMatch {
                        kind: TargetKind::Node,
                        expression: expression.to_string(),
                        available: node_names(&self.cluster.list_nodes().await?),
                    });
                }
                return Err(ResolveError::NodeNotFound((*name).to_string()));
            }
            targets.push(Target::Node((*name).to_string()));
        }
        Ok(targets)
    }

    /// Resolve a pod expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is malformed or matches nothing.
    pub async fn resolve_pods(&self, expression: &str) -> Result<Vec<Target>, ResolveError> {
        if expression.trim() == ALL {
            let targets = pod_targets(&self.cluster.list_pods(None).await?)
                .into_iter()
                .map(Target::Pod)
                .collect();
            return non_empty(TargetKind::Pod, expression, targets);
        }

        let entries = split_entries(expression);
        if entries.is_empty() {
            return Err(ResolveError::InvalidExpression {
                expression: expression.to_string(),
                reason: "no pods given".to_string(),
            });
        }
        let patterns = entries
            .iter()
            .map(|entry| PodPattern::parse(entry))
            .collect::<Result<Vec<_>, _>>()?;

        let inventory = self.pod_inventory(&patterns).await?;
        let mut seen = HashSet::new();
        let matched: Vec<Target> = inventory
            .into_iter()
            .filter(|target| patterns.iter().any(|p| p.matches(target)))
            .filter(|target| seen.insert(target.clone()))
            .map(Target::Pod)
            .collect();

        if matched.is_empty() {
            if patterns.len() == 1 {
                return Err(ResolveError::NoMatch {
                    kind: TargetKind::Pod,
                    expression: expression.to_string(),
                    available: self.available(TargetKind::Pod).await?,
                });
            }
            return Err(ResolveError::NoTargets {
                kind: TargetKind::Pod,
                expression: expression.to_string(),
            });
        }
        Ok(matched)
    }

    /// Fetch only the namespaces the patterns name literally; otherwise everything.
    async fn pod_inventory(&self, patterns: &[PodPattern]) -> Result<Vec<PodTarget>, ResolveError> {
        let literal: Option<Vec<&str>> = patterns.iter().map(PodPattern::literal_namespace).collect();
        let Some(mut namespaces) = literal else {
            return Ok(pod_targets(&self.cluster.list_pods(None).await?));
        };
        namespaces.sort_unstable();
        namespaces.dedup();

        let mut inventory = Vec::new();
        for namespace in namespaces {
            inventory.extend(pod_targets(&self.cluster.list_pods(Some(namespace)).await?));
        }
        Ok(inventory)
    }
}
