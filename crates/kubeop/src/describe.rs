//! Plain-text descriptions of cluster objects for diagnostics.
//!
//! API payloads are decoded once into [`ClusterObject`] and rendered by kind.

use std::fmt::Write;

use k8s_openapi::api::core::v1::{ContainerStatus, Event, Pod};

/// Closed set of resource kinds that can appear in a description.
#[derive(Debug, Clone)]
pub enum ClusterObject {
    Pod(Box<Pod>),
    Event(Box<Event>),
}

/// Render pods first, then events in the order given.
#[must_use]
pub fn describe(objects: &[ClusterObject]) -> String {
    let mut out = String::new();
    let mut events = Vec::new();

    for object in objects {
        match object {
            ClusterObject::Pod(pod) => describe_pod(&mut out, pod),
            ClusterObject::Event(event) => events.push(event),
        }
    }

    if events.is_empty() {
        out.push_str("Events: <none>\n");
    } else {
        out.push_str("Events:\n");
        for event in events {
            let _ = writeln!(
                out,
                "  {:<8} {:<20} {}",
                event.type_.as_deref().unwrap_or("-"),
                event.reason.as_deref().unwrap_or("-"),
                event.message.as_deref().unwrap_or("").trim()
            );
        }
    }

    out
}

fn describe_pod(out: &mut String, pod: &Pod) {
    let name = pod.metadata.name.as_deref().unwrap_or("<unknown>");
    let namespace = pod.metadata.namespace.as_deref().unwrap_or("<unknown>");
    let _ = writeln!(out, "Pod: {namespace}/{name}");

    let node = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .unwrap_or("<unscheduled>");
    let _ = writeln!(out, "Node: {node}");

    let Some(status) = pod.status.as_ref() else {
        out.push_str("Status: <none>\n");
        return;
    };

    let _ = writeln!(out, "Phase: {}", status.phase.as_deref().unwrap_or("Unknown"));

    if let Some(conditions) = status.conditions.as_ref() {
        out.push_str("Conditions:\n");
        for condition in conditions {
            let detail = match (condition.reason.as_deref(), condition.message.as_deref()) {
                (Some(reason), Some(message)) => format!(" ({reason}: {message})"),
                (Some(reason), None) => format!(" ({reason})"),
                (None, Some(message)) => format!(" ({message})"),
                (None, None) => String::new(),
            };
            let _ = writeln!(out, "  {}={}{detail}", condition.type_, condition.status);
        }
    }

    if let Some(containers) = status.container_statuses.as_ref() {
        out.push_str("Containers:\n");
        for container in containers {
            let _ = writeln!(out, "  {}: {}", container.name, container_state(container));
        }
    }
}

fn container_state(status: &ContainerStatus) -> String {
    let Some(state) = status.state.as_ref() else {
        return "unknown".to_string();
    };
    if let Some(waiting) = state.waiting.as_ref() {
        return format!(
            "waiting ({})",
            waiting.reason.as_deref().unwrap_or("no reason given")
        );
    }
    if let Some(terminated) = state.terminated.as_ref() {
        return format!(
            "terminated (exit code {}, {})",
            terminated.exit_code,
            terminated.reason.as_deref().unwrap_or("no reason given")
        );
    }
    if state.running.is_some() {
        return "running".to_string();
    }
    "unknown".to_string()
}
