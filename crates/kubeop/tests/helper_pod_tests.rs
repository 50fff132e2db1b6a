//! Integration tests for the node helper pod lifecycle.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{node, tainted_node, FakeCluster, FakeExec};
use kubeop::exec::{ExecConfig, ExecErrorKind, RemoteExec};
use kubeop::{HelperDefaults, HelperPodConfig, HelperPodProvisioner, ProvisionError, ShutdownRegistry};

fn provisioner(
    cluster: &Arc<FakeCluster>,
    exec: &Arc<FakeExec>,
    registry: &Arc<ShutdownRegistry>,
) -> HelperPodProvisioner {
    let exec: Arc<dyn RemoteExec> = Arc::clone(exec) as Arc<dyn RemoteExec>;
    HelperPodProvisioner::new(
        Arc::clone(cluster) as Arc<dyn kubeop::Cluster>,
        exec,
        Arc::clone(registry),
        HelperDefaults::default().with_ready_timeout(Duration::from_secs(60)),
    )
}

fn sink_config(command: &str) -> ExecConfig {
    ExecConfig::new(
        vec![command.to_string()],
        Box::new(tokio::io::sink()),
        Box::new(tokio::io::sink()),
    )
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_describes_and_deletes() {
    let cluster = Arc::new(FakeCluster::with_nodes(vec![node("n1")], false));
    let exec = Arc::new(FakeExec::default());
    let registry = Arc::new(ShutdownRegistry::new());
    let provisioner = provisioner(&cluster, &exec, &registry);

    let helper = HelperPodConfig::for_node(&node("n1"), &HelperDefaults::default());
    let err = provisioner.provision(&helper).await.unwrap_err();

    match &err {
        ProvisionError::NotReady {
            timeout,
            description,
            ..
        } => {
            assert_eq!(*timeout, Duration::from_secs(60));
            assert!(description.contains("FailedScheduling"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("not ready after 60s"));
    assert_eq!(cluster.live_pods(), 1);

    provisioner.teardown(&helper).await;
    assert_eq!(cluster.live_pods(), 0);

    // Already gone: a second teardown is harmless.
    provisioner.teardown(&helper).await;
    assert_eq!(cluster.delete_attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_exec_on_unready_node_fails_and_cleans_up() {
    let cluster = Arc::new(FakeCluster::with_nodes(vec![node("n1")], false));
    let exec = Arc::new(FakeExec::default());
    let registry = Arc::new(ShutdownRegistry::new());

    let err = provisioner(&cluster, &exec, &registry)
        .exec_on_node("n1", sink_config("uptime"))
        .await
        .unwrap_err();

    assert_eq!(err.target, "n1");
    assert!(matches!(
        err.kind,
        ExecErrorKind::Provision(ProvisionError::NotReady { .. })
    ));
    assert!(err.to_string().contains("Phase: Pending"));
    assert!(exec.sessions().is_empty());
    assert_eq!(cluster.live_pods(), 0);
}

#[tokio::test]
async fn test_exec_on_node_runs_in_host_namespaces() {
    let cluster = Arc::new(FakeCluster::with_nodes(
        vec![tainted_node("n1", "dedicated", "NoSchedule")],
        true,
    ));
    let exec = Arc::new(FakeExec::default());
    let registry = Arc::new(ShutdownRegistry::new());

    provisioner(&cluster, &exec, &registry)
        .exec_on_node("n1", sink_config("uptime"))
        .await
        .unwrap();

    let sessions = exec.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].target.namespace, "kube-system");
    assert_eq!(sessions[0].target.container, "shell");
    assert_eq!(
        sessions[0].command,
        vec!["nsenter", "--target", "1", "--mount", "--uts", "--ipc", "--net", "--pid", "--", "uptime"]
    );

    let created = cluster.created_pods();
    assert_eq!(created.len(), 1);
    let spec = created[0].spec.as_ref().unwrap();
    assert_eq!(spec.host_pid, Some(true));
    assert_eq!(spec.host_network, Some(true));
    assert_eq!(
        spec.node_selector.as_ref().unwrap().get("kubernetes.io/hostname"),
        Some(&"n1".to_string())
    );
    let tolerations = spec.tolerations.as_ref().unwrap();
    assert_eq!(tolerations.len(), 1);
    assert_eq!(tolerations[0].key.as_deref(), Some("dedicated"));
    assert_eq!(tolerations[0].effect.as_deref(), Some("NoSchedule"));

    assert_eq!(cluster.live_pods(), 0);
}

#[tokio::test]
async fn test_remote_failure_is_attributed_to_node() {
    let cluster = Arc::new(FakeCluster::with_nodes(vec![node("n1")], true));
    let exec = Arc::new(FakeExec::default().failing("*"));
    let registry = Arc::new(ShutdownRegistry::new());

    let err = provisioner(&cluster, &exec, &registry)
        .exec_on_node("n1", sink_config("false"))
        .await
        .unwrap_err();

    assert_eq!(err.target, "n1");
    assert_eq!(err.exit_code(), Some(3));
    assert_eq!(cluster.live_pods(), 0);
}

#[tokio::test]
async fn test_unknown_node() {
    let cluster = Arc::new(FakeCluster::with_nodes(vec![node("n1")], true));
    let exec = Arc::new(FakeExec::default());
    let registry = Arc::new(ShutdownRegistry::new());

    let err = provisioner(&cluster, &exec, &registry)
        .exec_on_node("ghost", sink_config("uptime"))
        .await
        .unwrap_err();

    assert_eq!(err.target, "ghost");
    assert!(matches!(
        err.kind,
        ExecErrorKind::Provision(ProvisionError::NodeNotFound(_))
    ));
    assert!(cluster.created_pods().is_empty());
}

#[tokio::test]
async fn test_interrupt_cleanup_deletes_helper_pods() {
    let cluster = Arc::new(FakeCluster::with_nodes(vec![node("n1"), node("n2")], true));
    let exec = Arc::new(FakeExec::default());
    let registry = Arc::new(ShutdownRegistry::new());
    let provisioner = provisioner(&cluster, &exec, &registry);

    for name in ["n1", "n2"] {
        let helper = HelperPodConfig::for_node(&node(name), &HelperDefaults::default());
        provisioner.provision(&helper).await.unwrap();
    }
    assert_eq!(cluster.live_pods(), 2);
    assert_eq!(registry.len(), 2);

    // One pod disappears on its own before the interrupt.
    let first = cluster.created_pods()[0].metadata.name.clone().unwrap();
    cluster.remove_externally(&first);

    registry.run_all().await;
    assert_eq!(cluster.live_pods(), 0);
    assert!(registry.is_empty());
}
