use std::sync::Arc;
use std::time::Duration;

use common::{
    Affinity, NodeAffinity, NodeInfo, NodeSelector, NodeSelectorOperator, NodeSelectorRequirement,
    PodInfo, PodSpec, ResourcesRequirements, Taint, TaintEffect, TaintKey, Toleration,
    TolerationOperator,
};
use scheduler_core::cluster_state::{ClusterState, InMemoryClusterState};
use scheduler_core::config::KubeSchedulerConfiguration;
use scheduler_core::scheduler::Scheduler;
use tokio::time::timeout;

fn make_pod(namespace: &str, name: &str, priority: u64, cpu: u64, memory: u64) -> PodInfo {
    let mut pod = PodInfo::new(namespace, name);
    pod.spec = PodSpec {
        priority,
        resources: ResourcesRequirements { cpu, memory },
        ..Default::default()
    };
    pod
}

fn make_node(name: &str, cpu: u64, memory: u64) -> NodeInfo {
    let mut node = NodeInfo::default();
    node.name = name.to_string();
    node.allocatable = ResourcesRequirements { cpu, memory };
    node
}

#[tokio::test]
async fn zero_resource_pods_still_get_scheduled() {
    let cluster = Arc::new(InMemoryClusterState::new());
    let scheduler = Scheduler::new("sim1", cluster.clone());
    scheduler.add_cache_node(make_node("node1-sim1", 10, 10000)).await;

    let mut rx = scheduler
        .start(KubeSchedulerConfiguration::default())
        .await
        .unwrap();

    for (name, cpu, memory) in [("zero-cpu", 0, 1000), ("zero-memory", 1, 0), ("zero-both", 0, 0)] {
        let pod = make_pod("default", name, 10, cpu, memory);
        cluster.apply_pod(pod.clone()).await.unwrap();
        scheduler.update_cache_pod(pod).await;
    }

    let mut assignments = Vec::new();
    for _ in 0..3 {
        let assignment = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assignments.push(assignment.pod_name);
    }
    assignments.sort();
    assert_eq!(assignments, vec!["zero-both", "zero-cpu", "zero-memory"]);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn tolerated_taint_does_not_block_placement() {
    let cluster = Arc::new(InMemoryClusterState::new());
    let scheduler = Scheduler::new("sim1", cluster.clone());

    let mut tainted = make_node("tainted-sim1", 10, 10000);
    tainted.spec.taints = vec![Taint::new(TaintKey::NodeMemoryPressure, TaintEffect::NoSchedule)];
    scheduler.add_cache_node(tainted).await;
    scheduler.add_cache_node(make_node("clean-sim1", 10, 10000)).await;

    let mut rx = scheduler
        .start(KubeSchedulerConfiguration::default())
        .await
        .unwrap();

    let mut tolerant = make_pod("default", "tolerant-pod", 10, 1, 1000);
    tolerant.spec.tolerations = vec![Toleration {
        key: Some(TaintKey::NodeMemoryPressure),
        operator: TolerationOperator::Exists,
        value: String::new(),
        effect: Some(TaintEffect::NoSchedule),
    }];
    cluster.apply_pod(tolerant.clone()).await.unwrap();
    scheduler.update_cache_pod(tolerant).await;

    let assignment = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(assignment.pod_name, "tolerant-pod");
    assert!(["tainted-sim1", "clean-sim1"].contains(&assignment.node_name.as_str()));

    scheduler.shutdown().await;
}

#[tokio::test]
async fn node_selector_mismatch_blocks_until_a_matching_node_arrives() {
    let cluster = Arc::new(InMemoryClusterState::new());
    let scheduler = Scheduler::new("sim1", cluster.clone());

    let mut prod_node = make_node("prod-sim1", 10, 10000);
    prod_node.labels.insert("env".to_string(), "production".to_string());
    scheduler.add_cache_node(prod_node).await;

    let mut rx = scheduler
        .start(KubeSchedulerConfiguration::default())
        .await
        .unwrap();

    let mut pod = make_pod("default", "staging-pod", 10, 1, 1000);
    pod.spec.node_selector.insert("env".to_string(), "staging".to_string());
    cluster.apply_pod(pod.clone()).await.unwrap();
    scheduler.update_cache_pod(pod).await;

    let res = timeout(Duration::from_millis(500), rx.recv()).await;
    assert!(res.is_err(), "pod should stay unschedulable with no matching node");

    let mut staging_node = make_node("staging-sim1", 10, 10000);
    staging_node.labels.insert("env".to_string(), "staging".to_string());
    scheduler.add_cache_node(staging_node).await;

    let assignment = timeout(Duration::from_secs(6), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(assignment.pod_name, "staging-pod");
    assert_eq!(assignment.node_name, "staging-sim1");

    scheduler.shutdown().await;
}

#[tokio::test]
async fn required_node_affinity_picks_the_matching_node() {
    let cluster = Arc::new(InMemoryClusterState::new());
    let scheduler = Scheduler::new("sim1", cluster.clone());

    let mut west = make_node("west-sim1", 10, 10000);
    west.labels.insert("zone".to_string(), "us-west".to_string());
    let mut east = make_node("east-sim1", 10, 10000);
    east.labels.insert("zone".to_string(), "us-east".to_string());
    scheduler.add_cache_node(west).await;
    scheduler.add_cache_node(east).await;

    let mut rx = scheduler
        .start(KubeSchedulerConfiguration::default())
        .await
        .unwrap();

    let mut pod = make_pod("default", "affine-pod", 10, 1, 1000);
    pod.spec.affinity = Some(Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                terms: vec![vec![NodeSelectorRequirement {
                    key: "zone".to_string(),
                    operator: NodeSelectorOperator::NodeSelectorOpIn,
                    values: vec!["us-west".to_string()],
                }]],
            }),
            ..Default::default()
        }),
    });
    cluster.apply_pod(pod.clone()).await.unwrap();
    scheduler.update_cache_pod(pod).await;

    let assignment = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(assignment.pod_name, "affine-pod");
    assert_eq!(assignment.node_name, "west-sim1");

    scheduler.shutdown().await;
}

#[tokio::test]
async fn higher_priority_pods_are_scheduled_first() {
    let cluster = Arc::new(InMemoryClusterState::new());
    let scheduler = Scheduler::new("sim1", cluster.clone());
    scheduler.add_cache_node(make_node("node1-sim1", 10, 10000)).await;

    let mut rx = scheduler
        .start(KubeSchedulerConfiguration::default())
        .await
        .unwrap();

    for i in (1..=20).rev() {
        let pod = make_pod("default", &format!("pod-{i}"), i, 1, 100);
        cluster.apply_pod(pod.clone()).await.unwrap();
        scheduler.update_cache_pod(pod).await;
    }

    let mut assignments = Vec::new();
    for _ in 0..5 {
        let assignment = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assignments.push(assignment.pod_name);
    }

    assert_eq!(
        assignments,
        vec!["pod-20", "pod-19", "pod-18", "pod-17", "pod-16"]
    );

    scheduler.shutdown().await;
}

#[tokio::test]
async fn removing_a_node_requeues_its_pods() {
    let cluster = Arc::new(InMemoryClusterState::new());
    let scheduler = Scheduler::new("sim1", cluster.clone());
    scheduler.add_cache_node(make_node("node1-sim1", 10, 10000)).await;

    let mut rx = scheduler
        .start(KubeSchedulerConfiguration::default())
        .await
        .unwrap();

    let pod = make_pod("default", "pod1", 10, 1, 1000);
    cluster.apply_pod(pod.clone()).await.unwrap();
    scheduler.update_cache_pod(pod).await;

    let assignment = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(assignment.node_name, "node1-sim1");

    scheduler.remove_cache_node("node1-sim1").await;

    let res = timeout(Duration::from_millis(500), rx.recv()).await;
    assert!(res.is_err(), "pod should be unschedulable once its node is gone");

    scheduler.add_cache_node(make_node("node2-sim1", 10, 10000)).await;

    let assignment = timeout(Duration::from_secs(6), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(assignment.pod_name, "pod1");
    assert_eq!(assignment.node_name, "node2-sim1");

    scheduler.shutdown().await;
}

#[tokio::test]
async fn empty_cluster_leaves_pod_unscheduled() {
    let cluster = Arc::new(InMemoryClusterState::new());
    let scheduler = Scheduler::new("sim1", cluster.clone());

    let mut rx = scheduler
        .start(KubeSchedulerConfiguration::default())
        .await
        .unwrap();

    let pod = make_pod("default", "orphan-pod", 10, 1, 1000);
    cluster.apply_pod(pod.clone()).await.unwrap();
    scheduler.update_cache_pod(pod).await;

    let res = timeout(Duration::from_millis(500), rx.recv()).await;
    assert!(res.is_err());

    scheduler.shutdown().await;
}
