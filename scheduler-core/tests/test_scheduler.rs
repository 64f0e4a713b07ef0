use std::sync::Arc;
use std::time::Duration;

use common::{NodeInfo, PodInfo, PodSpec, ResourcesRequirements};
use scheduler_core::annotations::{
    ANNOTATION_FILTER_RESULT, ANNOTATION_FINALSCORE_RESULT, ANNOTATION_SCORE_RESULT,
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
async fn scheduler_assigns_each_pod_to_a_node_with_enough_room() {
    let cluster = Arc::new(InMemoryClusterState::new());
    let scheduler = Scheduler::new("sim1", cluster.clone());
    scheduler.add_cache_node(make_node("node1-sim1", 4, 2048)).await;
    scheduler.add_cache_node(make_node("node2-sim1", 2, 1024)).await;
    scheduler.add_cache_node(make_node("node3-sim1", 8, 4096)).await;

    let mut rx = scheduler
        .start(KubeSchedulerConfiguration::default())
        .await
        .unwrap();

    for (name, priority, cpu, memory) in [
        ("pod1", 10, 2, 1024),
        ("pod2", 20, 1, 512),
        ("pod3", 5, 3, 2048),
    ] {
        let pod = make_pod("default", name, priority, cpu, memory);
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
    assert_eq!(assignments, vec!["pod1", "pod2", "pod3"]);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn pod_too_big_for_any_node_waits_until_a_node_is_added() {
    let cluster = Arc::new(InMemoryClusterState::new());
    let scheduler = Scheduler::new("sim1", cluster.clone());

    let mut rx = scheduler
        .start(KubeSchedulerConfiguration::default())
        .await
        .unwrap();

    let pod = make_pod("default", "bigpod", 1, 100, 100);
    cluster.apply_pod(pod.clone()).await.unwrap();
    scheduler.update_cache_pod(pod).await;

    let res = timeout(Duration::from_millis(500), rx.recv()).await;
    assert!(res.is_err(), "pod should not be scheduled with no nodes present");

    scheduler.add_cache_node(make_node("node1-sim1", 200, 200)).await;

    let assignment = timeout(Duration::from_secs(6), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(assignment.pod_name, "bigpod");
    assert_eq!(assignment.node_name, "node1-sim1");

    scheduler.shutdown().await;
}

#[tokio::test]
async fn bound_pod_carries_filter_score_and_finalscore_annotations() {
    let cluster = Arc::new(InMemoryClusterState::new());
    let scheduler = Scheduler::new("sim1", cluster.clone());
    scheduler.add_cache_node(make_node("node1-sim1", 4, 2048)).await;

    let mut rx = scheduler
        .start(KubeSchedulerConfiguration::default())
        .await
        .unwrap();

    let pod = make_pod("default", "pod1", 10, 2, 1024);
    cluster.apply_pod(pod.clone()).await.unwrap();
    scheduler.update_cache_pod(pod).await;

    timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // flush runs off the pod-update-event observer, asynchronously from the
    // assignment being sent, so poll rather than checking immediately.
    let bound = timeout(Duration::from_secs(2), async {
        loop {
            let pod = cluster
                .get_pod("default", "pod1")
                .await
                .unwrap()
                .expect("bound pod must still exist");
            if pod.annotations.contains_key(ANNOTATION_SCORE_RESULT) {
                return pod;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("scheduling-result annotations should appear on the bound pod");

    let filter_raw = bound
        .annotations
        .get(ANNOTATION_FILTER_RESULT)
        .expect("filter-result annotation missing");
    let score_raw = bound
        .annotations
        .get(ANNOTATION_SCORE_RESULT)
        .expect("score-result annotation missing");
    let finalscore_raw = bound
        .annotations
        .get(ANNOTATION_FINALSCORE_RESULT)
        .expect("finalscore-result annotation missing");

    let filter: std::collections::HashMap<String, std::collections::HashMap<String, String>> =
        serde_json::from_str(filter_raw).unwrap();
    let score: std::collections::HashMap<String, std::collections::HashMap<String, String>> =
        serde_json::from_str(score_raw).unwrap();
    let finalscore: std::collections::HashMap<String, std::collections::HashMap<String, String>> =
        serde_json::from_str(finalscore_raw).unwrap();

    assert!(filter.contains_key("node1-sim1"));
    assert!(score["node1-sim1"].contains_key("NodeResourcesFit"));
    assert!(finalscore["node1-sim1"].contains_key("NodeResourcesFit"));

    scheduler.shutdown().await;
}
