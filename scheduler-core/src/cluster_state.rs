//! External cluster-state seam (§6).
//!
//! The core never talks to a real control plane directly; it talks to
//! whatever implements this trait. `InMemoryClusterState` is the reference
//! implementation used by the core's own tests and by a standalone binary
//! that wants to run the simulator without a backing store.

use async_trait::async_trait;
use common::{NodeInfo, PodInfo};
use tokio::sync::{Mutex, broadcast};

use crate::error::{Result, SchedulerError};

#[derive(Clone, Debug)]
pub enum ClusterEventKind {
    Add,
    Update,
    Delete,
}

#[derive(Clone, Debug)]
pub struct PodEvent {
    pub kind: ClusterEventKind,
    pub before: Option<PodInfo>,
    pub after: Option<PodInfo>,
}

#[derive(Clone, Debug)]
pub struct NodeEvent {
    pub kind: ClusterEventKind,
    pub before: Option<NodeInfo>,
    pub after: Option<NodeInfo>,
}

#[async_trait]
pub trait ClusterState: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;
    async fn get_node(&self, name: &str) -> Result<Option<NodeInfo>>;
    async fn update_node(&self, node: NodeInfo) -> Result<()>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodInfo>>;
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodInfo>>;
    async fn apply_pod(&self, pod: PodInfo) -> Result<()>;
    async fn update_pod(&self, pod: PodInfo) -> Result<()>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    fn subscribe_pods(&self) -> broadcast::Receiver<PodEvent>;
    fn subscribe_nodes(&self) -> broadcast::Receiver<NodeEvent>;
}

/// Reference `ClusterState` backed by in-process maps, used by the core's
/// own tests (and any embedder that doesn't need a persistent backing store).
pub struct InMemoryClusterState {
    nodes: Mutex<std::collections::HashMap<String, NodeInfo>>,
    pods: Mutex<std::collections::HashMap<(String, String), PodInfo>>,
    pod_events: broadcast::Sender<PodEvent>,
    node_events: broadcast::Sender<NodeEvent>,
}

impl Default for InMemoryClusterState {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryClusterState {
    pub fn new() -> Self {
        let (pod_events, _) = broadcast::channel(256);
        let (node_events, _) = broadcast::channel(256);
        Self {
            nodes: Mutex::new(std::collections::HashMap::new()),
            pods: Mutex::new(std::collections::HashMap::new()),
            pod_events,
            node_events,
        }
    }
}

#[async_trait]
impl ClusterState for InMemoryClusterState {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        Ok(self.nodes.lock().await.values().cloned().collect())
    }

    async fn get_node(&self, name: &str) -> Result<Option<NodeInfo>> {
        Ok(self.nodes.lock().await.get(name).cloned())
    }

    async fn update_node(&self, node: NodeInfo) -> Result<()> {
        let mut guard = self.nodes.lock().await;
        let before = guard.insert(node.name.clone(), node.clone());
        let _ = self.node_events.send(NodeEvent {
            kind: if before.is_some() {
                ClusterEventKind::Update
            } else {
                ClusterEventKind::Add
            },
            before,
            after: node,
        });
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodInfo>> {
        Ok(self
            .pods
            .lock()
            .await
            .values()
            .filter(|p| p.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodInfo>> {
        Ok(self
            .pods
            .lock()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn apply_pod(&self, pod: PodInfo) -> Result<()> {
        let key = (pod.namespace.clone(), pod.name.clone());
        let mut guard = self.pods.lock().await;
        if guard.contains_key(&key) {
            return Err(SchedulerError::AlreadyExists {
                kind: "pod",
                namespace: pod.namespace,
                name: pod.name,
            });
        }
        guard.insert(key, pod.clone());
        let _ = self.pod_events.send(PodEvent {
            kind: ClusterEventKind::Add,
            before: None,
            after: Some(pod),
        });
        Ok(())
    }

    async fn update_pod(&self, pod: PodInfo) -> Result<()> {
        let key = (pod.namespace.clone(), pod.name.clone());
        let mut guard = self.pods.lock().await;
        let before = guard.insert(key, pod.clone());
        if before.is_none() {
            return Err(SchedulerError::NotFound {
                kind: "pod",
                namespace: pod.namespace,
                name: pod.name,
            });
        }
        let _ = self.pod_events.send(PodEvent {
            kind: ClusterEventKind::Update,
            before,
            after: Some(pod),
        });
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let key = (namespace.to_string(), name.to_string());
        let mut guard = self.pods.lock().await;
        let before = guard.remove(&key);
        if before.is_none() {
            return Err(SchedulerError::NotFound {
                kind: "pod",
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        let _ = self.pod_events.send(PodEvent {
            kind: ClusterEventKind::Delete,
            before,
            after: None,
        });
        Ok(())
    }

    fn subscribe_pods(&self) -> broadcast::Receiver<PodEvent> {
        self.pod_events.subscribe()
    }

    fn subscribe_nodes(&self) -> broadcast::Receiver<NodeEvent> {
        self.node_events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apply_then_get_round_trips() {
        let state = InMemoryClusterState::new();
        let pod = PodInfo::new("default", "p");
        state.apply_pod(pod.clone()).await.unwrap();
        let got = state.get_pod("default", "p").await.unwrap();
        assert_eq!(got.unwrap().name, "p");
    }

    #[tokio::test]
    async fn update_missing_pod_not_found() {
        let state = InMemoryClusterState::new();
        let pod = PodInfo::new("default", "ghost");
        let err = state.update_pod(pod).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound { .. }));
    }
}
