//! Scheduling-result store (C4).
//!
//! Accumulates per-(node, plugin) filter/score/final-score verdicts for a
//! pod across one scheduling cycle, then flushes them onto the pod's
//! annotations once the pod transitions to its bound state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, warn};

use crate::annotations::{
    ANNOTATION_FILTER_RESULT, ANNOTATION_FINALSCORE_RESULT, ANNOTATION_SCORE_RESULT, ResultMap,
};
use crate::cluster_state::ClusterState;
use crate::error::{Result, SchedulerError};

const FLUSH_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const FLUSH_BACKOFF_FACTOR: u32 = 3;
const FLUSH_RETRY_STEPS: u32 = 6;

#[derive(Default, Clone)]
struct PodResult {
    filter: ResultMap,
    score: ResultMap,
    finalscore: ResultMap,
}

type PodKey = (String, String);

/// Keyed by `(namespace, podName)`. `simulator_id` scopes which nodes this
/// store is allowed to record against (I4): a node not suffixed with this
/// tenant's id is silently ignored.
pub struct ResultStore {
    simulator_id: String,
    entries: Mutex<HashMap<PodKey, PodResult>>,
}

impl ResultStore {
    pub fn new(simulator_id: impl Into<String>) -> Self {
        Self {
            simulator_id: simulator_id.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn belongs_to_tenant(&self, node_name: &str) -> bool {
        node_name.ends_with(&format!("-{}", self.simulator_id))
    }

    pub fn add_filter_result(
        &self,
        namespace: &str,
        pod: &str,
        node: &str,
        plugin: &str,
        reason: &str,
    ) {
        if !self.belongs_to_tenant(node) {
            return;
        }
        let mut guard = self.entries.lock().expect("result store lock poisoned");
        let entry = guard
            .entry((namespace.to_string(), pod.to_string()))
            .or_default();
        let node_entry = entry.filter.entry(node.to_string()).or_default();
        // First-writer-wins: a (node, plugin) verdict is never overwritten.
        node_entry
            .entry(plugin.to_string())
            .or_insert_with(|| reason.to_string());
    }

    pub fn add_score_result(
        &self,
        namespace: &str,
        pod: &str,
        node: &str,
        plugin: &str,
        raw: i64,
        weight: i64,
    ) {
        if !self.belongs_to_tenant(node) {
            return;
        }
        let mut guard = self.entries.lock().expect("result store lock poisoned");
        let entry = guard
            .entry((namespace.to_string(), pod.to_string()))
            .or_default();
        entry
            .score
            .entry(node.to_string())
            .or_default()
            .insert(plugin.to_string(), raw.to_string());
        entry
            .finalscore
            .entry(node.to_string())
            .or_default()
            .insert(plugin.to_string(), (raw * weight).to_string());
    }

    pub fn add_final_score_result(
        &self,
        namespace: &str,
        pod: &str,
        node: &str,
        plugin: &str,
        normalized: i64,
        weight: i64,
    ) {
        if !self.belongs_to_tenant(node) {
            return;
        }
        let mut guard = self.entries.lock().expect("result store lock poisoned");
        let entry = guard
            .entry((namespace.to_string(), pod.to_string()))
            .or_default();
        entry
            .finalscore
            .entry(node.to_string())
            .or_default()
            .insert(plugin.to_string(), (normalized * weight).to_string());
    }

    /// Called from the bound-pod-event observer. Skips idempotently if the
    /// pod's score and final-score annotations are already both set on the
    /// pod itself, or there's nothing recorded to flush (S4). Completeness is
    /// judged from the pod's own annotations, not the in-memory snapshot: the
    /// snapshot is already "complete" (score/finalscore populated) the moment
    /// the Score phase runs, well before any flush — a pod is only actually
    /// done once those annotations have landed on it.
    pub async fn flush(
        self: &Arc<Self>,
        namespace: &str,
        pod: &str,
        cluster: &dyn ClusterState,
    ) -> Result<()> {
        let key = (namespace.to_string(), pod.to_string());

        if let Some(current) = cluster.get_pod(namespace, pod).await? {
            let already_flushed = current.annotations.contains_key(ANNOTATION_SCORE_RESULT)
                && current.annotations.contains_key(ANNOTATION_FINALSCORE_RESULT);
            if already_flushed {
                self.entries.lock().expect("result store lock poisoned").remove(&key);
                return Ok(());
            }
        }

        let snapshot = {
            let guard = self.entries.lock().expect("result store lock poisoned");
            match guard.get(&key) {
                Some(entry) => entry.clone(),
                None => return Ok(()),
            }
        };

        let mut backoff = FLUSH_INITIAL_BACKOFF;
        for attempt in 0..FLUSH_RETRY_STEPS {
            match self.try_flush_once(namespace, pod, &snapshot, cluster).await {
                Ok(()) => {
                    self.entries.lock().expect("result store lock poisoned").remove(&key);
                    return Ok(());
                }
                Err(SchedulerError::NotFound { .. }) | Err(SchedulerError::AlreadyExists { .. }) => {
                    // Benign race against the cluster state: pod is already
                    // gone, nothing left to annotate.
                    self.entries.lock().expect("result store lock poisoned").remove(&key);
                    return Ok(());
                }
                Err(e) if attempt + 1 == FLUSH_RETRY_STEPS => {
                    error!(
                        "giving up flushing scheduling result for {}/{} after {} attempts: {}",
                        namespace, pod, FLUSH_RETRY_STEPS, e
                    );
                    return Err(SchedulerError::FlushConflict {
                        namespace: namespace.to_string(),
                        name: pod.to_string(),
                        attempts: FLUSH_RETRY_STEPS,
                    });
                }
                Err(e) => {
                    warn!(
                        "flush of scheduling result for {}/{} failed (attempt {}), retrying in {:?}: {}",
                        namespace,
                        pod,
                        attempt + 1,
                        backoff,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= FLUSH_BACKOFF_FACTOR;
                }
            }
        }
        unreachable!("loop always returns on its final iteration")
    }

    async fn try_flush_once(
        &self,
        namespace: &str,
        pod_name: &str,
        snapshot: &PodResult,
        cluster: &dyn ClusterState,
    ) -> Result<()> {
        let mut pod = cluster
            .get_pod(namespace, pod_name)
            .await?
            .ok_or_else(|| SchedulerError::NotFound {
                kind: "pod",
                namespace: namespace.to_string(),
                name: pod_name.to_string(),
            })?;

        pod.annotations.insert(
            ANNOTATION_FILTER_RESULT.to_string(),
            serde_json::to_string(&snapshot.filter)?,
        );
        pod.annotations.insert(
            ANNOTATION_SCORE_RESULT.to_string(),
            serde_json::to_string(&snapshot.score)?,
        );
        pod.annotations.insert(
            ANNOTATION_FINALSCORE_RESULT.to_string(),
            serde_json::to_string(&snapshot.finalscore)?,
        );

        cluster.update_pod(pod).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_state::InMemoryClusterState;
    use common::PodInfo;

    #[test]
    fn filter_result_is_first_writer_wins() {
        let store = ResultStore::new("sim1");
        store.add_filter_result("default", "p", "node-sim1", "NodeName", "passed");
        store.add_filter_result("default", "p", "node-sim1", "NodeName", "should not overwrite");
        let guard = store.entries.lock().unwrap();
        let entry = guard.get(&("default".to_string(), "p".to_string())).unwrap();
        assert_eq!(entry.filter["node-sim1"]["NodeName"], "passed");
    }

    #[test]
    fn cross_tenant_node_is_ignored() {
        let store = ResultStore::new("sim1");
        store.add_filter_result("default", "p", "node-sim2", "NodeName", "passed");
        let guard = store.entries.lock().unwrap();
        assert!(guard.is_empty());
    }

    #[test]
    fn score_result_writes_weighted_finalscore_immediately() {
        let store = ResultStore::new("sim1");
        store.add_score_result("default", "p", "node-sim1", "NodeResourcesFit", 40, 2);
        let guard = store.entries.lock().unwrap();
        let entry = guard.get(&("default".to_string(), "p".to_string())).unwrap();
        assert_eq!(entry.score["node-sim1"]["NodeResourcesFit"], "40");
        assert_eq!(entry.finalscore["node-sim1"]["NodeResourcesFit"], "80");
    }

    #[tokio::test]
    async fn flush_is_idempotent_and_clears_entry() {
        let cluster = InMemoryClusterState::new();
        cluster.apply_pod(PodInfo::new("default", "p")).await.unwrap();
        let store = Arc::new(ResultStore::new("sim1"));
        store.add_score_result("default", "p", "node-sim1", "NodeResourcesFit", 40, 1);
        store.add_final_score_result("default", "p", "node-sim1", "NodeResourcesFit", 40, 1);

        store.flush("default", "p", &cluster).await.unwrap();
        assert!(store.entries.lock().unwrap().is_empty());
        let pod = cluster.get_pod("default", "p").await.unwrap().unwrap();
        assert!(pod.annotations.contains_key(ANNOTATION_SCORE_RESULT));

        // Second flush: nothing in memory, must be a no-op.
        store.flush("default", "p", &cluster).await.unwrap();
    }
}
