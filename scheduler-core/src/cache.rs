use std::collections::HashMap;

use common::{NodeInfo, PodInfo};

pub type PodNameWithPriority = (u64, String, String);

/// A shortcut of the node status.
pub struct Cache {
    pods: HashMap<(String, String), PodInfo>,
    nodes: HashMap<String, NodeInfo>,
}

/// Cache stores the cluster state the scheduler is scheduling against.
/// Please remember to update the data in the cache
/// whenever you receive status updates about pods running on nodes.
impl Cache {
    pub fn new() -> Self {
        Cache {
            pods: HashMap::new(),
            nodes: HashMap::new(),
        }
    }

    fn key(namespace: &str, name: &str) -> (String, String) {
        (namespace.to_string(), name.to_string())
    }

    pub fn add_fail(&mut self, namespace: &str, pod_name: &str) -> bool {
        let key = Self::key(namespace, pod_name);
        if !self.pods.contains_key(&key) {
            return false;
        }
        self.pods
            .entry(key)
            .and_modify(|p| p.queued_info.attempts += 1);
        true
    }

    pub fn assign(&mut self, namespace: &str, pod_name: &str, node_name: &str) -> bool {
        let key = Self::key(namespace, pod_name);
        let pod_info = if let Some(pod) = self.pods.get_mut(&key) {
            pod
        } else {
            return false;
        };
        let node = if let Some(node) = self.nodes.get_mut(node_name) {
            node
        } else {
            return false;
        };
        pod_info.scheduled = Some(node_name.to_owned());
        node.requested.cpu += pod_info.spec.resources.cpu;
        node.requested.memory += pod_info.spec.resources.memory;
        true
    }

    pub fn update_pod(&mut self, pod: PodInfo) -> Option<PodInfo> {
        self.pods
            .insert(Self::key(&pod.namespace, &pod.name), pod)
    }

    pub fn remove_pod(&mut self, namespace: &str, pod_name: &str) {
        let key = Self::key(namespace, pod_name);
        if let Some(p) = self.pods.get(&key) {
            if let Some(n) = &p.scheduled {
                if let Some(node) = self.nodes.get_mut(n) {
                    node.requested.cpu -= p.spec.resources.cpu;
                    node.requested.memory -= p.spec.resources.memory;
                }
            }
        }
        self.pods.remove(&key);
    }

    pub fn pop_pod_on_node(&mut self, node_name: &str) -> Vec<PodNameWithPriority> {
        let mut res = Vec::new();
        self.pods
            .values_mut()
            .filter(|p| matches!(&p.scheduled, Some(name) if name == node_name))
            .for_each(|p| {
                p.scheduled = None;
                p.queued_info.attempts = 0;
                res.push((p.spec.priority, p.namespace.clone(), p.name.clone()));
            });
        res
    }

    pub fn update_node(&mut self, node: NodeInfo) {
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn remove_node(&mut self, node_name: &str) {
        self.nodes.remove(node_name);
    }

    pub fn get_nodes(&self) -> Vec<NodeInfo> {
        self.nodes.values().cloned().collect()
    }

    pub fn get_pod(&self, namespace: &str, pod_name: &str) -> Option<PodInfo> {
        self.pods.get(&Self::key(namespace, pod_name)).cloned()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}
