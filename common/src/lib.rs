//! Pod and Node definitions shared between the scheduling core and its
//! adapters.
//!
//! The shapes here are deliberately narrower than the Kubernetes API types
//! they mirror: only the fields the scheduling plugins actually consult are
//! represented.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A scheduling subject.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodInfo {
    pub namespace: String,
    pub name: String,
    pub spec: PodSpec,
    pub annotations: HashMap<String, String>,
    pub queued_info: QueuedInfo,
    /// Node this pod is currently bound to, if any.
    pub scheduled: Option<String>,
}

impl PodInfo {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(|s| s.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodSpec {
    pub resources: ResourcesRequirements,
    /// Higher values are scheduled first.
    pub priority: u64,
    pub scheduler_name: String,
    pub scheduling_gates: Vec<String>,
    pub tolerations: Vec<Toleration>,
    pub node_name: Option<String>,
    pub node_selector: HashMap<String, String>,
    pub affinity: Option<Affinity>,
}

/// Bookkeeping the scheduling queue needs: when the pod first became
/// eligible to run, and how many scheduling attempts have failed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueuedInfo {
    pub timestamp: u64,
    pub attempts: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesRequirements {
    /// Millicores.
    pub cpu: u64,
    /// Bytes.
    pub memory: u64,
}

/// A placement target.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub spec: NodeSpec,
    pub allocatable: ResourcesRequirements,
    pub requested: ResourcesRequirements,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeSpec {
    pub unschedulable: bool,
    pub taints: Vec<Taint>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaintKey {
    NodeNotReady,
    NodeUnreachable,
    NodeUnschedulable,
    NodeMemoryPressure,
    NodeDiskPressure,
    NodePidPressure,
    NodeNetworkUnavailable,
    Custom(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Taint {
    pub key: TaintKey,
    pub effect: TaintEffect,
    pub value: String,
}

impl Taint {
    pub fn new(key: TaintKey, effect: TaintEffect) -> Self {
        Self {
            key,
            effect,
            value: String::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TolerationOperator {
    Exists,
    Equal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Toleration {
    pub key: Option<TaintKey>,
    pub operator: TolerationOperator,
    pub value: String,
    /// None matches all taint effects.
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    pub fn tolerate(&self, taint: &Taint) -> bool {
        if let Some(effect) = self.effect
            && effect != taint.effect
        {
            return false;
        }
        match &self.key {
            None => true,
            Some(key) => {
                *key == taint.key
                    && match self.operator {
                        TolerationOperator::Exists => true,
                        TolerationOperator::Equal => self.value == taint.value,
                    }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeSelectorOperator {
    NodeSelectorOpIn,
    NodeSelectorOpNotIn,
    NodeSelectorOpExists,
    NodeSelectorOpDoesNotExist,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeSelectorRequirement {
    pub key: String,
    pub operator: NodeSelectorOperator,
    pub values: Vec<String>,
}

impl NodeSelectorRequirement {
    fn matches(&self, node: &NodeInfo) -> bool {
        let label = node.labels.get(&self.key);
        match self.operator {
            NodeSelectorOperator::NodeSelectorOpIn => {
                matches!(label, Some(v) if self.values.contains(v))
            }
            NodeSelectorOperator::NodeSelectorOpNotIn => {
                !matches!(label, Some(v) if self.values.contains(v))
            }
            NodeSelectorOperator::NodeSelectorOpExists => label.is_some(),
            NodeSelectorOperator::NodeSelectorOpDoesNotExist => label.is_none(),
        }
    }
}

/// Required-during-scheduling node selector: a disjunction of terms, each an
/// implicit conjunction of requirements (mirrors the Kubernetes shape
/// closely enough for the plugins that consume it, minus field selectors).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeSelector {
    pub terms: Vec<Vec<NodeSelectorRequirement>>,
}

impl NodeSelector {
    pub fn matches(&self, node: &NodeInfo) -> bool {
        if self.terms.is_empty() {
            return true;
        }
        self.terms
            .iter()
            .any(|term| term.iter().all(|req| req.matches(node)))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PreferredSchedulingTerm {
    pub weight: i64,
    pub match_label: NodeSelectorRequirement,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PreferredSchedulingTerms {
    pub terms: Vec<PreferredSchedulingTerm>,
}

impl PreferredSchedulingTerms {
    pub fn score(&self, node: &NodeInfo) -> i64 {
        self.terms
            .iter()
            .filter(|t| t.match_label.matches(node))
            .map(|t| t.weight)
            .sum()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeAffinity {
    pub required_during_scheduling_ignored_during_execution: Option<NodeSelector>,
    pub preferred_during_scheduling_ignored_during_execution: Option<PreferredSchedulingTerms>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Affinity {
    pub node_affinity: Option<NodeAffinity>,
}
