//! Recording plugin wrappers (C1).
//!
//! Each wrapper forwards to an original plugin, consults the per-pod
//! enabled-plugin annotation (C6), and records the verdict into the
//! scheduling-result store (C4) — all without altering the value the
//! framework sees, so recording never influences placement.

use std::sync::Arc;

use common::{NodeInfo, PodInfo};

use crate::annotations::{self, DISABLED_SENTINEL, Phase};
use crate::cycle_state::CycleState;
use crate::plugins::{
    FilterPlugin, Plugin, PreFilterPlugin, PreFilterResult, PreScorePlugin, ScoreExtension,
    ScorePlugin, Status,
};
use crate::result_store::ResultStore;

pub struct ForFilter {
    original: Arc<dyn FilterPlugin>,
    store: Arc<ResultStore>,
}

impl ForFilter {
    pub fn new(original: Arc<dyn FilterPlugin>, store: Arc<ResultStore>) -> Self {
        Self { original, store }
    }
}

impl Plugin for ForFilter {
    fn name(&self) -> &str {
        // Leaked once per wrapper construction: wrapper lifetimes are
        // process-lifetime (one Registry per running scheduler), so this is
        // bounded and lets `name()` keep returning `&str`.
        Box::leak(format!("{}ForFilter", self.original.name()).into_boxed_str())
    }
}

impl FilterPlugin for ForFilter {
    fn filter(&self, state: &mut CycleState, pod: &PodInfo, node_info: NodeInfo) -> Status {
        let original_name = self.original.name();
        let node_name = node_info.name.clone();
        if !annotations::is_enabled(pod, original_name, Phase::Filter) {
            self.store.add_filter_result(
                &pod.namespace,
                &pod.name,
                &node_name,
                original_name,
                DISABLED_SENTINEL,
            );
            return Status::default();
        }

        let status = self.original.filter(state, pod, node_info);
        let reason = if status.code == crate::plugins::Code::Success {
            "passed".to_string()
        } else if !status.reasons.is_empty() {
            status.reasons.join("; ")
        } else {
            status.err.clone()
        };

        self.store.add_filter_result(
            &pod.namespace,
            &pod.name,
            &node_name,
            original_name,
            &reason,
        );
        status
    }
}

/// PreFilter plugins aren't per-node, so there's nothing useful to record;
/// the wrapper exists purely to preserve the enabled-plugin short-circuit.
pub struct ForPreFilter {
    original: Arc<dyn PreFilterPlugin>,
}

impl ForPreFilter {
    pub fn new(original: Arc<dyn PreFilterPlugin>) -> Self {
        Self { original }
    }
}

impl Plugin for ForPreFilter {
    fn name(&self) -> &str {
        self.original.name()
    }
}

impl PreFilterPlugin for ForPreFilter {
    fn pre_filter(
        &self,
        state: &mut CycleState,
        pod: &PodInfo,
        nodes: Vec<NodeInfo>,
    ) -> (PreFilterResult, Status) {
        if !annotations::is_enabled(pod, self.original.name(), Phase::Filter) {
            return (PreFilterResult { node_names: vec![] }, Status::default());
        }
        self.original.pre_filter(state, pod, nodes)
    }
}

pub struct ForPreScore {
    original: Arc<dyn PreScorePlugin>,
}

impl ForPreScore {
    pub fn new(original: Arc<dyn PreScorePlugin>) -> Self {
        Self { original }
    }
}

impl Plugin for ForPreScore {
    fn name(&self) -> &str {
        self.original.name()
    }
}

impl PreScorePlugin for ForPreScore {
    fn pre_score(&self, state: &mut CycleState, pod: &PodInfo, nodes: Vec<NodeInfo>) -> Status {
        if !annotations::is_enabled(pod, self.original.name(), Phase::Score) {
            return Status::new(crate::plugins::Code::Skip, vec![]);
        }
        self.original.pre_score(state, pod, nodes)
    }
}

pub struct ForScore {
    original: Arc<dyn ScorePlugin>,
    store: Arc<ResultStore>,
    default_weight: i64,
}

impl ForScore {
    pub fn new(original: Arc<dyn ScorePlugin>, store: Arc<ResultStore>, default_weight: i64) -> Self {
        Self {
            original,
            store,
            default_weight,
        }
    }
}

impl Plugin for ForScore {
    fn name(&self) -> &str {
        Box::leak(format!("{}ForScore", self.original.name()).into_boxed_str())
    }
}

impl ScorePlugin for ForScore {
    fn score(&self, state: &mut CycleState, pod: &PodInfo, node_info: NodeInfo) -> (i64, Status) {
        let original_name = self.original.name();
        let node_name = node_info.name.clone();
        let weight = annotations::weight(pod, original_name, Phase::Score, self.default_weight);

        if !annotations::is_enabled(pod, original_name, Phase::Score) {
            self.store
                .add_score_result(&pod.namespace, &pod.name, &node_name, original_name, -1, weight);
            return (0, Status::default());
        }

        let (raw, status) = self.original.score(state, pod, node_info);
        self.store
            .add_score_result(&pod.namespace, &pod.name, &node_name, original_name, raw, weight);
        (raw, status)
    }

    fn score_extension(&self) -> Box<dyn ScoreExtension> {
        self.original.score_extension()
    }

    fn record_final_score(&self, namespace: &str, pod: &str, node: &str, normalized: i64, weight: i64) {
        self.store
            .add_final_score_result(namespace, pod, node, self.original.name(), normalized, weight);
    }
}
