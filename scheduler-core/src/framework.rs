//! Scheduling framework (C2): runs the PreFilter -> Filter -> PreScore ->
//! Score -> Normalize -> Select pipeline for one pod against one node
//! snapshot.

use common::{NodeInfo, PodInfo};
use rand::Rng;

use crate::cycle_state::CycleState;
use crate::error::{Result, SchedulerError};
use crate::plugins::node_resources_fit::{SCORING_STRATEGY_CONFIG_KEY, ScoringStrategy};
use crate::plugins::{Code, EnabledPlugins};

pub struct Framework {
    plugins: EnabledPlugins,
    scoring_strategy: ScoringStrategy,
}

impl Framework {
    pub fn new(plugins: EnabledPlugins, scoring_strategy: ScoringStrategy) -> Self {
        Self {
            plugins,
            scoring_strategy,
        }
    }

    /// Runs the PreEnqueue plugins (e.g. scheduling gates) that gate whether
    /// a pod may even enter the active queue.
    pub fn is_enqueueable(&self, pod: &PodInfo) -> bool {
        self.plugins
            .pre_enqueue
            .iter()
            .all(|(plugin, _)| plugin.pre_enqueue(pod).code == Code::Success)
    }

    /// Runs one scheduling cycle for `pod` against the given node snapshot.
    /// Returns the winning node's name, or `None` if no node is feasible.
    pub fn run_cycle(&self, pod: &PodInfo, nodes: Vec<NodeInfo>) -> Result<Option<String>> {
        let mut state = CycleState::default();
        state.write(
            SCORING_STRATEGY_CONFIG_KEY,
            Box::new(self.scoring_strategy.clone()),
        );

        for (plugin, _weight) in &self.plugins.pre_filter {
            let (_result, status) = plugin.pre_filter(&mut state, pod, nodes.clone());
            self.abort_on_error(&status)?;
            if status.code == Code::UnschedulableAndUnresolvable || status.code == Code::Unschedulable {
                return Ok(None);
            }
        }

        let feasible = self.filter_nodes(&mut state, pod, nodes)?;
        if feasible.is_empty() {
            return Ok(None);
        }

        for (plugin, _weight) in &self.plugins.pre_score {
            let status = plugin.pre_score(&mut state, pod, feasible.clone());
            self.abort_on_error(&status)?;
        }

        if self.plugins.score.is_empty() {
            return Ok(Some(feasible[0].name.clone()));
        }

        let mut totals = vec![0i64; feasible.len()];
        for (plugin, weight) in &self.plugins.score {
            let mut scores = Vec::with_capacity(feasible.len());
            for node in &feasible {
                let (raw, status) = plugin.score(&mut state, pod, node.clone());
                self.abort_on_error(&status)?;
                scores.push(raw);
            }
            let extension = plugin.score_extension();
            let status = extension.normalize_score(&state, pod, &mut scores);
            self.abort_on_error(&status)?;
            for (i, normalized) in scores.into_iter().enumerate() {
                totals[i] += normalized * weight;
                plugin.record_final_score(&pod.namespace, &pod.name, &feasible[i].name, normalized, *weight);
            }
        }

        let winner = select_t1(&totals).expect("feasible is non-empty");
        Ok(Some(feasible[winner].name.clone()))
    }

    fn filter_nodes(
        &self,
        state: &mut CycleState,
        pod: &PodInfo,
        nodes: Vec<NodeInfo>,
    ) -> Result<Vec<NodeInfo>> {
        let mut feasible = Vec::new();
        'node: for node in nodes {
            for (plugin, _weight) in &self.plugins.filter {
                let status = plugin.filter(state, pod, node.clone());
                if status.code == Code::Error {
                    return Err(SchedulerError::PluginError {
                        plugin: plugin.name().to_string(),
                        reason: status.err,
                    });
                }
                if status.code != Code::Success {
                    continue 'node;
                }
            }
            feasible.push(node);
        }
        Ok(feasible)
    }

    fn abort_on_error(&self, status: &crate::plugins::Status) -> Result<()> {
        if status.code == Code::Error {
            return Err(SchedulerError::PluginError {
                plugin: status.plugin.clone(),
                reason: status.err.clone(),
            });
        }
        Ok(())
    }
}

/// Tie-break rule T1: uniform random selection among nodes tied at the
/// current maximum, computed in one pass via reservoir sampling.
fn select_t1(scores: &[i64]) -> Option<usize> {
    let mut rng = rand::thread_rng();
    let mut max = i64::MIN;
    let mut tied = 0u32;
    let mut selected = None;

    for (i, &score) in scores.iter().enumerate() {
        if score > max {
            max = score;
            tied = 1;
            selected = Some(i);
        } else if score == max {
            tied += 1;
            if rng.gen_range(0..tied) == 0 {
                selected = Some(i);
            }
        }
    }
    selected
}
