//! Per-pod enabled-plugin annotation codec (C6).
//!
//! Recording wrappers consult these helpers to decide whether the plugin
//! they wrap should actually run for a given pod, and which weight to use.
//! The default on any parse failure or missing annotation is conservative:
//! treat the plugin as disabled.

use std::collections::HashMap;

use common::PodInfo;
use serde::{Deserialize, Serialize};

pub const ANNOTATION_ENABLED_PLUGINS: &str = "scheduler-simulator/enabled-plugins";
pub const ANNOTATION_SCHEDULER_NAME: &str = "scheduler-simulator/scheduler-name";
pub const ANNOTATION_FILTER_RESULT: &str = "scheduler-simulator/filter-result";
pub const ANNOTATION_SCORE_RESULT: &str = "scheduler-simulator/score-result";
pub const ANNOTATION_FINALSCORE_RESULT: &str = "scheduler-simulator/finalscore-result";

pub const DISABLED_SENTINEL: &str = "(disabled)";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Filter,
    Score,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PluginRef {
    pub name: String,
    pub weight: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub enabled: Vec<PluginRef>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EnabledPluginsAnnotation {
    pub filter: PhaseEntry,
    pub score: PhaseEntry,
}

fn parse(pod: &PodInfo) -> Option<EnabledPluginsAnnotation> {
    let raw = pod.annotation(ANNOTATION_ENABLED_PLUGINS)?;
    serde_json::from_str(raw).ok()
}

fn phase_entry(annotation: &EnabledPluginsAnnotation, phase: Phase) -> &PhaseEntry {
    match phase {
        Phase::Filter => &annotation.filter,
        Phase::Score => &annotation.score,
    }
}

/// Returns true iff `plugin_name` appears in the matching phase's `enabled`
/// list of the pod's enabled-plugins annotation. Missing or malformed
/// annotations are treated conservatively as "plugin disabled".
pub fn is_enabled(pod: &PodInfo, plugin_name: &str, phase: Phase) -> bool {
    match parse(pod) {
        Some(annotation) => phase_entry(&annotation, phase)
            .enabled
            .iter()
            .any(|p| p.name == plugin_name),
        None => false,
    }
}

/// Returns the weight recorded for `plugin_name` in the pod's annotation, or
/// `default` if the plugin isn't listed or the annotation is missing/malformed.
pub fn weight(pod: &PodInfo, plugin_name: &str, phase: Phase, default: i64) -> i64 {
    match parse(pod) {
        Some(annotation) => phase_entry(&annotation, phase)
            .enabled
            .iter()
            .find(|p| p.name == plugin_name)
            .map(|p| p.weight)
            .unwrap_or(default),
        None => default,
    }
}

/// Restores the user-selected scheduler name that C5 cleared at apply time.
pub fn scheduler_name(pod: &PodInfo) -> Option<&str> {
    pod.annotation(ANNOTATION_SCHEDULER_NAME)
}

pub fn encode_enabled_plugins(annotation: &EnabledPluginsAnnotation) -> serde_json::Result<String> {
    serde_json::to_string(annotation)
}

/// `{nodeName: {pluginName: value}}` shape shared by the three result annotations.
pub type ResultMap = HashMap<String, HashMap<String, String>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_with_annotation(value: &str) -> PodInfo {
        let mut p = PodInfo::new("default", "p");
        p.annotations
            .insert(ANNOTATION_ENABLED_PLUGINS.to_string(), value.to_string());
        p
    }

    #[test]
    fn missing_annotation_is_conservatively_disabled() {
        let pod = PodInfo::new("default", "p");
        assert!(!is_enabled(&pod, "NodeName", Phase::Filter));
        assert_eq!(weight(&pod, "NodeName", Phase::Score, 7), 7);
    }

    #[test]
    fn malformed_annotation_is_conservatively_disabled() {
        let pod = pod_with_annotation("not json");
        assert!(!is_enabled(&pod, "NodeName", Phase::Filter));
    }

    #[test]
    fn listed_plugin_is_enabled_with_its_weight() {
        let annotation = EnabledPluginsAnnotation {
            filter: PhaseEntry {
                enabled: vec![PluginRef {
                    name: "NodeName".to_string(),
                    weight: 0,
                }],
            },
            score: PhaseEntry {
                enabled: vec![PluginRef {
                    name: "NodeResourcesFit".to_string(),
                    weight: 5,
                }],
            },
        };
        let pod = pod_with_annotation(&encode_enabled_plugins(&annotation).unwrap());
        assert!(is_enabled(&pod, "NodeName", Phase::Filter));
        assert!(!is_enabled(&pod, "NodeResourcesFit", Phase::Filter));
        assert_eq!(weight(&pod, "NodeResourcesFit", Phase::Score, 1), 5);
        assert_eq!(weight(&pod, "NodeAffinity", Phase::Score, 2), 2);
    }
}
