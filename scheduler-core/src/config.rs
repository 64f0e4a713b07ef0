//! Scheduler-config converter (C5) and engine-wide defaults.
//!
//! Rewrites a user-facing scheduler configuration so that every profile's
//! Filter/Score plugin lists only ever reference recording wrappers (C1),
//! and builds the trait-object `EnabledPlugins` a `Framework` runs against.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::PodInfo;

use crate::annotations::{
    ANNOTATION_ENABLED_PLUGINS, ANNOTATION_SCHEDULER_NAME, EnabledPluginsAnnotation, PhaseEntry,
    PluginRef, encode_enabled_plugins,
};
use crate::error::{Result, SchedulerError};
use crate::plugins::{EnabledPlugins, PluginInfo, Plugins as DefaultPluginInfos, Registry};
use crate::result_store::ResultStore;
use crate::wrappers::{ForFilter, ForScore};

pub const FILTER_SUFFIX: &str = "ForFilter";
pub const SCORE_SUFFIX: &str = "ForScore";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PluginSet {
    pub enabled: Vec<PluginRef>,
    pub disabled: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProfilePlugins {
    pub filter: PluginSet,
    pub score: PluginSet,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
    pub scheduler_name: String,
    pub plugins: ProfilePlugins,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            scheduler_name: "default-scheduler".to_string(),
            plugins: ProfilePlugins::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KubeSchedulerConfiguration {
    pub profiles: Vec<Profile>,
}

/// Non-`Profiles` knobs, overlaid unconditionally onto whatever the user
/// supplied — user changes to these fields are ignored, matching the source
/// `KubeSchedulerConfiguration`'s split between profile and engine config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineDefaults {
    pub percentage_of_nodes_to_score: u8,
    pub parallelism: usize,
    pub pod_initial_backoff: Duration,
    pub pod_max_backoff: Duration,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            percentage_of_nodes_to_score: 100,
            parallelism: 16,
            pod_initial_backoff: Duration::from_secs(1),
            pod_max_backoff: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EffectiveConfig {
    pub engine: EngineDefaults,
    pub profiles: Vec<Profile>,
}

/// Converts a user-facing configuration into one whose profiles only
/// reference recording wrappers, overlaid on engine defaults.
pub fn convert(config: &KubeSchedulerConfiguration) -> Result<EffectiveConfig> {
    let mut profiles = config.profiles.clone();
    if profiles.is_empty() {
        profiles.push(Profile::default());
    }
    for profile in &mut profiles {
        convert_profile(profile)?;
    }
    Ok(EffectiveConfig {
        engine: EngineDefaults::default(),
        profiles,
    })
}

fn convert_profile(profile: &mut Profile) -> Result<()> {
    let defaults = DefaultPluginInfos::default();
    convert_phase(&mut profile.plugins.filter, &defaults.filter, FILTER_SUFFIX)?;
    convert_phase(&mut profile.plugins.score, &defaults.score, SCORE_SUFFIX)?;
    Ok(())
}

fn convert_phase(set: &mut PluginSet, defaults: &[PluginInfo], suffix: &str) -> Result<()> {
    if set.enabled.iter().any(|p| p.name.ends_with(suffix)) {
        return Err(SchedulerError::ConfigInvalid(format!(
            "profile already references recording wrappers (suffix {suffix})"
        )));
    }

    let user_disabled: HashSet<&str> = set.disabled.iter().map(String::as_str).collect();
    let mut enabled = Vec::new();
    let mut seen = HashSet::new();
    for default in defaults {
        if user_disabled.contains(default.name.as_str()) {
            continue;
        }
        let wrapped = format!("{}{}", default.name, suffix);
        if !seen.insert(wrapped.clone()) {
            return Err(SchedulerError::ConfigInvalid(format!(
                "duplicate plugin {wrapped} after suffixing"
            )));
        }
        enabled.push(PluginRef {
            name: wrapped,
            weight: default.weight,
        });
    }

    set.enabled = enabled;
    set.disabled = defaults.iter().map(|d| d.name.clone()).collect();
    Ok(())
}

/// Companion step to C5's conversion: stamps a pod, on create or update,
/// with the enabled-plugins and scheduler-name annotations that reflect what
/// `profile` said at the moment of apply (§4.6). Recording wrappers consult
/// this annotation rather than the live profile, so a later profile change
/// never retroactively alters an already-applied pod's recorded verdicts.
pub fn stamp_pod_annotations(profile: &Profile, pod: &mut PodInfo) {
    let strip = |name: &str, suffix: &str| {
        name.strip_suffix(suffix).unwrap_or(name).to_string()
    };
    let annotation = EnabledPluginsAnnotation {
        filter: PhaseEntry {
            enabled: profile
                .plugins
                .filter
                .enabled
                .iter()
                .map(|p| PluginRef {
                    name: strip(&p.name, FILTER_SUFFIX),
                    weight: p.weight,
                })
                .collect(),
        },
        score: PhaseEntry {
            enabled: profile
                .plugins
                .score
                .enabled
                .iter()
                .map(|p| PluginRef {
                    name: strip(&p.name, SCORE_SUFFIX),
                    weight: p.weight,
                })
                .collect(),
        },
    };
    if let Ok(encoded) = encode_enabled_plugins(&annotation) {
        pod.annotations
            .insert(ANNOTATION_ENABLED_PLUGINS.to_string(), encoded);
    }
    pod.annotations.insert(
        ANNOTATION_SCHEDULER_NAME.to_string(),
        profile.scheduler_name.clone(),
    );
}

/// Builds the trait-object plugin lists a `Framework` runs, wrapping every
/// enabled Filter/Score plugin named in `profile` with its C1 recorder.
/// PreEnqueue/PreFilter/PreScore/QueueSort run unwrapped straight from the
/// registry — only Filter and Score carry per-pod enablement and recording.
pub fn build_enabled_plugins(
    registry: &Registry,
    profile: &Profile,
    store: Arc<ResultStore>,
) -> Result<EnabledPlugins> {
    let mut filter = Vec::new();
    for entry in &profile.plugins.filter.enabled {
        let original_name = entry
            .name
            .strip_suffix(FILTER_SUFFIX)
            .ok_or_else(|| SchedulerError::ConfigInvalid(format!("{} missing {FILTER_SUFFIX} suffix", entry.name)))?;
        let original = registry
            .filter
            .iter()
            .find(|p| p.name() == original_name)
            .ok_or_else(|| SchedulerError::ConfigInvalid(format!("unknown filter plugin {original_name}")))?
            .clone();
        filter.push((
            Arc::new(ForFilter::new(original, store.clone())) as Arc<dyn crate::plugins::FilterPlugin>,
            entry.weight,
        ));
    }

    let mut score = Vec::new();
    for entry in &profile.plugins.score.enabled {
        let original_name = entry
            .name
            .strip_suffix(SCORE_SUFFIX)
            .ok_or_else(|| SchedulerError::ConfigInvalid(format!("{} missing {SCORE_SUFFIX} suffix", entry.name)))?;
        let original = registry
            .score
            .iter()
            .find(|p| p.name() == original_name)
            .ok_or_else(|| SchedulerError::ConfigInvalid(format!("unknown score plugin {original_name}")))?
            .clone();
        score.push((
            Arc::new(ForScore::new(original, store.clone(), entry.weight)) as Arc<dyn crate::plugins::ScorePlugin>,
            entry.weight,
        ));
    }

    Ok(EnabledPlugins {
        queue_sort: Some(registry.queue_sort.clone()),
        pre_enqueue: registry
            .pre_enqueue
            .iter()
            .cloned()
            .map(|p| (p, 0))
            .collect(),
        pre_filter: registry
            .pre_filter
            .iter()
            .cloned()
            .map(|p| (p, 0))
            .collect(),
        filter,
        post_filter: vec![],
        pre_score: registry
            .pre_score
            .iter()
            .cloned()
            .map(|p| (p, 0))
            .collect(),
        score,
        reserve: vec![],
        permit: vec![],
        pre_bind: vec![],
        bind: vec![],
        post_bind: vec![],
    })
}
