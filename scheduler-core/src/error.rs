use thiserror::Error;

/// Errors surfaced by the scheduling engine.
///
/// Variants mirror the status codes plugins can return, plus the
/// infrastructure-level failures that can occur around a scheduling cycle.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("plugin {plugin} found pod unschedulable: {reason}")]
    PluginUnschedulable { plugin: String, reason: String },

    #[error("plugin {plugin} errored: {reason}")]
    PluginError { plugin: String, reason: String },

    #[error("scheduling cycle for pod {namespace}/{name} was cancelled")]
    CycleCancelled { namespace: String, name: String },

    #[error("flush of scheduling result for {namespace}/{name} conflicted after {attempts} attempts")]
    FlushConflict {
        namespace: String,
        name: String,
        attempts: u32,
    },

    #[error("invalid scheduler configuration: {0}")]
    ConfigInvalid(String),

    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("cluster state error: {0}")]
    Cluster(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
