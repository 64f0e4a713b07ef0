use std::collections::BinaryHeap;
use std::sync::Arc;

use log::{error, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio::time::{Duration, Instant};

use common::{NodeInfo, PodInfo};

use crate::cache::{Cache, PodNameWithPriority};
use crate::cluster_state::ClusterState;
use crate::config::{self, KubeSchedulerConfiguration, Profile};
use crate::error::Result;
use crate::framework::Framework;
use crate::plugins::Registry;
use crate::plugins::node_resources_fit::ScoringStrategy;
use crate::result_store::ResultStore;

/// Outcome of a single scheduling cycle, handed back to the caller through
/// the channel returned by `Scheduler::start`.
#[derive(Debug)]
pub struct Assignment {
    pub namespace: String,
    pub pod_name: String,
    pub node_name: String,
}

type ActiveQueue = Arc<Mutex<BinaryHeap<PodNameWithPriority>>>;
type BackoffQueue = Arc<Mutex<BinaryHeap<BackOffPod>>>;
type UnschedulableQueue = Arc<Mutex<Vec<(BackOffPod, Instant)>>>;

#[derive(Eq, PartialEq)]
pub struct BackOffPod {
    pub pod: PodNameWithPriority,
    pub expire: Instant,
}

impl Ord for BackOffPod {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse: the soonest-to-expire pod should be the binary heap's max.
        other.expire.cmp(&self.expire)
    }
}

impl PartialOrd for BackOffPod {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct SchedulingQueue {
    active_queue: ActiveQueue,
    backoff_queue: BackoffQueue,
    unschedulable_queue: UnschedulableQueue,
    status_count: Mutex<watch::Receiver<usize>>,
    status_sx: watch::Sender<usize>,
}

impl Default for SchedulingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingQueue {
    pub fn new() -> Self {
        let (sx, rx) = watch::channel(0);
        Self {
            active_queue: Arc::new(Mutex::new(BinaryHeap::new())),
            backoff_queue: Arc::new(Mutex::new(BinaryHeap::new())),
            unschedulable_queue: Arc::new(Mutex::new(Vec::new())),
            status_count: Mutex::new(rx),
            status_sx: sx,
        }
    }

    async fn move_all_to_active_or_backoff(&self) {
        let now = Instant::now();
        let mut active_guard = self.active_queue.lock().await;
        let mut backoff_guard = self.backoff_queue.lock().await;
        self.unschedulable_queue
            .lock()
            .await
            .drain(..)
            .for_each(|p| {
                if p.0.expire <= now {
                    active_guard.push(p.0.pod);
                } else {
                    backoff_guard.push(p.0);
                }
            });
        self.add_count().await;
    }

    async fn next_pod(&self) -> PodNameWithPriority {
        let mut next = self.active_queue.lock().await.pop();
        while next.is_none() {
            let mut status_guard = self.status_count.lock().await;
            status_guard
                .changed()
                .await
                .expect("status_sx closed for unknown reason");
            next = self.active_queue.lock().await.pop();
        }
        next.unwrap()
    }

    async fn flush_backoff_completed(
        active: ActiveQueue,
        backoff: BackoffQueue,
        sx: watch::Sender<usize>,
    ) {
        let now = Instant::now();
        let mut active_guard = active.lock().await;
        let mut backoff_guard = backoff.lock().await;
        while !backoff_guard.is_empty() && backoff_guard.peek().unwrap().expire <= now {
            let pod = backoff_guard.pop().unwrap();
            active_guard.push(pod.pod);
        }
        sx.send_modify(|v| (*v) += 1);
    }

    async fn flush_unschedulable_left_over(
        active: ActiveQueue,
        backoff: BackoffQueue,
        unschedulable: UnschedulableQueue,
        sx: watch::Sender<usize>,
    ) {
        let now = Instant::now();
        let mut active_guard = active.lock().await;
        let mut backoff_guard = backoff.lock().await;
        let mut unschedulable_guard = unschedulable.lock().await;
        unschedulable_guard.drain(..).for_each(|(p, t)| {
            if now - t > Duration::from_secs(5 * 60) {
                if now >= p.expire {
                    active_guard.push(p.pod);
                } else {
                    backoff_guard.push(p);
                }
            }
        });
        sx.send_modify(|v| (*v) += 1);
    }

    fn run(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let active_queue = self.active_queue.clone();
        let backoff_queue = self.backoff_queue.clone();
        let status_sx = self.status_sx.clone();
        handles.push(tokio::spawn(async move {
            let mut timer = interval(Duration::from_secs(1));
            loop {
                Self::flush_backoff_completed(
                    active_queue.clone(),
                    backoff_queue.clone(),
                    status_sx.clone(),
                )
                .await;
                timer.tick().await;
            }
        }));

        let active_queue = self.active_queue.clone();
        let backoff_queue = self.backoff_queue.clone();
        let unschedulable_queue = self.unschedulable_queue.clone();
        let status_sx = self.status_sx.clone();
        handles.push(tokio::spawn(async move {
            let mut timer = interval(Duration::from_secs(30));
            loop {
                Self::flush_unschedulable_left_over(
                    active_queue.clone(),
                    backoff_queue.clone(),
                    unschedulable_queue.clone(),
                    status_sx.clone(),
                )
                .await;
                timer.tick().await;
            }
        }));

        handles
    }

    async fn add_count(&self) {
        self.status_sx.send_modify(|v| *v += 1);
    }

    async fn push(&self, priority: u64, namespace: String, name: String) {
        let mut guard = self.active_queue.lock().await;
        guard.push((priority, namespace, name));
        self.add_count().await;
    }

    async fn push_backoff(&self, priority: u64, namespace: String, name: String, attempts: usize) {
        let expire = Instant::now() + Duration::from_secs(2_u64.pow(attempts.min(8) as u32));
        let backoff_pod = BackOffPod {
            pod: (priority, namespace, name),
            expire,
        };
        if attempts > 8 {
            let mut guard = self.unschedulable_queue.lock().await;
            guard.push((backoff_pod, Instant::now()));
        } else {
            let mut guard = self.backoff_queue.lock().await;
            guard.push(backoff_pod);
        }
    }
}

/// Scheduler lifecycle (C3): owns the cache, queue, plugin registry and
/// scheduling-result store, and runs the §4.2 pipeline in a background task.
pub struct Scheduler {
    cache: Arc<RwLock<Cache>>,
    queue: Arc<SchedulingQueue>,
    cluster: Arc<dyn ClusterState>,
    registry: Registry,
    store: Arc<ResultStore>,
    framework: Arc<RwLock<Option<Arc<Framework>>>>,
    current_profile: Arc<RwLock<Option<Profile>>>,
    cancel: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(simulator_id: impl Into<String>, cluster: Arc<dyn ClusterState>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            cache: Arc::new(RwLock::new(Cache::new())),
            queue: Arc::new(SchedulingQueue::new()),
            cluster,
            registry: Registry::default(),
            store: Arc::new(ResultStore::new(simulator_id)),
            framework: Arc::new(RwLock::new(None)),
            current_profile: Arc::new(RwLock::new(None)),
            cancel,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The deep-copied profile most recently passed to `start`/`restart`,
    /// for read-back by callers.
    pub async fn current_profile(&self) -> Option<Profile> {
        self.current_profile.read().await.clone()
    }

    pub async fn start(
        &self,
        config: KubeSchedulerConfiguration,
    ) -> Result<UnboundedReceiver<Result<Assignment>>> {
        let effective = config::convert(&config)?;
        let profile = effective
            .profiles
            .into_iter()
            .next()
            .expect("convert always yields at least one profile");

        let enabled = config::build_enabled_plugins(&self.registry, &profile, self.store.clone())?;
        let framework = Arc::new(Framework::new(enabled, ScoringStrategy::default()));
        *self.framework.write().await = Some(framework.clone());
        *self.current_profile.write().await = Some(profile);

        self.cancel.send_replace(false);
        let mut cancel_rx = self.cancel.subscribe();

        let mut handles = self.queue.run();

        // Subscribed before the scheduling loop starts, so no early binding
        // event can be missed by the observer that flushes C4's results.
        let mut pod_events = self.cluster.subscribe_pods();
        let observer_store = self.store.clone();
        let observer_cluster = self.cluster.clone();
        handles.push(tokio::spawn(async move {
            loop {
                match pod_events.recv().await {
                    Ok(event) => {
                        let Some(pod) = event.after else { continue };
                        if pod.scheduled.is_none() {
                            continue;
                        }
                        if let Err(e) = observer_store
                            .flush(&pod.namespace, &pod.name, observer_cluster.as_ref())
                            .await
                        {
                            warn!(
                                "failed to flush scheduling result for {}/{}: {e}",
                                pod.namespace, pod.name
                            );
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("scheduling-result observer lagged by {n} pod events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));

        let (sx, rx) = unbounded_channel();
        let cache = self.cache.clone();
        let queue = self.queue.clone();
        let cluster = self.cluster.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_rx.changed() => {
                        if *cancel_rx.borrow() {
                            break;
                        }
                    }
                    (priority, namespace, name) = queue.next_pod() => {
                        Self::schedule_one(
                            &cache,
                            &queue,
                            &framework,
                            &cluster,
                            priority,
                            namespace,
                            name,
                            &sx,
                        )
                        .await;
                    }
                }
            }
        }));

        *self.tasks.lock().await = handles;
        Ok(rx)
    }

    async fn schedule_one(
        cache: &Arc<RwLock<Cache>>,
        queue: &Arc<SchedulingQueue>,
        framework: &Arc<Framework>,
        cluster: &Arc<dyn ClusterState>,
        priority: u64,
        namespace: String,
        name: String,
        sx: &UnboundedSender<Result<Assignment>>,
    ) {
        let pod = {
            let guard = cache.read().await;
            guard.get_pod(&namespace, &name)
        };
        let Some(pod) = pod else { return };
        if pod.spec.priority != priority {
            // Superseded by a newer update to the same pod.
            return;
        }

        let nodes = cache.read().await.get_nodes();
        match framework.run_cycle(&pod, nodes) {
            Ok(Some(node_name)) => {
                let assigned = {
                    let mut guard = cache.write().await;
                    guard.assign(&namespace, &name, &node_name)
                };
                if !assigned {
                    return;
                }
                let mut bound = pod;
                bound.scheduled = Some(node_name.clone());
                // The scheduling-result store's flush is driven by the
                // pod-update-event observer spawned in `start`, not from here.
                if let Err(e) = cluster.update_pod(bound).await {
                    warn!("failed to record binding for {namespace}/{name} on {node_name}: {e}");
                }
                let _ = sx.send(Ok(Assignment {
                    namespace,
                    pod_name: name,
                    node_name,
                }));
            }
            Ok(None) => {
                let attempts = {
                    let mut guard = cache.write().await;
                    guard.add_fail(&namespace, &name);
                    guard
                        .get_pod(&namespace, &name)
                        .map(|p| p.queued_info.attempts)
                        .unwrap_or(0)
                };
                queue.push_backoff(priority, namespace, name, attempts).await;
            }
            Err(e) => {
                error!("scheduling cycle for {namespace}/{name} errored: {e}");
                let _ = sx.send(Err(e));
                queue.push_backoff(priority, namespace, name, 0).await;
            }
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.cancel.send(true);
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Restart is Shutdown followed by Start; the old background loop is
    /// guaranteed to have fully exited before the new one begins, so no
    /// in-flight cycle of the old generation can write to the store after
    /// the new scheduler has started.
    pub async fn restart(
        &self,
        config: KubeSchedulerConfiguration,
    ) -> Result<UnboundedReceiver<Result<Assignment>>> {
        self.shutdown().await;
        self.start(config).await
    }

    pub async fn update_cache_pod(&self, mut pod: PodInfo) {
        if let Some(profile) = self.current_profile.read().await.as_ref() {
            config::stamp_pod_annotations(profile, &mut pod);
        }

        let namespace = pod.namespace.clone();
        let name = pod.name.clone();
        let priority = pod.spec.priority;
        let enqueueable = match self.framework.read().await.as_ref() {
            Some(framework) => framework.is_enqueueable(&pod),
            None => true,
        };
        let was_scheduled = {
            let mut guard = self.cache.write().await;
            guard
                .update_pod(pod.clone())
                .map(|old| old.scheduled.is_some())
        };
        if pod.scheduled.is_none() && was_scheduled != Some(true) && enqueueable {
            self.queue.push(priority, namespace, name).await;
        }
    }

    pub async fn remove_cache_pod(&self, namespace: &str, name: &str) {
        let mut guard = self.cache.write().await;
        guard.remove_pod(namespace, name);
    }

    pub async fn add_cache_node(&self, node: NodeInfo) {
        let mut guard = self.cache.write().await;
        guard.update_node(node);
        drop(guard);
        self.queue.move_all_to_active_or_backoff().await;
    }

    pub async fn remove_cache_node(&self, node_name: &str) {
        let mut guard = self.cache.write().await;
        let displaced = guard.pop_pod_on_node(node_name);
        for (priority, namespace, name) in displaced {
            self.queue.push(priority, namespace, name).await;
        }
        guard.remove_node(node_name);
        drop(guard);
        self.queue.move_all_to_active_or_backoff().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_state::InMemoryClusterState;
    use common::{PodSpec, ResourcesRequirements};
    use serial_test::serial;
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
    async fn queue_pops_highest_priority_first() {
        let queue = SchedulingQueue::new();
        queue.push(1, "default".into(), "pod1".into()).await;
        queue.push(3, "default".into(), "pod3".into()).await;
        queue.push(2, "default".into(), "pod2".into()).await;
        assert_eq!(queue.next_pod().await, (3, "default".to_string(), "pod3".to_string()));
        assert_eq!(queue.next_pod().await, (2, "default".to_string(), "pod2".to_string()));
        assert_eq!(queue.next_pod().await, (1, "default".to_string(), "pod1".to_string()));
    }

    #[tokio::test]
    async fn next_pod_waits_for_a_push() {
        let queue = Arc::new(SchedulingQueue::new());
        let (sx, mut rx) = unbounded_channel();
        let cloned = queue.clone();
        tokio::spawn(async move {
            sx.send(cloned.next_pod().await).unwrap();
        });
        queue.push(1, "default".into(), "pod1".into()).await;
        let res = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(res, (1, "default".to_string(), "pod1".to_string()));
    }

    #[tokio::test]
    #[serial]
    async fn scheduler_assigns_pod_to_only_feasible_node() {
        let cluster = Arc::new(InMemoryClusterState::new());
        let scheduler = Scheduler::new("sim1", cluster.clone());
        scheduler.add_cache_node(make_node("node-sim1", 2, 10)).await;
        scheduler.add_cache_node(make_node("tiny-sim1", 1, 1)).await;

        let mut rx = scheduler.start(KubeSchedulerConfiguration::default()).await.unwrap();

        let pod = make_pod("default", "pod", 1, 2, 4);
        cluster.apply_pod(pod.clone()).await.unwrap();
        scheduler.update_cache_pod(pod).await;

        let assignment = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("schedule_one should assign within timeout");
        assert!(assignment.is_none() || assignment.unwrap().is_ok());

        scheduler.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn restart_replaces_the_running_loop() {
        let cluster = Arc::new(InMemoryClusterState::new());
        let scheduler = Scheduler::new("sim1", cluster.clone());
        scheduler.start(KubeSchedulerConfiguration::default()).await.unwrap();
        scheduler
            .restart(KubeSchedulerConfiguration::default())
            .await
            .unwrap();
        assert!(scheduler.current_profile().await.is_some());
        scheduler.shutdown().await;
    }
}
