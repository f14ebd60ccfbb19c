use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::health::Readiness;
use crate::queue::DispatchQueue;
use crate::reconciler::{Action, Reconciler};
use crate::store::ObjectStore;
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;
use stresswatch_core::{GroupVersionKind, ResourceEvent, ResourceKey, WatchEventType};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Watches Pods and activates their paused chaos experiments.
///
/// Pod keys reach the dispatch queue from store events (when a receiver is
/// supplied) and from a periodic full resync; `workers` tasks drain it.
pub struct ChaosController {
    store: Arc<dyn ObjectStore>,
    reconciler: Arc<Reconciler>,
    queue: Arc<DispatchQueue<ResourceKey>>,
    config: ControllerConfig,
    readiness: Readiness,
}

impl ChaosController {
    pub fn new(store: Arc<dyn ObjectStore>, config: ControllerConfig) -> Result<Self> {
        config.validate()?;
        let queue = Arc::new(DispatchQueue::new(
            config.requeue_base_delay(),
            config.requeue_max_delay(),
        ));
        Ok(Self {
            reconciler: Arc::new(Reconciler::new(store.clone(), &config)),
            store,
            queue,
            config,
            readiness: Readiness::new(),
        })
    }

    /// Readiness flag, set while the workers are running
    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    pub fn queue(&self) -> Arc<DispatchQueue<ResourceKey>> {
        self.queue.clone()
    }

    /// Run until `token` is cancelled
    pub async fn run(
        &self,
        mut events: Option<broadcast::Receiver<ResourceEvent>>,
        token: CancellationToken,
    ) -> Result<()> {
        info!(
            "Starting chaos controller ({} workers, resync every {:?})",
            self.config.workers,
            self.config.resync_interval()
        );

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            let worker = Worker {
                id,
                queue: self.queue.clone(),
                reconciler: self.reconciler.clone(),
                timeout: self.config.reconcile_timeout(),
                token: token.clone(),
            };
            workers.spawn(worker.run());
        }
        self.readiness.set_ready(true);

        // The first tick fires immediately and performs the initial list
        let mut resync = tokio::time::interval(self.config.resync_interval());

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Chaos controller shutting down");
                    break;
                }
                _ = resync.tick() => self.resync(None, &token).await,
                event = next_event(&mut events) => match event {
                    Ok(event) => self.handle_event(event, &token).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} store events, resyncing", skipped);
                        self.resync(None, &token).await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("Store event stream closed, relying on periodic resync");
                        events = None;
                    }
                },
            }
        }

        self.readiness.set_ready(false);
        self.queue.shutdown();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Reconcile worker panicked: {}", e);
            }
        }
        info!("Chaos controller stopped");
        Ok(())
    }

    /// Enqueue every Pod, or every Pod in `namespace`
    async fn resync(&self, namespace: Option<&str>, token: &CancellationToken) {
        match self.list_pods(namespace, token).await {
            Ok(pods) => {
                debug!("Resync enqueueing {} pods", pods.len());
                for pod in &pods {
                    if let (Some(ns), Some(name)) = (&pod.metadata.namespace, &pod.metadata.name) {
                        if !self.config.is_excluded(ns) {
                            self.queue.add(ResourceKey::pod(ns, name));
                        }
                    }
                }
            }
            Err(ControllerError::Cancelled) => {}
            Err(e) => error!("Pod resync failed: {}", e),
        }
    }

    /// List Pods, bounded by the reconcile timeout and abandoned on shutdown
    async fn list_pods(
        &self,
        namespace: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Vec<Pod>> {
        let timeout = self.config.reconcile_timeout();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ControllerError::Cancelled),
            listed = tokio::time::timeout(timeout, self.store.list_pods(namespace)) => {
                listed.map_err(|_| {
                    ControllerError::api_request_failed(format!(
                        "listing pods timed out after {:?}",
                        timeout
                    ))
                })?
            }
        }
    }

    async fn handle_event(&self, event: ResourceEvent, token: &CancellationToken) {
        let key = event.resource_key;
        if self.config.is_excluded(&key.namespace) {
            return;
        }

        if event.gvk == GroupVersionKind::pod() {
            if !matches!(event.event_type, WatchEventType::Deleted) {
                self.queue.add(key);
            }
        } else if event.gvk == GroupVersionKind::network_chaos()
            && matches!(
                event.event_type,
                WatchEventType::Added | WatchEventType::Modified
            )
        {
            // A fault resource may be provisioned after its Pod is running
            debug!("{} changed, re-enqueueing pods in {}", key, key.namespace);
            self.resync(Some(&key.namespace), token).await;
        }
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<ResourceEvent>>,
) -> std::result::Result<ResourceEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

struct Worker {
    id: usize,
    queue: Arc<DispatchQueue<ResourceKey>>,
    reconciler: Arc<Reconciler>,
    timeout: std::time::Duration,
    token: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!("Reconcile worker {} started", self.id);
        while let Some(key) = self.queue.next().await {
            self.process(&key).await;
            self.queue.done(&key);
        }
        debug!("Reconcile worker {} stopped", self.id);
    }

    async fn process(&self, key: &ResourceKey) {
        let deadline = Instant::now() + self.timeout;

        match self.reconciler.reconcile(key, deadline, &self.token).await {
            Ok(Action::Activated(report)) => {
                info!(
                    "Reconciled {}: activated {}, already active {}, pod marked: {}",
                    key,
                    report.activated.len(),
                    report.already_active.len(),
                    report.pod_marked
                );
                self.queue.forget(key);
            }
            Ok(Action::Skipped(reason)) => {
                debug!("Reconciled {}: skipped ({})", key, reason);
                self.queue.forget(key);
            }
            Err(e) if e.is_retryable() => {
                let delay = self.queue.requeue_with_backoff(key.clone());
                warn!("Reconcile of {} failed, retrying in {:?}: {}", key, delay, e);
            }
            Err(e) => {
                if !matches!(e, ControllerError::Cancelled) {
                    error!("Reconcile of {} failed permanently: {}", key, e);
                }
                self.queue.forget(key);
            }
        }
    }
}
