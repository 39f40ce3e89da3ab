use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cluster::ClusterClient;
use crate::manifest::managed_label_selector;
use crate::reconcile::Reconciler;
use crate::registry::ModelRegistry;

struct PollTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Periodic reconciliation against the registry, used when webhook
/// registration is unavailable. Each cycle compares the set of
/// deploy-tagged model versions with the set of managed InferenceServices
/// and deploys/undeploys the difference, so missed events are healed
/// within one interval.
pub struct PollingService {
    registry: Arc<dyn ModelRegistry>,
    cluster: Arc<dyn ClusterClient>,
    reconciler: Arc<Reconciler>,
    interval: Duration,
    state: Mutex<Option<PollTask>>,
}

impl PollingService {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        cluster: Arc<dyn ClusterClient>,
        reconciler: Arc<Reconciler>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            cluster,
            reconciler,
            interval,
            state: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if state.is_some() {
            warn!("polling service already running");
            return;
        }
        let cancel = CancellationToken::new();
        let mut worker = PollWorker {
            registry: self.registry.clone(),
            cluster: self.cluster.clone(),
            reconciler: self.reconciler.clone(),
            interval: self.interval,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(async move { worker.run().await });
        *state = Some(PollTask { handle, cancel });
        info!(interval_secs = self.interval.as_secs(), "polling started");
    }

    pub async fn stop(&self) {
        let task = self.state.lock().await.take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(err) = task.handle.await {
                warn!(error = %err, "polling task did not shut down cleanly");
            }
            info!("polling stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }
}

struct PollWorker {
    registry: Arc<dyn ModelRegistry>,
    cluster: Arc<dyn ClusterClient>,
    reconciler: Arc<Reconciler>,
    interval: Duration,
    cancel: CancellationToken,
}

impl PollWorker {
    async fn run(&mut self) {
        loop {
            if let Err(err) = self.poll_and_reconcile().await {
                error!(error = %err, "polling cycle failed");
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// One reconciliation cycle. Failures on individual items are logged
    /// and skipped so that one bad model does not block the rest.
    async fn poll_and_reconcile(&mut self) -> anyhow::Result<()> {
        let tagged = self.registry.list_deploy_tagged_versions().await?;
        let desired: HashSet<(String, String)> = tagged
            .iter()
            .map(|mv| (mv.name.clone(), mv.version.clone()))
            .collect();

        let managed = self
            .cluster
            .list_inference_services(&managed_label_selector())
            .await?;
        let mut current: HashSet<(String, String)> = HashSet::new();
        let mut service_names: HashMap<(String, String), String> =
            HashMap::new();
        for svc in &managed {
            let (Some(name), Some(version)) =
                (svc.model_name(), svc.model_version())
            else {
                warn!(service = %svc.name, "managed service missing model labels");
                continue;
            };
            let key = (name.to_string(), version.to_string());
            service_names.insert(key.clone(), svc.name.clone());
            current.insert(key);
        }

        debug!(
            desired = desired.len(),
            current = current.len(),
            "polling cycle"
        );

        for (name, version) in desired.difference(&current) {
            info!(model = %name, version = %version, "poll: deploying missing service");
            if let Err(err) = self.reconciler.deploy(name, version).await {
                error!(
                    model = %name,
                    version = %version,
                    error = %err,
                    "poll: deploy failed"
                );
            }
        }

        for key in current.difference(&desired) {
            // Delete by the observed object name, not a re-derived one.
            let Some(service_name) = service_names.get(key) else {
                continue;
            };
            info!(
                model = %key.0,
                version = %key.1,
                service = %service_name,
                "poll: undeploying unwanted service"
            );
            if let Err(err) =
                self.reconciler.undeploy_named(service_name).await
            {
                error!(
                    service = %service_name,
                    error = %err,
                    "poll: undeploy failed"
                );
            }
        }

        Ok(())
    }
}
