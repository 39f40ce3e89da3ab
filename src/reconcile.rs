use std::sync::Arc;

use tracing::{info, warn};

use crate::cluster::{ApplyOutcome, ClusterClient, DeleteOutcome};
use crate::config::ListenerConfig;
use crate::errors::ReconcileError;
use crate::manifest::{
    ManifestSpec, PredictorResources, inference_service_name,
    render_inference_service,
};
use crate::registry::{ModelRegistry, resolve_artifact_uri};

#[derive(Debug, Clone)]
pub struct Deployed {
    pub service_name: String,
    pub namespace: String,
    pub outcome: ApplyOutcome,
    pub uid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Undeployed {
    pub service_name: String,
    pub namespace: String,
    pub outcome: DeleteOutcome,
}

/// Shared deploy/undeploy primitives used by both the webhook handler and
/// the polling loop. Both operations are idempotent: re-deploying updates
/// the existing object and undeploying something absent succeeds.
pub struct Reconciler {
    registry: Arc<dyn ModelRegistry>,
    cluster: Arc<dyn ClusterClient>,
    artifacts_uri: Option<String>,
    resources: PredictorResources,
}

impl Reconciler {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        cluster: Arc<dyn ClusterClient>,
        cfg: &ListenerConfig,
    ) -> Self {
        Self {
            registry,
            cluster,
            artifacts_uri: cfg.artifacts_uri.clone(),
            resources: PredictorResources::from_config(cfg),
        }
    }

    /// Deploy one model version: resolve its artifacts, render the
    /// InferenceService manifest and apply it.
    pub async fn deploy(
        &self,
        model_name: &str,
        version: &str,
    ) -> Result<Deployed, ReconcileError> {
        let mv = self.registry.get_model_version(model_name, version).await?;
        let run = self.registry.get_run(&mv.run_id).await?;
        let storage_uri =
            resolve_artifact_uri(&mv.source, self.artifacts_uri.as_deref());
        let service_name = inference_service_name(model_name, version)?;
        let namespace = self.cluster.namespace().to_string();

        let manifest = render_inference_service(&ManifestSpec {
            name: &service_name,
            namespace: &namespace,
            model_name,
            model_version: version,
            storage_uri: &storage_uri,
            run_id: &mv.run_id,
            experiment_id: &run.experiment_id,
            resources: &self.resources,
        });

        let result = self
            .cluster
            .apply_inference_service(&service_name, &manifest)
            .await?;
        info!(
            model = model_name,
            version,
            service = %service_name,
            outcome = result.outcome.as_str(),
            "model deployed"
        );
        Ok(Deployed {
            service_name,
            namespace,
            outcome: result.outcome,
            uid: result.uid,
        })
    }

    /// Remove the InferenceService for a model version, by its derived name.
    pub async fn undeploy(
        &self,
        model_name: &str,
        version: &str,
    ) -> Result<Undeployed, ReconcileError> {
        let service_name = inference_service_name(model_name, version)?;
        self.undeploy_named(&service_name).await
    }

    /// Remove an InferenceService by its observed object name. The polling
    /// loop uses this so that objects whose name predates a naming change
    /// are still cleaned up.
    pub async fn undeploy_named(
        &self,
        service_name: &str,
    ) -> Result<Undeployed, ReconcileError> {
        let outcome = self
            .cluster
            .delete_inference_service(service_name)
            .await?;
        match outcome {
            DeleteOutcome::Deleted => {
                info!(service = service_name, "model undeployed")
            }
            DeleteOutcome::AlreadyAbsent => {
                warn!(service = service_name, "service already absent")
            }
        }
        Ok(Undeployed {
            service_name: service_name.to_string(),
            namespace: self.cluster.namespace().to_string(),
            outcome,
        })
    }
}
