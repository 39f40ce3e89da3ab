use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch,
    PatchParams, PostParams,
};
use kube::core::GroupVersionKind;
use kube::{Client, Config};
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::ClusterError;
use crate::manifest::{
    INFERENCE_SERVICE_GROUP, INFERENCE_SERVICE_KIND, INFERENCE_SERVICE_PLURAL,
    INFERENCE_SERVICE_VERSION, validate_kind,
};

use super::{
    ApplyOutcome, ApplyResult, ClusterClient, DeleteOutcome, ManagedService,
};

/// InferenceService access through the Kubernetes apiserver. The CRD has no
/// typed binding here, so objects go over the wire as [`DynamicObject`]s
/// addressed by group/version/kind.
pub struct KubeCluster {
    client: Client,
    namespace: String,
    resource: ApiResource,
}

impl KubeCluster {
    pub async fn new(
        namespace: &str,
        in_cluster: bool,
    ) -> Result<Self, ClusterError> {
        let config = if in_cluster {
            Config::incluster()
                .map_err(|e| ClusterError::Init(e.to_string()))?
        } else {
            Config::infer()
                .await
                .map_err(|e| ClusterError::Init(e.to_string()))?
        };
        let client = Client::try_from(config)?;
        let gvk = GroupVersionKind::gvk(
            INFERENCE_SERVICE_GROUP,
            INFERENCE_SERVICE_VERSION,
            INFERENCE_SERVICE_KIND,
        );
        let resource =
            ApiResource::from_gvk_with_plural(&gvk, INFERENCE_SERVICE_PLURAL);
        Ok(Self {
            client,
            namespace: namespace.to_string(),
            resource,
        })
    }

    fn api(&self) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            &self.namespace,
            &self.resource,
        )
    }

    fn to_managed(&self, obj: DynamicObject) -> ManagedService {
        let status = obj
            .data
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);
        ManagedService {
            name: obj.metadata.name.clone().unwrap_or_default(),
            namespace: obj
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| self.namespace.clone()),
            uid: obj.metadata.uid.clone(),
            labels: obj
                .metadata
                .labels
                .clone()
                .unwrap_or_default()
                .into_iter()
                .collect(),
            creation_timestamp: obj
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0.to_rfc3339()),
            status,
        }
    }
}

fn is_api_code(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == code)
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get_inference_service(
        &self,
        name: &str,
    ) -> Result<Option<ManagedService>, ClusterError> {
        let obj = self.api().get_opt(name).await?;
        Ok(obj.map(|o| self.to_managed(o)))
    }

    async fn apply_inference_service(
        &self,
        name: &str,
        manifest: &Value,
    ) -> Result<ApplyResult, ClusterError> {
        validate_kind(manifest)?;
        let api = self.api();

        if api.get_opt(name).await?.is_some() {
            let patched = api
                .patch(
                    name,
                    &PatchParams::default(),
                    &Patch::Merge(manifest),
                )
                .await?;
            info!(name, namespace = %self.namespace, "inference service updated");
            return Ok(ApplyResult {
                outcome: ApplyOutcome::Updated,
                uid: patched.metadata.uid,
            });
        }

        let object: DynamicObject = serde_json::from_value(manifest.clone())
            .map_err(|e| ClusterError::InvalidManifest(e.to_string()))?;
        match api.create(&PostParams::default(), &object).await {
            Ok(created) => {
                info!(name, namespace = %self.namespace, "inference service created");
                Ok(ApplyResult {
                    outcome: ApplyOutcome::Created,
                    uid: created.metadata.uid,
                })
            }
            // Lost a create race; fall back to updating the winner.
            Err(err) if is_api_code(&err, 409) => {
                let patched = api
                    .patch(
                        name,
                        &PatchParams::default(),
                        &Patch::Merge(manifest),
                    )
                    .await?;
                info!(name, namespace = %self.namespace,
                    "inference service updated after create conflict");
                Ok(ApplyResult {
                    outcome: ApplyOutcome::Updated,
                    uid: patched.metadata.uid,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_inference_service(
        &self,
        name: &str,
    ) -> Result<DeleteOutcome, ClusterError> {
        match self.api().delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(name, namespace = %self.namespace, "inference service deleted");
                Ok(DeleteOutcome::Deleted)
            }
            Err(err) if is_api_code(&err, 404) => {
                debug!(name, "inference service already absent");
                Ok(DeleteOutcome::AlreadyAbsent)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list_inference_services(
        &self,
        label_selector: &str,
    ) -> Result<Vec<ManagedService>, ClusterError> {
        let params = ListParams::default().labels(label_selector);
        let list = self.api().list(&params).await?;
        Ok(list.items.into_iter().map(|o| self.to_managed(o)).collect())
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }
}
