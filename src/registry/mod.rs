use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::RegistryError;

pub mod mlflow;

pub use mlflow::MlflowRegistry;

/// Tag key that drives deployment.
pub const DEPLOY_TAG: &str = "deploy";

/// Entity.action pairs the listener subscribes to when registering its
/// webhook.
pub const WEBHOOK_EVENTS: [&str; 2] =
    ["model_version_tag.set", "model_version_tag.deleted"];

/// One version of a registered model, as reported by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: String,
    pub run_id: String,
    /// Artifact source URI, possibly in the registry-proxied
    /// `mlflow-artifacts:` scheme.
    pub source: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub experiment_id: String,
    #[serde(default)]
    pub artifact_uri: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookInfo {
    pub webhook_id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Read/write access to an MLflow-style model registry. The trait seam keeps
/// handlers and the polling loop testable without a live tracking server.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn get_model_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ModelVersion, RegistryError>;

    async fn get_run(&self, run_id: &str) -> Result<RunInfo, RegistryError>;

    /// All model versions across the registry whose `deploy` tag is `"true"`.
    async fn list_deploy_tagged_versions(
        &self,
    ) -> Result<Vec<ModelVersion>, RegistryError>;

    async fn list_webhooks(&self) -> Result<Vec<WebhookInfo>, RegistryError>;

    async fn create_webhook(
        &self,
        name: &str,
        url: &str,
        events: &[&str],
        secret: &str,
        description: &str,
    ) -> Result<WebhookInfo, RegistryError>;

    async fn delete_webhook(
        &self,
        webhook_id: &str,
    ) -> Result<(), RegistryError>;

    /// Delete every registered webhook pointing at `url`. Used at startup to
    /// clear stale registrations whose secret no longer matches ours.
    async fn delete_webhook_by_url(
        &self,
        url: &str,
    ) -> Result<usize, RegistryError> {
        let mut deleted = 0;
        for hook in self.list_webhooks().await? {
            if hook.url == url {
                info!(
                    webhook_id = %hook.webhook_id,
                    url,
                    "deleting stale webhook registration"
                );
                self.delete_webhook(&hook.webhook_id).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Register our webhook unless one with the same name and URL already
    /// exists. Returns the active registration.
    async fn ensure_webhook_registered(
        &self,
        name: &str,
        url: &str,
        events: &[&str],
        secret: &str,
        description: &str,
    ) -> Result<WebhookInfo, RegistryError> {
        for hook in self.list_webhooks().await? {
            if hook.name == name && hook.url == url {
                info!(
                    webhook_id = %hook.webhook_id,
                    name,
                    url,
                    "webhook already registered"
                );
                return Ok(hook);
            }
        }
        let hook = self
            .create_webhook(name, url, events, secret, description)
            .await?;
        info!(webhook_id = %hook.webhook_id, name, url, "webhook registered");
        Ok(hook)
    }
}

/// Resolve a model version source URI to a storage URI KServe can fetch.
///
/// The registry reports proxied artifacts as `mlflow-artifacts://...` (or the
/// single-slash form); those are only resolvable through the tracking server
/// itself, so the configured artifacts base URI is substituted for the
/// scheme. Everything else (s3://, gs://, file paths) passes through
/// unchanged.
pub fn resolve_artifact_uri(source: &str, base: Option<&str>) -> String {
    let suffix = source
        .strip_prefix("mlflow-artifacts://")
        .or_else(|| source.strip_prefix("mlflow-artifacts:/"));

    let Some(suffix) = suffix else {
        return source.to_string();
    };

    match base {
        Some(base) if !base.trim().is_empty() => {
            let base = base.trim_end_matches('/');
            let suffix = suffix.trim_start_matches('/');
            format!("{base}/{suffix}")
        }
        _ => {
            warn!(
                source,
                "mlflow-artifacts URI with no artifacts base configured; \
                 the model server will likely fail to fetch it"
            );
            source.to_string()
        }
    }
}
