use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::errors::RegistryError;

use super::{
    DEPLOY_TAG, ModelRegistry, ModelVersion, RunInfo, WebhookInfo,
};

/// REST client for the MLflow tracking server (API 2.0).
#[derive(Clone)]
pub struct MlflowRegistry {
    base_url: String,
    http: reqwest::Client,
}

impl MlflowRegistry {
    pub fn new(
        tracking_uri: &str,
        request_timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            base_url: tracking_uri.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{path}", self.base_url)
    }

    /// Turn a non-2xx response into an error, mapping 404 through
    /// `not_found` so callers get a domain error instead of a raw status.
    async fn check<F>(
        response: reqwest::Response,
        not_found: F,
    ) -> Result<reqwest::Response, RegistryError>
    where
        F: FnOnce() -> RegistryError,
    {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(not_found());
        }
        let message = response.text().await.unwrap_or_default();
        Err(RegistryError::Api { status, message })
    }

    async fn search_registered_model_names(
        &self,
    ) -> Result<Vec<String>, RegistryError> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(self.api("registered-models/search"))
                .query(&[("max_results", "100")]);
            if let Some(token) = &page_token {
                request = request.query(&[("page_token", token)]);
            }
            let response = Self::check(request.send().await?, || {
                RegistryError::Api {
                    status: StatusCode::NOT_FOUND,
                    message: "registered-models/search".into(),
                }
            })
            .await?;
            let body: SearchRegisteredModelsResponse = response.json().await?;
            names.extend(
                body.registered_models.into_iter().map(|m| m.name),
            );
            match body.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(names)
    }

    async fn search_model_versions(
        &self,
        model_name: &str,
    ) -> Result<Vec<ModelVersion>, RegistryError> {
        let filter = format!("name='{model_name}'");
        let response = self
            .http
            .get(self.api("model-versions/search"))
            .query(&[("filter", filter.as_str()), ("max_results", "200")])
            .send()
            .await?;
        let response = Self::check(response, || RegistryError::Api {
            status: StatusCode::NOT_FOUND,
            message: format!("model-versions/search for {model_name}"),
        })
        .await?;
        let body: SearchModelVersionsResponse = response.json().await?;
        Ok(body
            .model_versions
            .into_iter()
            .map(WireModelVersion::into_model_version)
            .collect())
    }
}

#[async_trait]
impl ModelRegistry for MlflowRegistry {
    async fn get_model_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ModelVersion, RegistryError> {
        let response = self
            .http
            .get(self.api("model-versions/get"))
            .query(&[("name", name), ("version", version)])
            .send()
            .await?;
        let response = Self::check(response, || {
            RegistryError::ModelVersionNotFound {
                name: name.to_string(),
                version: version.to_string(),
            }
        })
        .await?;
        let body: ModelVersionResponse = response.json().await?;
        Ok(body.model_version.into_model_version())
    }

    async fn get_run(&self, run_id: &str) -> Result<RunInfo, RegistryError> {
        let response = self
            .http
            .get(self.api("runs/get"))
            .query(&[("run_id", run_id)])
            .send()
            .await?;
        let response = Self::check(response, || {
            RegistryError::RunNotFound(run_id.to_string())
        })
        .await?;
        let body: RunResponse = response.json().await?;
        Ok(body.run.info.into_run_info())
    }

    async fn list_deploy_tagged_versions(
        &self,
    ) -> Result<Vec<ModelVersion>, RegistryError> {
        let mut tagged = Vec::new();
        for name in self.search_registered_model_names().await? {
            // One broken model must not sink the whole polling cycle.
            let versions = match self.search_model_versions(&name).await {
                Ok(versions) => versions,
                Err(err) => {
                    warn!(model = %name, error = %err,
                        "failed to list model versions, skipping model");
                    continue;
                }
            };
            tagged.extend(versions.into_iter().filter(|v| {
                v.tags.get(DEPLOY_TAG).map(String::as_str) == Some("true")
            }));
        }
        debug!(count = tagged.len(), "deploy-tagged versions in registry");
        Ok(tagged)
    }

    async fn list_webhooks(&self) -> Result<Vec<WebhookInfo>, RegistryError> {
        let response = self
            .http
            .get(self.api("webhooks"))
            .send()
            .await?;
        let response = Self::check(response, || RegistryError::Api {
            status: StatusCode::NOT_FOUND,
            message: "webhooks list".into(),
        })
        .await?;
        let body: ListWebhooksResponse = response.json().await?;
        Ok(body.webhooks)
    }

    async fn create_webhook(
        &self,
        name: &str,
        url: &str,
        events: &[&str],
        secret: &str,
        description: &str,
    ) -> Result<WebhookInfo, RegistryError> {
        let events: Vec<_> = events
            .iter()
            .filter_map(|spec| spec.split_once('.'))
            .map(|(entity, action)| json!({"entity": entity, "action": action}))
            .collect();
        let response = self
            .http
            .post(self.api("webhooks"))
            .json(&json!({
                "name": name,
                "url": url,
                "events": events,
                "secret": secret,
                "description": description,
            }))
            .send()
            .await?;
        let response = Self::check(response, || RegistryError::Api {
            status: StatusCode::NOT_FOUND,
            message: "webhooks create".into(),
        })
        .await?;
        let body: CreateWebhookResponse = response.json().await?;
        Ok(body.webhook)
    }

    async fn delete_webhook(
        &self,
        webhook_id: &str,
    ) -> Result<(), RegistryError> {
        let response = self
            .http
            .delete(self.api(&format!("webhooks/{webhook_id}")))
            .send()
            .await?;
        Self::check(response, || RegistryError::Api {
            status: StatusCode::NOT_FOUND,
            message: format!("webhook {webhook_id} not found"),
        })
        .await?;
        Ok(())
    }
}

// Wire shapes for the MLflow REST API. Tags come as key/value pair arrays
// and are flattened into maps here.

#[derive(Deserialize)]
struct WireTag {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
struct WireModelVersion {
    name: String,
    version: String,
    #[serde(default)]
    run_id: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    tags: Vec<WireTag>,
}

impl WireModelVersion {
    fn into_model_version(self) -> ModelVersion {
        let tags: BTreeMap<String, String> = self
            .tags
            .into_iter()
            .map(|t| (t.key, t.value.unwrap_or_default()))
            .collect();
        ModelVersion {
            name: self.name,
            version: self.version,
            run_id: self.run_id,
            source: self.source,
            status: self.status,
            tags,
        }
    }
}

#[derive(Deserialize)]
struct ModelVersionResponse {
    model_version: WireModelVersion,
}

#[derive(Deserialize)]
struct WireRunInfo {
    run_id: String,
    experiment_id: String,
    #[serde(default)]
    artifact_uri: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl WireRunInfo {
    fn into_run_info(self) -> RunInfo {
        RunInfo {
            run_id: self.run_id,
            experiment_id: self.experiment_id,
            artifact_uri: self.artifact_uri,
            status: self.status,
        }
    }
}

#[derive(Deserialize)]
struct WireRun {
    info: WireRunInfo,
}

#[derive(Deserialize)]
struct RunResponse {
    run: WireRun,
}

#[derive(Deserialize)]
struct WireRegisteredModel {
    name: String,
}

#[derive(Deserialize)]
struct SearchRegisteredModelsResponse {
    #[serde(default)]
    registered_models: Vec<WireRegisteredModel>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct SearchModelVersionsResponse {
    #[serde(default)]
    model_versions: Vec<WireModelVersion>,
}

#[derive(Deserialize)]
struct ListWebhooksResponse {
    #[serde(default)]
    webhooks: Vec<WebhookInfo>,
}

#[derive(Deserialize)]
struct CreateWebhookResponse {
    webhook: WebhookInfo,
}
