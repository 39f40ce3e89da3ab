#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use mlflow_kserve_listener::cluster::{
    ApplyOutcome, ApplyResult, ClusterClient, DeleteOutcome, ManagedService,
};
use mlflow_kserve_listener::config::ListenerConfig;
use mlflow_kserve_listener::errors::{ClusterError, RegistryError};
use mlflow_kserve_listener::registry::{
    ModelRegistry, ModelVersion, RunInfo, WebhookInfo,
};

pub const TEST_SECRET: &str = "test-secret";
pub const TEST_NAMESPACE: &str = "kserve-mlflow-models";

pub fn test_config() -> ListenerConfig {
    ListenerConfig {
        app_host: "127.0.0.1".into(),
        app_port: 0,
        mlflow_tracking_uri: "http://mlflow.test:5000".into(),
        mlflow_webhook_secret: Some(TEST_SECRET.into()),
        mlflow_webhook_url: "http://listener.test:8000/webhook".into(),
        mlflow_webhook_name: "mlflow-kserve-listener".into(),
        kube_namespace: TEST_NAMESPACE.into(),
        kube_in_cluster: false,
        artifacts_uri: None,
        webhook_startup_timeout_secs: 1,
        webhook_startup_retries: 0,
        polling_interval_secs: 3600,
        disable_webhooks: false,
        enable_polling_fallback: true,
        signature_max_age_secs: 300,
        request_timeout_secs: 5,
        predictor_cpu_request: "100m".into(),
        predictor_cpu_limit: "1".into(),
        predictor_memory_request: "512Mi".into(),
        predictor_memory_limit: "2Gi".into(),
        ssl_certfile: None,
        ssl_keyfile: None,
        log_level: "info".into(),
    }
}

pub fn model_version(
    name: &str,
    version: &str,
    tags: &[(&str, &str)],
) -> ModelVersion {
    ModelVersion {
        name: name.into(),
        version: version.into(),
        run_id: format!("run-{name}-{version}"),
        source: format!("s3://models/{name}/{version}"),
        status: Some("READY".into()),
        tags: tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

/// In-memory registry fake. Fails every call when `fail_all` is set.
#[derive(Default)]
pub struct MockRegistry {
    pub model_versions: Mutex<HashMap<(String, String), ModelVersion>>,
    pub runs: Mutex<HashMap<String, RunInfo>>,
    pub webhooks: Mutex<Vec<WebhookInfo>>,
    pub fail_all: AtomicBool,
}

impl MockRegistry {
    pub fn with_model(self, mv: ModelVersion) -> Self {
        let run = RunInfo {
            run_id: mv.run_id.clone(),
            experiment_id: "1".into(),
            artifact_uri: Some(mv.source.clone()),
            status: Some("FINISHED".into()),
        };
        self.runs.lock().unwrap().insert(mv.run_id.clone(), run);
        self.model_versions
            .lock()
            .unwrap()
            .insert((mv.name.clone(), mv.version.clone()), mv);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    fn check_failure(&self) -> Result<(), RegistryError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(RegistryError::Api {
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                message: "registry unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ModelRegistry for MockRegistry {
    async fn get_model_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ModelVersion, RegistryError> {
        self.check_failure()?;
        self.model_versions
            .lock()
            .unwrap()
            .get(&(name.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::ModelVersionNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    async fn get_run(&self, run_id: &str) -> Result<RunInfo, RegistryError> {
        self.check_failure()?;
        self.runs
            .lock()
            .unwrap()
            .get(run_id)
            .cloned()
            .ok_or_else(|| RegistryError::RunNotFound(run_id.to_string()))
    }

    async fn list_deploy_tagged_versions(
        &self,
    ) -> Result<Vec<ModelVersion>, RegistryError> {
        self.check_failure()?;
        Ok(self
            .model_versions
            .lock()
            .unwrap()
            .values()
            .filter(|mv| {
                mv.tags.get("deploy").map(String::as_str) == Some("true")
            })
            .cloned()
            .collect())
    }

    async fn list_webhooks(&self) -> Result<Vec<WebhookInfo>, RegistryError> {
        self.check_failure()?;
        Ok(self.webhooks.lock().unwrap().clone())
    }

    async fn create_webhook(
        &self,
        name: &str,
        url: &str,
        events: &[&str],
        _secret: &str,
        _description: &str,
    ) -> Result<WebhookInfo, RegistryError> {
        self.check_failure()?;
        let mut webhooks = self.webhooks.lock().unwrap();
        let hook = WebhookInfo {
            webhook_id: format!("wh-{}", webhooks.len() + 1),
            name: name.into(),
            url: url.into(),
            events: events.iter().map(|e| e.to_string()).collect(),
            status: Some("ACTIVE".into()),
        };
        webhooks.push(hook.clone());
        Ok(hook)
    }

    async fn delete_webhook(
        &self,
        webhook_id: &str,
    ) -> Result<(), RegistryError> {
        self.check_failure()?;
        self.webhooks
            .lock()
            .unwrap()
            .retain(|h| h.webhook_id != webhook_id);
        Ok(())
    }
}

/// In-memory cluster fake. Records every mutating call in `ops` as
/// "apply:NAME" / "delete:NAME" so tests can assert on exactly what was
/// touched.
pub struct MockCluster {
    pub namespace: String,
    pub services: Mutex<HashMap<String, ManagedService>>,
    pub ops: Mutex<Vec<String>>,
    pub fail_all: AtomicBool,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self {
            namespace: TEST_NAMESPACE.into(),
            services: Mutex::new(HashMap::new()),
            ops: Mutex::new(Vec::new()),
            fail_all: AtomicBool::new(false),
        }
    }
}

impl MockCluster {
    pub fn with_service(self, svc: ManagedService) -> Self {
        self.services
            .lock()
            .unwrap()
            .insert(svc.name.clone(), svc);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    pub fn recorded_ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<_> =
            self.services.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    fn check_failure(&self) -> Result<(), ClusterError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(ClusterError::Init("cluster unavailable".into()));
        }
        Ok(())
    }

    fn manifest_to_service(&self, name: &str, manifest: &Value) -> ManagedService {
        let labels: BTreeMap<String, String> = manifest["metadata"]["labels"]
            .as_object()
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| {
                        v.as_str().map(|v| (k.clone(), v.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        ManagedService {
            name: name.to_string(),
            namespace: self.namespace.clone(),
            uid: Some(format!("uid-{name}")),
            labels,
            creation_timestamp: Some("2026-01-01T00:00:00+00:00".into()),
            status: Value::Null,
        }
    }
}

pub fn managed_service(
    name: &str,
    model_name: &str,
    model_version: &str,
) -> ManagedService {
    ManagedService {
        name: name.into(),
        namespace: TEST_NAMESPACE.into(),
        uid: Some(format!("uid-{name}")),
        labels: BTreeMap::from([
            (
                "app.kubernetes.io/managed-by".to_string(),
                "mlflow-kserve-listener".to_string(),
            ),
            ("mlflow.org/model-name".to_string(), model_name.to_string()),
            (
                "mlflow.org/model-version".to_string(),
                model_version.to_string(),
            ),
        ]),
        creation_timestamp: Some("2026-01-01T00:00:00+00:00".into()),
        status: Value::Null,
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn get_inference_service(
        &self,
        name: &str,
    ) -> Result<Option<ManagedService>, ClusterError> {
        self.check_failure()?;
        Ok(self.services.lock().unwrap().get(name).cloned())
    }

    async fn apply_inference_service(
        &self,
        name: &str,
        manifest: &Value,
    ) -> Result<ApplyResult, ClusterError> {
        self.check_failure()?;
        self.ops.lock().unwrap().push(format!("apply:{name}"));
        let svc = self.manifest_to_service(name, manifest);
        let existed = self
            .services
            .lock()
            .unwrap()
            .insert(name.to_string(), svc)
            .is_some();
        Ok(ApplyResult {
            outcome: if existed {
                ApplyOutcome::Updated
            } else {
                ApplyOutcome::Created
            },
            uid: Some(format!("uid-{name}")),
        })
    }

    async fn delete_inference_service(
        &self,
        name: &str,
    ) -> Result<DeleteOutcome, ClusterError> {
        self.check_failure()?;
        self.ops.lock().unwrap().push(format!("delete:{name}"));
        let removed = self.services.lock().unwrap().remove(name).is_some();
        Ok(if removed {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::AlreadyAbsent
        })
    }

    async fn list_inference_services(
        &self,
        label_selector: &str,
    ) -> Result<Vec<ManagedService>, ClusterError> {
        self.check_failure()?;
        let (key, value) = label_selector
            .split_once('=')
            .unwrap_or((label_selector, ""));
        Ok(self
            .services
            .lock()
            .unwrap()
            .values()
            .filter(|svc| {
                svc.labels.get(key).map(String::as_str) == Some(value)
            })
            .cloned()
            .collect())
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }
}
