use serde_json::{Value, json};
use thiserror::Error;

use crate::errors::ClusterError;

/// KServe InferenceService CRD coordinates.
pub const INFERENCE_SERVICE_GROUP: &str = "serving.kserve.io";
pub const INFERENCE_SERVICE_VERSION: &str = "v1beta1";
pub const INFERENCE_SERVICE_KIND: &str = "InferenceService";
pub const INFERENCE_SERVICE_PLURAL: &str = "inferenceservices";
pub const INFERENCE_SERVICE_API_VERSION: &str = "serving.kserve.io/v1beta1";

/// Ownership label distinguishing our objects from everything else in the
/// namespace; listings filter on it instead of any local store.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "mlflow-kserve-listener";
pub const MODEL_NAME_LABEL: &str = "mlflow.org/model-name";
pub const MODEL_VERSION_LABEL: &str = "mlflow.org/model-version";
pub const RUN_ID_LABEL: &str = "mlflow.org/run-id";
pub const EXPERIMENT_ID_ANNOTATION: &str = "mlflow.org/experiment-id";

pub const K8S_NAME_MAX_LENGTH: usize = 253;

pub fn managed_label_selector() -> String {
    format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}")
}

#[derive(Error, Debug)]
#[error("name {0:?} sanitizes to an empty string")]
pub struct NameError(pub String);

/// Sanitize a name into a DNS-subdomain-style Kubernetes resource name:
/// lowercase, `[a-z0-9-]` only, no leading/trailing/consecutive hyphens,
/// at most 253 characters. Applied everywhere a name is derived, including
/// user-supplied overrides.
pub fn sanitize_k8s_name(name: &str) -> Result<String, NameError> {
    let mut out = String::with_capacity(name.len());
    for ch in name.to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let mut result = out.trim_matches('-').to_string();
    if result.len() > K8S_NAME_MAX_LENGTH {
        result.truncate(K8S_NAME_MAX_LENGTH);
        while result.ends_with('-') {
            result.pop();
        }
    }
    if result.is_empty() {
        return Err(NameError(name.to_string()));
    }
    Ok(result)
}

/// Deterministic InferenceService name for a model version.
pub fn inference_service_name(
    model_name: &str,
    model_version: &str,
) -> Result<String, NameError> {
    sanitize_k8s_name(&format!("{model_name}-v{model_version}"))
}

#[derive(Debug, Clone)]
pub struct PredictorResources {
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
}

impl PredictorResources {
    pub fn from_config(cfg: &crate::config::ListenerConfig) -> Self {
        Self {
            cpu_request: cfg.predictor_cpu_request.clone(),
            cpu_limit: cfg.predictor_cpu_limit.clone(),
            memory_request: cfg.predictor_memory_request.clone(),
            memory_limit: cfg.predictor_memory_limit.clone(),
        }
    }
}

pub struct ManifestSpec<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub model_name: &'a str,
    pub model_version: &'a str,
    pub storage_uri: &'a str,
    pub run_id: &'a str,
    pub experiment_id: &'a str,
    pub resources: &'a PredictorResources,
}

/// Build the InferenceService manifest for one model version. Identifying
/// labels let the polling loop and the `/services` endpoint rediscover the
/// object later without a local database.
pub fn render_inference_service(spec: &ManifestSpec<'_>) -> Value {
    json!({
        "apiVersion": INFERENCE_SERVICE_API_VERSION,
        "kind": INFERENCE_SERVICE_KIND,
        "metadata": {
            "name": spec.name,
            "namespace": spec.namespace,
            "labels": {
                MANAGED_BY_LABEL: MANAGED_BY_VALUE,
                MODEL_NAME_LABEL: spec.model_name,
                MODEL_VERSION_LABEL: spec.model_version,
                RUN_ID_LABEL: spec.run_id,
            },
            "annotations": {
                EXPERIMENT_ID_ANNOTATION: spec.experiment_id,
            },
        },
        "spec": {
            "predictor": {
                "model": {
                    "modelFormat": { "name": "mlflow" },
                    "protocolVersion": "v2",
                    "storageUri": spec.storage_uri,
                    "resources": {
                        "requests": {
                            "cpu": spec.resources.cpu_request,
                            "memory": spec.resources.memory_request,
                        },
                        "limits": {
                            "cpu": spec.resources.cpu_limit,
                            "memory": spec.resources.memory_limit,
                        },
                    },
                },
            },
        },
    })
}

/// Refuse to issue a mutating call for anything that is not declared as an
/// InferenceService. A kind mismatch is a hard error, never coerced.
pub fn validate_kind(manifest: &Value) -> Result<(), ClusterError> {
    let kind = manifest
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if kind != INFERENCE_SERVICE_KIND {
        return Err(ClusterError::InvalidManifest(format!(
            "expected kind '{INFERENCE_SERVICE_KIND}', got '{kind}'"
        )));
    }
    Ok(())
}
