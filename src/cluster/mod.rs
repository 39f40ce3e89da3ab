use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ClusterError;
use crate::manifest::{
    MODEL_NAME_LABEL, MODEL_VERSION_LABEL, RUN_ID_LABEL,
};

pub mod kube;

pub use kube::KubeCluster;

/// Result of an idempotent apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Created => "created",
            ApplyOutcome::Updated => "updated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub outcome: ApplyOutcome,
    pub uid: Option<String>,
}

/// Result of an idempotent delete. Deleting something that is already gone
/// is a success, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

/// Projection of a managed InferenceService object, enough for status
/// endpoints and the polling diff.
#[derive(Debug, Clone)]
pub struct ManagedService {
    pub name: String,
    pub namespace: String,
    pub uid: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub creation_timestamp: Option<String>,
    pub status: Value,
}

impl ManagedService {
    pub fn model_name(&self) -> Option<&str> {
        self.labels.get(MODEL_NAME_LABEL).map(String::as_str)
    }

    pub fn model_version(&self) -> Option<&str> {
        self.labels.get(MODEL_VERSION_LABEL).map(String::as_str)
    }

    pub fn run_id(&self) -> Option<&str> {
        self.labels.get(RUN_ID_LABEL).map(String::as_str)
    }

    /// Human-facing readiness derived from the `Ready` condition.
    pub fn ready_status(&self) -> &'static str {
        let conditions = self.status.get("conditions").and_then(Value::as_array);
        let Some(conditions) = conditions else {
            return "Unknown";
        };
        for condition in conditions {
            if condition.get("type").and_then(Value::as_str) == Some("Ready") {
                return match condition.get("status").and_then(Value::as_str) {
                    Some("True") => "Ready",
                    Some("False") => "Not Ready",
                    _ => "Unknown",
                };
            }
        }
        "Unknown"
    }

    pub fn url(&self) -> Option<&str> {
        self.status.get("url").and_then(Value::as_str)
    }
}

/// Namespaced access to InferenceService objects. Implemented against the
/// real apiserver by [`KubeCluster`]; tests substitute an in-memory fake.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_inference_service(
        &self,
        name: &str,
    ) -> Result<Option<ManagedService>, ClusterError>;

    /// Create or update the named InferenceService from a full manifest.
    async fn apply_inference_service(
        &self,
        name: &str,
        manifest: &Value,
    ) -> Result<ApplyResult, ClusterError>;

    async fn delete_inference_service(
        &self,
        name: &str,
    ) -> Result<DeleteOutcome, ClusterError>;

    async fn list_inference_services(
        &self,
        label_selector: &str,
    ) -> Result<Vec<ManagedService>, ClusterError>;

    fn namespace(&self) -> &str;
}
