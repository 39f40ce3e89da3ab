use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("MLflow API returned {status}: {message}")]
    Api {
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("model version {name} v{version} not found")]
    ModelVersionNotFound { name: String, version: String },

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("failed to initialize Kubernetes client: {0}")]
    Init(String),
}

/// Errors surfaced by the shared deploy/undeploy primitives.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("naming error: {0}")]
    Name(#[from] crate::manifest::NameError),
}

/// HTTP-facing errors. Business-logic failures during event handling are
/// reported inside a 200 body instead (see `events::WebhookResponse`); this
/// type only covers request rejection and truly unexpected failures.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use axum::{Json, http::StatusCode};
        use serde_json::json;

        let (status, error_message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::InternalServerError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
