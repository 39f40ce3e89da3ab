use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::cluster::ClusterClient;
use crate::config::ListenerConfig;
use crate::errors::ApiError;
use crate::events::{WebhookEnvelope, WebhookResponse};
use crate::handler::EventProcessor;
use crate::manifest::managed_label_selector;
use crate::registry::ModelRegistry;
use crate::signature::{verify_freshness, verify_signature};

pub const SIGNATURE_HEADER: &str = "x-mlflow-signature";
pub const DELIVERY_ID_HEADER: &str = "x-mlflow-delivery-id";
pub const TIMESTAMP_HEADER: &str = "x-mlflow-timestamp";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ListenerConfig>,
    pub registry: Arc<dyn ModelRegistry>,
    pub cluster: Arc<dyn ClusterClient>,
    pub processor: Arc<EventProcessor>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/health", get(health_check))
        .route("/health/detailed", get(health_detailed))
        .route("/services", get(list_services))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Webhook receiver. Verification happens against the raw body bytes,
/// before any JSON parsing; rejected deliveries never reach the handler.
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let (Some(signature), Some(delivery_id), Some(timestamp)) = (
        header(&headers, SIGNATURE_HEADER),
        header(&headers, DELIVERY_ID_HEADER),
        header(&headers, TIMESTAMP_HEADER),
    ) else {
        return Err(ApiError::BadRequest(format!(
            "Missing required headers: {SIGNATURE_HEADER}, \
             {DELIVERY_ID_HEADER}, {TIMESTAMP_HEADER}"
        )));
    };

    let payload = std::str::from_utf8(&body).map_err(|_| {
        ApiError::BadRequest("Request body is not valid UTF-8".into())
    })?;

    if !verify_freshness(timestamp, state.config.signature_max_age_secs) {
        warn!(delivery_id, "rejected delivery: stale or invalid timestamp");
        return Err(ApiError::Unauthorized(
            "Webhook timestamp is stale or invalid".into(),
        ));
    }
    if !verify_signature(
        payload,
        signature,
        state.config.webhook_secret(),
        delivery_id,
        timestamp,
    ) {
        warn!(delivery_id, "rejected delivery: bad signature");
        return Err(ApiError::Unauthorized(
            "Invalid webhook signature".into(),
        ));
    }

    let envelope: WebhookEnvelope =
        serde_json::from_str(payload).map_err(|e| {
            ApiError::BadRequest(format!("Invalid JSON payload: {e}"))
        })?;

    info!(
        delivery_id,
        entity = %envelope.entity,
        action = %envelope.action,
        "webhook delivery verified"
    );
    Ok(Json(state.processor.process(&envelope, delivery_id).await))
}

async fn health_check() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

/// Deep health check: probes both the MLflow API and the Kubernetes
/// apiserver. Reports "degraded" with per-dependency errors when either
/// probe fails.
async fn health_detailed(State(state): State<AppState>) -> Json<Value> {
    let mut details = serde_json::Map::new();
    let mut healthy = true;

    match state.registry.list_webhooks().await {
        Ok(webhooks) => {
            details.insert(
                "mlflow".into(),
                json!({
                    "tracking_uri": state.config.mlflow_tracking_uri,
                    "webhook_count": webhooks.len(),
                }),
            );
        }
        Err(err) => {
            healthy = false;
            details.insert("mlflow_error".into(), json!(err.to_string()));
        }
    }

    match state
        .cluster
        .list_inference_services(&managed_label_selector())
        .await
    {
        Ok(services) => {
            details.insert(
                "kubernetes".into(),
                json!({
                    "namespace": state.cluster.namespace(),
                    "in_cluster": state.config.kube_in_cluster,
                    "managed_services_count": services.len(),
                }),
            );
        }
        Err(err) => {
            healthy = false;
            details.insert("kubernetes_error".into(), json!(err.to_string()));
        }
    }

    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "details": details,
    }))
}

/// List the InferenceServices this listener manages, straight from the
/// cluster. There is no local store to go stale.
async fn list_services(
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let services = state
        .cluster
        .list_inference_services(&managed_label_selector())
        .await
        .map_err(|err| {
            error!(error = %err, "failed to list managed services");
            ApiError::InternalServerError(err.to_string())
        })?;

    let items: Vec<Value> = services
        .iter()
        .map(|svc| {
            json!({
                "name": svc.name,
                "namespace": svc.namespace,
                "model_name": svc.model_name(),
                "model_version": svc.model_version(),
                "run_id": svc.run_id(),
                "status": svc.ready_status(),
                "url": svc.url(),
                "creation_timestamp": svc.creation_timestamp,
            })
        })
        .collect();

    Ok(Json(json!({
        "total": items.len(),
        "namespace": state.cluster.namespace(),
        "services": items,
    })))
}

/// Serve the router, with TLS when a cert/key pair is configured.
pub async fn serve(
    addr: SocketAddr,
    app: Router,
    tls: Option<(&str, &str)>,
) -> anyhow::Result<()> {
    match tls {
        Some((cert, key)) => {
            let tls_config =
                axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                    .await?;
            info!(%addr, "listening with TLS");
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(%addr, "listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
