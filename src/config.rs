use base64::{Engine, engine::general_purpose::STANDARD};
use envconfig::Envconfig;
use rand::RngCore;
use tracing::warn;

/// Application settings, loaded from `MLFLOW_KSERVE_*` environment variables.
#[derive(Envconfig, Clone, Debug)]
pub struct ListenerConfig {
    #[envconfig(from = "MLFLOW_KSERVE_APP_HOST", default = "0.0.0.0")]
    pub app_host: String,

    #[envconfig(from = "MLFLOW_KSERVE_APP_PORT", default = "8000")]
    pub app_port: u16,

    /// MLflow tracking server URI (required).
    #[envconfig(from = "MLFLOW_KSERVE_MLFLOW_TRACKING_URI")]
    pub mlflow_tracking_uri: String,

    /// Shared secret for webhook signature verification. Auto-generated when
    /// absent or empty; note that MLflow must then be re-registered with the
    /// new secret, which startup does.
    #[envconfig(from = "MLFLOW_KSERVE_MLFLOW_WEBHOOK_SECRET")]
    pub mlflow_webhook_secret: Option<String>,

    /// Publicly reachable callback URL used for webhook self-registration
    /// (required).
    #[envconfig(from = "MLFLOW_KSERVE_MLFLOW_WEBHOOK_URL")]
    pub mlflow_webhook_url: String,

    #[envconfig(
        from = "MLFLOW_KSERVE_MLFLOW_WEBHOOK_NAME",
        default = "mlflow-kserve-listener"
    )]
    pub mlflow_webhook_name: String,

    /// Namespace that managed InferenceServices are created in.
    #[envconfig(
        from = "MLFLOW_KSERVE_KUBE_NAMESPACE",
        default = "kserve-mlflow-models"
    )]
    pub kube_namespace: String,

    #[envconfig(from = "MLFLOW_KSERVE_KUBE_IN_CLUSTER", default = "true")]
    pub kube_in_cluster: bool,

    /// Base URI that `mlflow-artifacts:` source URIs are resolved against
    /// (e.g. "gs://bucket/mlflow"). When unset, such URIs pass through as-is.
    #[envconfig(from = "MLFLOW_KSERVE_ARTIFACTS_URI")]
    pub artifacts_uri: Option<String>,

    /// Per-attempt timeout for startup webhook registration calls.
    #[envconfig(from = "MLFLOW_KSERVE_WEBHOOK_STARTUP_TIMEOUT", default = "30")]
    pub webhook_startup_timeout_secs: u64,

    #[envconfig(from = "MLFLOW_KSERVE_WEBHOOK_STARTUP_RETRIES", default = "2")]
    pub webhook_startup_retries: u32,

    #[envconfig(from = "MLFLOW_KSERVE_POLLING_INTERVAL", default = "60")]
    pub polling_interval_secs: u64,

    /// Skip webhook registration entirely and rely on polling only.
    #[envconfig(from = "MLFLOW_KSERVE_DISABLE_WEBHOOKS", default = "false")]
    pub disable_webhooks: bool,

    #[envconfig(
        from = "MLFLOW_KSERVE_ENABLE_POLLING_FALLBACK",
        default = "true"
    )]
    pub enable_polling_fallback: bool,

    /// Maximum accepted age of the `x-mlflow-timestamp` header, in seconds.
    #[envconfig(from = "MLFLOW_KSERVE_SIGNATURE_MAX_AGE", default = "300")]
    pub signature_max_age_secs: u64,

    /// Timeout for individual MLflow API requests.
    #[envconfig(from = "MLFLOW_KSERVE_REQUEST_TIMEOUT", default = "30")]
    pub request_timeout_secs: u64,

    #[envconfig(from = "MLFLOW_KSERVE_PREDICTOR_CPU_REQUEST", default = "100m")]
    pub predictor_cpu_request: String,

    #[envconfig(from = "MLFLOW_KSERVE_PREDICTOR_CPU_LIMIT", default = "1")]
    pub predictor_cpu_limit: String,

    #[envconfig(
        from = "MLFLOW_KSERVE_PREDICTOR_MEMORY_REQUEST",
        default = "512Mi"
    )]
    pub predictor_memory_request: String,

    #[envconfig(
        from = "MLFLOW_KSERVE_PREDICTOR_MEMORY_LIMIT",
        default = "2Gi"
    )]
    pub predictor_memory_limit: String,

    #[envconfig(from = "MLFLOW_KSERVE_SSL_CERTFILE")]
    pub ssl_certfile: Option<String>,

    #[envconfig(from = "MLFLOW_KSERVE_SSL_KEYFILE")]
    pub ssl_keyfile: Option<String>,

    #[envconfig(from = "MLFLOW_KSERVE_LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl ListenerConfig {
    /// Load configuration from environment variables. Fails when a required
    /// setting is missing; the process must not start without one.
    pub fn load_from_env() -> anyhow::Result<Self> {
        Ok(Self::init_from_env()?.ensure_secret())
    }

    /// Fill in a freshly generated webhook secret when none was provided.
    /// An empty string counts as not provided.
    pub fn ensure_secret(mut self) -> Self {
        let missing = self
            .mlflow_webhook_secret
            .as_deref()
            .map(str::is_empty)
            .unwrap_or(true);
        if missing {
            warn!(
                "MLFLOW_KSERVE_MLFLOW_WEBHOOK_SECRET not set; \
                 generating a random secret for this process"
            );
            self.mlflow_webhook_secret = Some(generate_webhook_secret());
        }
        self
    }

    pub fn webhook_secret(&self) -> &str {
        self.mlflow_webhook_secret.as_deref().unwrap_or_default()
    }

    /// TLS cert/key pair when both paths are configured.
    pub fn tls_paths(&self) -> Option<(&str, &str)> {
        match (self.ssl_certfile.as_deref(), self.ssl_keyfile.as_deref()) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }
}

/// 256 bits of randomness, base64-encoded.
pub fn generate_webhook_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}
