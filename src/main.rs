use std::sync::Arc;
use std::time::Duration;

use mlflow_kserve_listener::cluster::{ClusterClient, KubeCluster};
use mlflow_kserve_listener::config::ListenerConfig;
use mlflow_kserve_listener::registry::{MlflowRegistry, ModelRegistry};
use mlflow_kserve_listener::{init_tracing, runtime};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cfg = ListenerConfig::load_from_env()?;
    init_tracing(&cfg.log_level);
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::aws_lc_rs::default_provider(),
    ) {
        tracing::debug!("crypto provider already installed: {e:?}");
    }

    info!(
        tracking_uri = %cfg.mlflow_tracking_uri,
        namespace = %cfg.kube_namespace,
        "starting mlflow-kserve-listener"
    );

    let registry: Arc<dyn ModelRegistry> = Arc::new(MlflowRegistry::new(
        &cfg.mlflow_tracking_uri,
        Duration::from_secs(cfg.request_timeout_secs),
    )?);
    let cluster: Arc<dyn ClusterClient> = Arc::new(
        KubeCluster::new(&cfg.kube_namespace, cfg.kube_in_cluster).await?,
    );

    runtime::run_all(cfg, registry, cluster).await
}
