use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::cluster::ClusterClient;
use crate::config::ListenerConfig;
use crate::handler::EventProcessor;
use crate::polling::PollingService;
use crate::reconcile::Reconciler;
use crate::registry::{ModelRegistry, WEBHOOK_EVENTS};
use crate::server::{self, AppState};

const WEBHOOK_DESCRIPTION: &str =
    "Automatically deploy MLflow models to KServe based on tags";

/// Run an async operation with a per-attempt timeout and a bounded number
/// of retries. Used for startup calls against a tracking server that may
/// still be coming up.
pub async fn retry_with_timeout<T, E, F, Fut>(
    op_name: &str,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    mut op: F,
) -> anyhow::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = max_retries + 1;
    for attempt in 1..=attempts {
        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                warn!(
                    op = op_name,
                    attempt,
                    attempts,
                    error = %err,
                    "operation failed"
                );
            }
            Err(_) => {
                warn!(
                    op = op_name,
                    attempt,
                    attempts,
                    timeout_secs = timeout.as_secs(),
                    "operation timed out"
                );
            }
        }
        if attempt < attempts {
            tokio::time::sleep(retry_delay).await;
        }
    }
    anyhow::bail!("{op_name} failed after {attempts} attempts")
}

/// Register our webhook with the tracking server. Any stale registration at
/// the same URL is deleted first, since its stored secret may not match the
/// one this process verifies with. Returns whether registration succeeded.
pub async fn register_webhook(
    cfg: &ListenerConfig,
    registry: &Arc<dyn ModelRegistry>,
) -> bool {
    let timeout = Duration::from_secs(cfg.webhook_startup_timeout_secs);
    let retries = cfg.webhook_startup_retries;
    let delay = Duration::from_secs(2);

    let cleanup = retry_with_timeout(
        "delete stale webhooks",
        timeout,
        retries,
        delay,
        || registry.delete_webhook_by_url(&cfg.mlflow_webhook_url),
    )
    .await;
    if let Err(err) = cleanup {
        warn!(error = %err, "stale webhook cleanup failed, continuing");
    }

    let registered = retry_with_timeout(
        "register webhook",
        timeout,
        retries,
        delay,
        || {
            registry.ensure_webhook_registered(
                &cfg.mlflow_webhook_name,
                &cfg.mlflow_webhook_url,
                &WEBHOOK_EVENTS,
                cfg.webhook_secret(),
                WEBHOOK_DESCRIPTION,
            )
        },
    )
    .await;

    match registered {
        Ok(hook) => {
            info!(
                webhook_id = %hook.webhook_id,
                url = %cfg.mlflow_webhook_url,
                "webhook registration complete"
            );
            true
        }
        Err(err) => {
            error!(error = %err, "webhook registration failed");
            false
        }
    }
}

/// Wire everything together and run until shutdown: webhook registration,
/// the polling fallback when registration did not happen, and the HTTP
/// server.
pub async fn run_all(
    cfg: ListenerConfig,
    registry: Arc<dyn ModelRegistry>,
    cluster: Arc<dyn ClusterClient>,
) -> anyhow::Result<()> {
    let cfg = Arc::new(cfg);
    let reconciler =
        Arc::new(Reconciler::new(registry.clone(), cluster.clone(), &cfg));
    let processor = Arc::new(EventProcessor::new(reconciler.clone()));

    let webhook_registered = if cfg.disable_webhooks {
        info!("webhook registration disabled by configuration");
        false
    } else {
        register_webhook(&cfg, &registry).await
    };

    let polling = Arc::new(PollingService::new(
        registry.clone(),
        cluster.clone(),
        reconciler,
        Duration::from_secs(cfg.polling_interval_secs),
    ));
    if !webhook_registered {
        if cfg.enable_polling_fallback {
            info!("webhook delivery unavailable, starting polling fallback");
            polling.start().await;
        } else {
            error!(
                "webhook registration failed and polling fallback is \
                 disabled; tag changes will not be acted on"
            );
        }
    }

    let state = AppState {
        config: cfg.clone(),
        registry,
        cluster,
        processor,
    };
    let app = server::build_router(state);
    let addr: SocketAddr =
        format!("{}:{}", cfg.app_host, cfg.app_port).parse()?;

    let result = server::serve(addr, app, cfg.tls_paths()).await;
    polling.stop().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[tokio::test]
    async fn retry_succeeds_on_later_attempt() {
        let calls = AtomicU32::new(0);
        let result = retry_with_timeout(
            "test",
            Duration::from_secs(1),
            2,
            Duration::from_millis(1),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 { Err(Boom) } else { Ok(n) }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_all_attempts() {
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<u32> = retry_with_timeout(
            "test",
            Duration::from_secs(1),
            2,
            Duration::from_millis(1),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Boom) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_times_out_slow_attempts() {
        let result: anyhow::Result<()> = retry_with_timeout(
            "test",
            Duration::from_millis(10),
            0,
            Duration::from_millis(1),
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), Boom>(())
            },
        )
        .await;
        assert!(result.is_err());
    }
}
