use std::sync::Arc;

use tracing::{error, info, warn};

use crate::cluster::DeleteOutcome;
use crate::events::{
    EventOutcome, TagEventData, WebhookEnvelope, WebhookEvent, WebhookResponse,
};
use crate::reconcile::Reconciler;
use crate::registry::DEPLOY_TAG;

/// What a tag event asks us to do.
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentDecision {
    Deploy,
    Undeploy,
    Ignore(String),
}

/// Map a tag mutation to a deployment decision. Only the `deploy` key is
/// acted on; deleting the tag undeploys regardless of its previous value,
/// and any set value other than "true"/"false" is ignored.
pub fn decide(
    tag_key: &str,
    tag_value: Option<&str>,
    deleted: bool,
) -> DeploymentDecision {
    if tag_key != DEPLOY_TAG {
        return DeploymentDecision::Ignore(format!(
            "Tag key '{tag_key}' is not '{DEPLOY_TAG}'"
        ));
    }
    if deleted {
        return DeploymentDecision::Undeploy;
    }
    match tag_value {
        Some("true") => DeploymentDecision::Deploy,
        Some("false") => DeploymentDecision::Undeploy,
        other => DeploymentDecision::Ignore(format!(
            "Deploy tag value '{}' is not 'true' or 'false'",
            other.unwrap_or_default()
        )),
    }
}

/// Routes verified webhook deliveries to the reconciler.
pub struct EventProcessor {
    reconciler: Arc<Reconciler>,
}

impl EventProcessor {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    /// Handle one verified delivery. Always produces a response body;
    /// handler failures are encoded in it rather than bubbled up as HTTP
    /// errors.
    pub async fn process(
        &self,
        envelope: &WebhookEnvelope,
        delivery_id: &str,
    ) -> WebhookResponse {
        let event = match WebhookEvent::classify(envelope) {
            Ok(event) => event,
            Err(err) => {
                warn!(delivery_id, error = %err, "malformed event data");
                return WebhookResponse::error(
                    envelope,
                    delivery_id,
                    format!("Malformed event data: {err}"),
                );
            }
        };

        match event {
            WebhookEvent::TagSet(data) => {
                let outcome = self.handle_tag_event(&data, false).await;
                WebhookResponse::handled(envelope, delivery_id, outcome)
            }
            WebhookEvent::TagDeleted(data) => {
                let outcome = self.handle_tag_event(&data, true).await;
                WebhookResponse::handled(envelope, delivery_id, outcome)
            }
            WebhookEvent::Unknown { entity, action } => {
                warn!(
                    delivery_id,
                    entity, action, "unhandled event type, acknowledging"
                );
                WebhookResponse::unhandled(envelope, delivery_id)
            }
        }
    }

    async fn handle_tag_event(
        &self,
        data: &TagEventData,
        deleted: bool,
    ) -> EventOutcome {
        let decision = decide(&data.key, data.value.as_deref(), deleted);
        info!(
            model = %data.name,
            version = %data.version,
            key = %data.key,
            deleted,
            decision = ?decision,
            "tag event"
        );
        match decision {
            DeploymentDecision::Deploy => {
                match self.reconciler.deploy(&data.name, &data.version).await {
                    Ok(deployed) => EventOutcome::Deployed {
                        model_name: data.name.clone(),
                        version: data.version.clone(),
                        service_name: deployed.service_name,
                        namespace: deployed.namespace,
                        status: Some(deployed.outcome.as_str().to_string()),
                        uid: deployed.uid,
                    },
                    Err(err) => {
                        error!(
                            model = %data.name,
                            version = %data.version,
                            error = %err,
                            "deploy failed"
                        );
                        EventOutcome::Error {
                            message: err.to_string(),
                            model_name: Some(data.name.clone()),
                            version: Some(data.version.clone()),
                        }
                    }
                }
            }
            DeploymentDecision::Undeploy => {
                match self
                    .reconciler
                    .undeploy(&data.name, &data.version)
                    .await
                {
                    Ok(undeployed) => EventOutcome::Undeployed {
                        model_name: data.name.clone(),
                        version: data.version.clone(),
                        service_name: undeployed.service_name,
                        namespace: undeployed.namespace,
                        note: match undeployed.outcome {
                            DeleteOutcome::Deleted => None,
                            DeleteOutcome::AlreadyAbsent => {
                                Some("already absent".to_string())
                            }
                        },
                    },
                    Err(err) => {
                        error!(
                            model = %data.name,
                            version = %data.version,
                            error = %err,
                            "undeploy failed"
                        );
                        EventOutcome::Error {
                            message: err.to_string(),
                            model_name: Some(data.name.clone()),
                            version: Some(data.version.clone()),
                        }
                    }
                }
            }
            DeploymentDecision::Ignore(reason) => EventOutcome::Ignored {
                reason,
                model_name: data.name.clone(),
                version: data.version.clone(),
            },
        }
    }
}
