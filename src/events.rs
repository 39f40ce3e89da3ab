use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One inbound webhook delivery body, as sent by the MLflow registry.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub entity: String,
    pub action: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub data: Value,
}

/// Payload of a `model_version_tag` event. `value` is present for `set`
/// events and absent for `deleted` events.
#[derive(Debug, Clone, Deserialize)]
pub struct TagEventData {
    pub name: String,
    pub version: String,
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Event variants the listener understands, resolved from `(entity, action)`.
/// Anything else maps to `Unknown`, which is handled as a forward-compatible
/// no-op rather than an error: the registry's event catalog may grow without
/// breaking this receiver.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    TagSet(TagEventData),
    TagDeleted(TagEventData),
    Unknown { entity: String, action: String },
}

impl WebhookEvent {
    pub fn classify(
        envelope: &WebhookEnvelope,
    ) -> Result<Self, serde_json::Error> {
        match (envelope.entity.as_str(), envelope.action.as_str()) {
            ("model_version_tag", "set") => Ok(Self::TagSet(
                serde_json::from_value(envelope.data.clone())?,
            )),
            ("model_version_tag", "deleted") => Ok(Self::TagDeleted(
                serde_json::from_value(envelope.data.clone())?,
            )),
            (entity, action) => Ok(Self::Unknown {
                entity: entity.to_string(),
                action: action.to_string(),
            }),
        }
    }
}

/// What the tag handler did with an event. Serialized as the
/// `handler_result` field of the webhook response body.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EventOutcome {
    Deployed {
        model_name: String,
        version: String,
        service_name: String,
        namespace: String,
        /// "created" or "updated", from the underlying cluster operation.
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        uid: Option<String>,
    },
    Undeployed {
        model_name: String,
        version: String,
        service_name: String,
        namespace: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Ignored {
        reason: String,
        model_name: String,
        version: String,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        model_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
}

/// Body returned for every verified webhook delivery. Always served with
/// HTTP 200: handler failures are encoded here rather than as 5xx so the
/// registry does not retry operations that are idempotent anyway.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub status: String,
    pub entity: String,
    pub action: String,
    pub delivery_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler_result: Option<EventOutcome>,
}

impl WebhookResponse {
    pub fn handled(
        envelope: &WebhookEnvelope,
        delivery_id: &str,
        outcome: EventOutcome,
    ) -> Self {
        Self {
            status: "success".into(),
            entity: envelope.entity.clone(),
            action: envelope.action.clone(),
            delivery_id: delivery_id.to_string(),
            message: None,
            handler_result: Some(outcome),
        }
    }

    pub fn unhandled(envelope: &WebhookEnvelope, delivery_id: &str) -> Self {
        Self {
            status: "success".into(),
            entity: envelope.entity.clone(),
            action: envelope.action.clone(),
            delivery_id: delivery_id.to_string(),
            message: Some(format!(
                "Event {}.{} received but not handled",
                envelope.entity, envelope.action
            )),
            handler_result: None,
        }
    }

    pub fn error(
        envelope: &WebhookEnvelope,
        delivery_id: &str,
        message: String,
    ) -> Self {
        Self {
            status: "error".into(),
            entity: envelope.entity.clone(),
            action: envelope.action.clone(),
            delivery_id: delivery_id.to_string(),
            message: Some(message),
            handler_result: None,
        }
    }
}
