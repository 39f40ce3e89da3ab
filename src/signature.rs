use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "v1,";
pub const DEFAULT_MAX_AGE_SECS: u64 = 300;

/// Verify the HMAC signature of an MLflow webhook delivery.
///
/// The signed content is `delivery_id.timestamp.payload` where `payload` is
/// the raw request body text; re-serializing the JSON would change the byte
/// layout and break verification. The comparison is constant-time via
/// [`Mac::verify_slice`]. Malformed input never errors, it just fails the
/// check.
pub fn verify_signature(
    payload: &str,
    signature: &str,
    secret: &str,
    delivery_id: &str,
    timestamp: &str,
) -> bool {
    let Some(signature_b64) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        warn!(delivery_id, "invalid signature format: missing 'v1,' prefix");
        return false;
    };
    let Ok(received) = STANDARD.decode(signature_b64) else {
        warn!(delivery_id, "signature is not valid base64");
        return false;
    };

    let signed_content = format!("{delivery_id}.{timestamp}.{payload}");
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed_content.as_bytes());

    match mac.verify_slice(&received) {
        Ok(()) => {
            debug!(delivery_id, "signature verification successful");
            true
        }
        Err(_) => {
            warn!(
                delivery_id,
                "signature verification failed: signature mismatch"
            );
            false
        }
    }
}

/// Produce the `v1,`-prefixed signature header value for a payload. Used by
/// MLflow on the sending side; kept here so tests and local tooling can forge
/// valid deliveries.
pub fn sign_payload(
    payload: &str,
    secret: &str,
    delivery_id: &str,
    timestamp: &str,
) -> String {
    let signed_content = format!("{delivery_id}.{timestamp}.{payload}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(signed_content.as_bytes());
    let digest = mac.finalize().into_bytes();
    format!("{SIGNATURE_PREFIX}{}", STANDARD.encode(digest))
}

/// Check that a webhook timestamp (decimal Unix seconds) is recent enough to
/// rule out replays. Future timestamps fail as well; non-integer input fails
/// closed.
pub fn verify_freshness(timestamp: &str, max_age_secs: u64) -> bool {
    let Ok(webhook_ts) = timestamp.trim().parse::<i64>() else {
        warn!(timestamp, "invalid webhook timestamp format");
        return false;
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let age = now - webhook_ts;

    if age < 0 {
        warn!(age, "webhook timestamp is in the future");
        return false;
    }
    if age as u64 > max_age_secs {
        warn!(age, max_age_secs, "webhook timestamp is too old");
        return false;
    }
    true
}
