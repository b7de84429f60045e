use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// A verified, parsed webhook delivery.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub id: String,
    pub event_type: String,
    /// The `data.object` the event describes, e.g. a payment intent.
    pub object: Value,
    pub payload: Value,
}

/// Verify a `Stripe-Signature` style header (`t=<ts>,v1=<hex hmac>`) against
/// the raw body and parse the envelope. The HMAC is computed over
/// `"{t}.{body}"`; the timestamp must be within `tolerance_secs` of now.
pub fn verify_and_parse(
    signature_header: &str,
    payload: &Bytes,
    secret: &str,
    tolerance_secs: u64,
) -> Result<ProviderEvent, ServiceError> {
    let mut ts = "";
    let mut v1 = "";
    for part in signature_header.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("t"), Some(val)) => ts = val,
            (Some("v1"), Some(val)) => v1 = val,
            _ => {}
        }
    }
    if ts.is_empty() || v1.is_empty() {
        return Err(ServiceError::Unauthorized(
            "Malformed webhook signature header".to_string(),
        ));
    }

    let ts_i: i64 = ts
        .parse()
        .map_err(|_| ServiceError::Unauthorized("Malformed webhook timestamp".to_string()))?;
    let now = chrono::Utc::now().timestamp();
    if (now - ts_i).unsigned_abs() > tolerance_secs {
        return Err(ServiceError::Unauthorized(
            "Webhook timestamp outside tolerance".to_string(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ServiceError::InternalError("Invalid webhook secret".to_string()))?;
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());
    if !constant_time_eq(&expected, v1) {
        return Err(ServiceError::Unauthorized(
            "Webhook signature mismatch".to_string(),
        ));
    }

    parse_envelope(payload)
}

/// Parse the webhook body without verification. Only for configurations
/// with no webhook secret set (local development).
pub fn parse_unverified(payload: &Bytes) -> Result<ProviderEvent, ServiceError> {
    parse_envelope(payload)
}

fn parse_envelope(payload: &Bytes) -> Result<ProviderEvent, ServiceError> {
    let json: Value = serde_json::from_slice(payload)
        .map_err(|e| ServiceError::InvalidInput(format!("Invalid webhook body: {}", e)))?;

    let id = json
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ServiceError::InvalidInput("Webhook body missing id".to_string()))?
        .to_string();
    let event_type = json
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ServiceError::InvalidInput("Webhook body missing type".to_string()))?
        .to_string();
    let object = json
        .pointer("/data/object")
        .cloned()
        .unwrap_or(Value::Null);

    Ok(ProviderEvent {
        id,
        event_type,
        object,
        payload: json,
    })
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
