//! Provider webhook verification and translation
//!
//! Signatures are checked by hand against the `t=...,v1=...` header scheme
//! rather than through async-stripe's typed `Event`, so payloads from newer
//! provider API versions still verify and parse. Only the handful of fields
//! the reconciler needs are read from the event body.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::observation::Observation;

type HmacSha256 = Hmac<Sha256>;

/// Default allowed clock skew between signing and receipt
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// A verified provider event, reduced to what the engine reads
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub object: serde_json::Value,
}

/// Verifies the delivery signature on inbound provider events
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Verify against the current wall clock and parse the event
    pub fn verify(&self, payload: &str, signature: &str) -> BillingResult<WebhookEnvelope> {
        self.verify_at(payload, signature, OffsetDateTime::now_utc().unix_timestamp())
    }

    pub fn verify_at(
        &self,
        payload: &str,
        signature: &str,
        now: i64,
    ) -> BillingResult<WebhookEnvelope> {
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();

        for part in signature.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::warn!("Webhook signature header missing timestamp");
            BillingError::WebhookSignatureInvalid
        })?;

        if candidates.is_empty() {
            tracing::warn!("Webhook signature header missing v1 signature");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        if (now - timestamp).abs() > self.tolerance_secs {
            tracing::warn!(
                timestamp = timestamp,
                now = now,
                tolerance_secs = self.tolerance_secs,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let signed_payload = format!("{}.{}", timestamp, payload);
        let matched = candidates.iter().any(|candidate| {
            let Ok(expected) = hex::decode(candidate) else {
                return false;
            };
            let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.as_bytes()) else {
                return false;
            };
            mac.update(signed_payload.as_bytes());
            mac.verify_slice(&expected).is_ok()
        });

        if !matched {
            tracing::warn!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        serde_json::from_str(payload).map_err(|e| {
            tracing::warn!(error = %e, "Verified webhook payload is not a provider event");
            BillingError::WebhookPayloadInvalid(e.to_string())
        })
    }
}

/// Id of a field that may be either a bare id or an expanded object
fn expandable_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
        serde_json::Value::Object(object) => object
            .get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string),
        _ => None,
    }
}

fn required_id(object: &serde_json::Value, field: &str, event: &WebhookEnvelope) -> BillingResult<String> {
    object
        .get(field)
        .and_then(expandable_id)
        .ok_or_else(|| {
            BillingError::WebhookPayloadInvalid(format!(
                "{} event {} has no {}",
                event.event_type, event.id, field
            ))
        })
}

/// Translate a verified event into an observation.
///
/// Event types the engine does not consume yield `Ok(None)`.
pub fn parse_observation(event: &WebhookEnvelope) -> BillingResult<Option<Observation>> {
    let object = &event.data.object;

    match event.event_type.as_str() {
        "checkout.session.completed" => {
            if object.get("mode").and_then(|m| m.as_str()) != Some("subscription") {
                return Ok(None);
            }
            let Some(subscription_id) = object.get("subscription").and_then(expandable_id) else {
                tracing::warn!(
                    event_id = %event.id,
                    "Subscription checkout completed without a subscription"
                );
                return Ok(None);
            };
            let customer_id = required_id(object, "customer", event)?;
            Ok(Some(Observation::CheckoutCompleted {
                customer_id,
                subscription_id,
            }))
        }
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.paused"
        | "customer.subscription.resumed" => {
            let subscription_id = required_id(object, "id", event)?;
            let customer_id = required_id(object, "customer", event)?;
            let provider_status = object
                .get("status")
                .and_then(|s| s.as_str())
                .map(str::to_string);
            Ok(Some(Observation::SubscriptionChanged {
                customer_id,
                subscription_id,
                provider_status,
            }))
        }
        "customer.subscription.deleted" => {
            let subscription_id = required_id(object, "id", event)?;
            let customer_id = required_id(object, "customer", event)?;
            Ok(Some(Observation::SubscriptionCanceled {
                customer_id,
                subscription_id,
            }))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::signature_header;

    const SECRET: &str = "whsec_test_secret_for_unit_tests";
    const NOW: i64 = 1_790_000_000;

    fn event_json(event_type: &str, object: serde_json::Value) -> String {
        serde_json::json!({
            "id": "evt_123",
            "type": event_type,
            "created": NOW,
            "data": { "object": object },
        })
        .to_string()
    }

    #[test]
    fn test_valid_signature_verifies() {
        let verifier = WebhookVerifier::new(SECRET, DEFAULT_TOLERANCE_SECS);
        let payload = event_json("customer.subscription.updated", serde_json::json!({}));
        let header = signature_header(SECRET, NOW, &payload);

        let event = verifier.verify_at(&payload, &header, NOW + 10).unwrap();
        assert_eq!(event.id, "evt_123");
        assert_eq!(event.event_type, "customer.subscription.updated");
    }

    #[test]
    fn test_any_matching_v1_is_accepted() {
        let verifier = WebhookVerifier::new(SECRET, DEFAULT_TOLERANCE_SECS);
        let payload = event_json("invoice.paid", serde_json::json!({}));
        let good = signature_header(SECRET, NOW, &payload);
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1={}", NOW, "00".repeat(32), good_sig);

        assert!(verifier.verify_at(&payload, &header, NOW).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = WebhookVerifier::new(SECRET, DEFAULT_TOLERANCE_SECS);
        let payload = event_json("invoice.paid", serde_json::json!({}));
        let header = signature_header("whsec_someone_else", NOW, &payload);

        assert!(matches!(
            verifier.verify_at(&payload, &header, NOW),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let verifier = WebhookVerifier::new(SECRET, DEFAULT_TOLERANCE_SECS);
        let payload = event_json("invoice.paid", serde_json::json!({}));
        let header = signature_header(SECRET, NOW, &payload);
        let tampered = payload.replace("evt_123", "evt_999");

        assert!(verifier.verify_at(&tampered, &header, NOW).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let verifier = WebhookVerifier::new(SECRET, DEFAULT_TOLERANCE_SECS);
        let payload = event_json("invoice.paid", serde_json::json!({}));
        let header = signature_header(SECRET, NOW, &payload);

        assert!(verifier
            .verify_at(&payload, &header, NOW + DEFAULT_TOLERANCE_SECS + 1)
            .is_err());
    }

    #[test]
    fn test_malformed_header_rejected() {
        let verifier = WebhookVerifier::new(SECRET, DEFAULT_TOLERANCE_SECS);
        let payload = event_json("invoice.paid", serde_json::json!({}));

        assert!(verifier.verify_at(&payload, "", NOW).is_err());
        assert!(verifier.verify_at(&payload, "t=abc,v1=zz", NOW).is_err());
        assert!(verifier.verify_at(&payload, &format!("t={}", NOW), NOW).is_err());
    }

    fn envelope(event_type: &str, object: serde_json::Value) -> WebhookEnvelope {
        serde_json::from_str(&event_json(event_type, object)).unwrap()
    }

    #[test]
    fn test_subscription_updated_becomes_changed() {
        let event = envelope(
            "customer.subscription.updated",
            serde_json::json!({ "id": "sub_1", "customer": "cus_1", "status": "active" }),
        );
        assert_eq!(
            parse_observation(&event).unwrap(),
            Some(Observation::SubscriptionChanged {
                customer_id: "cus_1".to_string(),
                subscription_id: "sub_1".to_string(),
                provider_status: Some("active".to_string()),
            })
        );
    }

    #[test]
    fn test_subscription_deleted_becomes_canceled() {
        let event = envelope(
            "customer.subscription.deleted",
            serde_json::json!({ "id": "sub_1", "customer": { "id": "cus_1", "object": "customer" } }),
        );
        assert_eq!(
            parse_observation(&event).unwrap(),
            Some(Observation::SubscriptionCanceled {
                customer_id: "cus_1".to_string(),
                subscription_id: "sub_1".to_string(),
            })
        );
    }

    #[test]
    fn test_checkout_completed_requires_subscription_mode() {
        let subscription = envelope(
            "checkout.session.completed",
            serde_json::json!({ "mode": "subscription", "customer": "cus_1", "subscription": "sub_1" }),
        );
        assert!(matches!(
            parse_observation(&subscription).unwrap(),
            Some(Observation::CheckoutCompleted { .. })
        ));

        let payment = envelope(
            "checkout.session.completed",
            serde_json::json!({ "mode": "payment", "customer": "cus_1" }),
        );
        assert_eq!(parse_observation(&payment).unwrap(), None);
    }

    #[test]
    fn test_unconsumed_event_types_ignored() {
        let event = envelope("invoice.payment_failed", serde_json::json!({ "id": "in_1" }));
        assert_eq!(parse_observation(&event).unwrap(), None);
    }

    #[test]
    fn test_missing_customer_is_invalid() {
        let event = envelope(
            "customer.subscription.updated",
            serde_json::json!({ "id": "sub_1", "status": "active" }),
        );
        assert!(matches!(
            parse_observation(&event),
            Err(BillingError::WebhookPayloadInvalid(_))
        ));
    }
}
