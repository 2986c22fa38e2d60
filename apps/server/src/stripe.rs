//! Stripe Checkout: session creation and webhook signature verification.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook timestamp.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const CHECKOUT_EXPIRED: &str = "checkout.session.expired";

const API_BASE: &str = "https://api.stripe.com/v1";

// ── Checkout provider seam ──

/// What the customer is about to pay for.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub booking_id: i64,
    pub user_id: String,
    pub service_id: i64,
    pub service_name: String,
    pub price: f64,
    pub date: NaiveDate,
    pub time: String,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn create_session(&self, req: &CheckoutRequest) -> anyhow::Result<CheckoutSession>;
}

/// Hosted Stripe Checkout over the REST API.
pub struct StripeCheckout {
    http: reqwest::Client,
    secret_key: String,
    site_url: url::Url,
    currency: String,
}

impl StripeCheckout {
    pub fn new(secret_key: String, site_url: url::Url, currency: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            secret_key,
            site_url,
            currency,
        })
    }

    fn success_url(&self) -> anyhow::Result<String> {
        // Stripe substitutes the literal placeholder, so it must stay unescaped.
        let base = self.site_url.join("booking/success")?;
        Ok(format!("{base}?session_id={{CHECKOUT_SESSION_ID}}"))
    }

    fn cancel_url(&self, service_id: i64) -> anyhow::Result<String> {
        Ok(self
            .site_url
            .join(&format!("services/{service_id}"))?
            .to_string())
    }

    fn form(&self, req: &CheckoutRequest) -> anyhow::Result<Vec<(String, String)>> {
        let unit_amount = (req.price * 100.0).round() as i64;
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), self.success_url()?),
            ("cancel_url".to_string(), self.cancel_url(req.service_id)?),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                self.currency.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                unit_amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                req.service_name.clone(),
            ),
            (
                "line_items[0][price_data][product_data][description]".to_string(),
                format!("Appointment on {} at {}", req.date, req.time),
            ),
            ("metadata[bookingId]".to_string(), req.booking_id.to_string()),
            ("metadata[userId]".to_string(), req.user_id.clone()),
            ("metadata[serviceId]".to_string(), req.service_id.to_string()),
            ("metadata[date]".to_string(), req.date.to_string()),
            ("metadata[time]".to_string(), req.time.clone()),
        ];
        if let Some(email) = &req.customer_email {
            form.push(("customer_email".to_string(), email.clone()));
        }
        Ok(form)
    }
}

#[async_trait]
impl CheckoutProvider for StripeCheckout {
    async fn create_session(&self, req: &CheckoutRequest) -> anyhow::Result<CheckoutSession> {
        if self.secret_key.is_empty() {
            anyhow::bail!("Stripe is not configured");
        }

        let resp = self
            .http
            .post(format!("{API_BASE}/checkout/sessions"))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", format!("booking-{}", req.booking_id))
            .form(&self.form(req)?)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Stripe API error: {} - {}", status, text);
        }

        let session: CheckoutSession = resp.json().await?;
        tracing::info!(
            "Stripe checkout session {} created for booking {}",
            session.id,
            req.booking_id
        );
        Ok(session)
    }
}

// ── Webhook events ──

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// The fields of a Checkout Session object the confirmation flow reads.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub payment_intent: Option<String>,
    /// Smallest currency unit (cents).
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

// ── Signature ──

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("malformed Stripe-Signature header")]
    Malformed,
    #[error("webhook timestamp outside tolerance")]
    Expired,
    #[error("no matching v1 signature")]
    Mismatch,
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`) against
/// the raw request body.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", t)) => timestamp = t.parse::<i64>().ok(),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if now.abs_diff(timestamp) > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        return Err(SignatureError::Expired);
    }

    let matched = signatures.iter().any(|sig| {
        let Ok(expected) = hex::decode(sig) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    });

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a valid header the way Stripe does.
#[cfg(test)]
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;
    const NOW: i64 = 1_780_000_000;

    #[test]
    fn test_valid_signature() {
        let header = sign_payload(BODY, SECRET, NOW);
        assert_eq!(verify_signature(BODY, &header, SECRET, NOW + 5), Ok(()));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = sign_payload(BODY, SECRET, NOW);
        assert_eq!(
            verify_signature(b"{}", &header, SECRET, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let header = sign_payload(BODY, "whsec_other", NOW);
        assert_eq!(
            verify_signature(BODY, &header, SECRET, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let header = sign_payload(BODY, SECRET, NOW);
        assert_eq!(
            verify_signature(BODY, &header, SECRET, NOW + SIGNATURE_TOLERANCE_SECS + 1),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn test_extreme_timestamps_expire() {
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={t},v1=00");
            assert_eq!(
                verify_signature(b"{}", &header, SECRET, NOW),
                Err(SignatureError::Expired),
                "{header:?}"
            );
        }
    }

    #[test]
    fn test_malformed_headers() {
        for header in ["", "v1=abcd", "t=abc,v1=abcd", "t=1780000000"] {
            assert_eq!(
                verify_signature(BODY, header, SECRET, NOW),
                Err(SignatureError::Malformed),
                "{header:?}"
            );
        }
    }

    #[test]
    fn test_any_v1_may_match() {
        let valid = sign_payload(BODY, SECRET, NOW);
        let sig = valid.split_once("v1=").unwrap().1;
        let header = format!("t={NOW},v1=deadbeef,v0=ignored,v1={sig}");
        assert_eq!(verify_signature(BODY, &header, SECRET, NOW), Ok(()));
    }

    #[test]
    fn test_parse_checkout_event() {
        let raw = r#"{
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_test_1",
                "payment_intent": "pi_1",
                "amount_total": 6500,
                "metadata": {"bookingId": "12", "userId": "user-1", "serviceId": "2"}
            }}
        }"#;
        let event: WebhookEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_type, CHECKOUT_COMPLETED);
        let session: CheckoutSessionObject = serde_json::from_value(event.data.object).unwrap();
        assert_eq!(session.amount_total, Some(6500));
        assert_eq!(session.metadata["bookingId"], "12");
    }

    fn checkout() -> StripeCheckout {
        StripeCheckout::new(
            "sk_test".into(),
            url::Url::parse("https://studio.example.com/").unwrap(),
            "usd".into(),
        )
        .unwrap()
    }

    #[test]
    fn test_success_url_keeps_placeholder() {
        assert_eq!(
            checkout().success_url().unwrap(),
            "https://studio.example.com/booking/success?session_id={CHECKOUT_SESSION_ID}"
        );
    }

    #[test]
    fn test_form_carries_metadata_and_cents() {
        let form = checkout()
            .form(&CheckoutRequest {
                booking_id: 12,
                user_id: "user-1".into(),
                service_id: 3,
                service_name: "Brow Lamination - Lamination + Tint".into(),
                price: 100.5,
                date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                time: "9:00 AM".into(),
                customer_email: None,
            })
            .unwrap();
        let get = |k: &str| {
            form.iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("10050"));
        assert_eq!(get("metadata[bookingId]"), Some("12"));
        assert_eq!(get("metadata[date]"), Some("2026-03-02"));
        assert_eq!(get("cancel_url"), Some("https://studio.example.com/services/3"));
        assert_eq!(get("customer_email"), None);
    }
}
