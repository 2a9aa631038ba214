//! GoCardless adapter (mandate family).
//!
//! Charges active bank-debit mandates via `POST {base}/payments`; there is
//! no hosted page and no browser return. Payment progress arrives through
//! the webhook stream, whose body is an `{"events": [...]}` envelope
//! signed with an HMAC-SHA256 hex digest in the `Webhook-Signature`
//! header.

use std::collections::HashMap;

use serde_json::Value;

use pp_domain::config::PspProviderConfig;
use pp_domain::error::{Error, Result};
use pp_domain::payment::{
    ChargeIntent, MandateChargeRequest, PaymentFlow, PaymentOutcome, ProviderEvent, PspProvider,
};

use crate::traits::PspAdapter;
use crate::util::{from_reqwest, provider_error, resolve_env, verify_hmac_sha256_hex};

const GOCARDLESS_VERSION: &str = "2015-07-06";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GocardlessAdapter {
    base_url: String,
    access_token: String,
    webhook_secret: String,
    client: reqwest::Client,
}

impl GocardlessAdapter {
    pub fn from_config(cfg: &PspProviderConfig) -> Result<Self> {
        let access_token = resolve_env(&cfg.api_key_env)?;
        let webhook_secret = resolve_env(&cfg.webhook_secret_env)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| from_reqwest(PspProvider::Gocardless, e))?;
        Ok(Self::new(&cfg.base_url, access_token, webhook_secret, client))
    }

    pub fn new(
        base_url: &str,
        access_token: String,
        webhook_secret: String,
        client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
            webhook_secret,
            client,
        }
    }

    /// Map a payment action/status onto the normalized outcome.
    fn map_action(action: &str) -> PaymentOutcome {
        match action {
            "confirmed" | "paid_out" => PaymentOutcome::Succeeded,
            "failed" | "cancelled" | "charged_back" | "customer_approval_denied" => {
                PaymentOutcome::Failed
            }
            "created" | "submitted" | "pending_submission" | "pending_customer_approval"
            | "customer_approval_granted" | "resubmission_requested" => PaymentOutcome::Pending,
            _ => PaymentOutcome::Ignored,
        }
    }
}

#[async_trait::async_trait]
impl PspAdapter for GocardlessAdapter {
    fn provider(&self) -> PspProvider {
        PspProvider::Gocardless
    }

    fn flow(&self) -> PaymentFlow {
        PaymentFlow::MandateDebit
    }

    async fn create_mandate_charge(&self, req: MandateChargeRequest) -> Result<ChargeIntent> {
        tracing::debug!(
            session_id = %req.session_id,
            mandate = %req.mandate_reference,
            "creating GoCardless payment"
        );

        let body = serde_json::json!({
            "payments": {
                "amount": req.amount_cents,
                "currency": req.currency,
                "description": req.description,
                "links": { "mandate": req.mandate_reference },
                "metadata": { "portal_session_id": req.session_id.to_string() },
            }
        });

        let resp = self
            .client
            .post(format!("{}/payments", self.base_url))
            .bearer_auth(&self.access_token)
            .header("GoCardless-Version", GOCARDLESS_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| from_reqwest(self.provider(), e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(provider_error(
                self.provider(),
                format!("payments returned {status}: {text}"),
            ));
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| from_reqwest(self.provider(), e))?;

        let payment = &payload["payments"];
        let psp_session_id = payment["id"]
            .as_str()
            .ok_or_else(|| provider_error(self.provider(), "response missing payment id"))?
            .to_string();
        let sync_outcome = Self::map_action(payment["status"].as_str().unwrap_or("created"));

        Ok(ChargeIntent {
            psp_session_id,
            sync_outcome,
        })
    }

    fn verify_signature(
        &self,
        raw_body: &[u8],
        signature: &str,
        headers: &HashMap<String, String>,
    ) -> Result<()> {
        let sig = headers
            .get("webhook-signature")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(signature);

        if sig.is_empty() {
            return Err(Error::SignatureInvalid("missing signature".into()));
        }
        if !verify_hmac_sha256_hex(&self.webhook_secret, raw_body, sig) {
            return Err(Error::SignatureInvalid("gocardless HMAC mismatch".into()));
        }
        Ok(())
    }

    fn parse_event(&self, raw_body: &str) -> Result<ProviderEvent> {
        let payload: Value = serde_json::from_str(raw_body)?;
        let event = payload["events"]
            .as_array()
            .and_then(|events| events.first())
            .ok_or_else(|| Error::Validation("webhook carries no events".into()))?;

        let event_id = event["id"]
            .as_str()
            .ok_or_else(|| Error::Validation("event missing id".into()))?
            .to_string();
        let resource_type = event["resource_type"].as_str().unwrap_or("unknown");
        let action = event["action"].as_str().unwrap_or("unknown");

        // Only payment events drive sessions; mandate and payout events
        // are acknowledged and ignored.
        let outcome = if resource_type == "payments" {
            Self::map_action(action)
        } else {
            PaymentOutcome::Ignored
        };

        Ok(ProviderEvent {
            event_id,
            event_type: format!("{resource_type}.{action}"),
            psp_session_id: event["links"]["payment"].as_str().map(str::to_owned),
            outcome,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::sign_hmac_sha256_hex;

    fn adapter() -> GocardlessAdapter {
        GocardlessAdapter::new(
            "https://api-sandbox.gocardless.com",
            "token".into(),
            "whsec".into(),
            reqwest::Client::new(),
        )
    }

    fn payment_event(action: &str) -> String {
        format!(
            r#"{{"events": [{{
                "id": "EV123",
                "resource_type": "payments",
                "action": "{action}",
                "links": {{ "payment": "PM456" }}
            }}]}}"#
        )
    }

    #[test]
    fn confirmed_payment_maps_to_success() {
        let event = adapter().parse_event(&payment_event("confirmed")).unwrap();
        assert_eq!(event.outcome, PaymentOutcome::Succeeded);
        assert_eq!(event.event_id, "EV123");
        assert_eq!(event.event_type, "payments.confirmed");
        assert_eq!(event.psp_session_id.as_deref(), Some("PM456"));
    }

    #[test]
    fn failed_and_charged_back_map_to_failure() {
        for action in ["failed", "cancelled", "charged_back"] {
            let event = adapter().parse_event(&payment_event(action)).unwrap();
            assert_eq!(event.outcome, PaymentOutcome::Failed, "{action}");
        }
    }

    #[test]
    fn submitted_is_pending() {
        let event = adapter().parse_event(&payment_event("submitted")).unwrap();
        assert_eq!(event.outcome, PaymentOutcome::Pending);
    }

    #[test]
    fn mandate_events_are_ignored_but_acknowledged() {
        let body = r#"{"events": [{
            "id": "EV200",
            "resource_type": "mandates",
            "action": "cancelled",
            "links": {}
        }]}"#;
        let event = adapter().parse_event(body).unwrap();
        assert_eq!(event.outcome, PaymentOutcome::Ignored);
        assert_eq!(event.event_type, "mandates.cancelled");
    }

    #[test]
    fn empty_event_envelope_is_rejected() {
        assert!(adapter().parse_event(r#"{"events": []}"#).is_err());
        assert!(adapter().parse_event(r#"{}"#).is_err());
    }

    #[test]
    fn webhook_signature_header_is_honored() {
        let adapter = adapter();
        let body = payment_event("confirmed");
        let sig = sign_hmac_sha256_hex("whsec", body.as_bytes());

        let mut headers = HashMap::new();
        headers.insert("webhook-signature".to_string(), sig);
        assert!(adapter
            .verify_signature(body.as_bytes(), "", &headers)
            .is_ok());

        assert!(adapter
            .verify_signature(body.as_bytes(), "ffff", &HashMap::new())
            .is_err());
    }

    #[tokio::test]
    async fn hosted_redirects_are_not_supported() {
        let err = adapter()
            .create_redirect(pp_domain::payment::RedirectRequest {
                session_id: uuid::Uuid::new_v4(),
                amount_cents: 100,
                currency: "EUR".into(),
                description: None,
                success_url: "https://m.example/ok".into(),
                cancel_url: "https://m.example/ko".into(),
                notification_url: "https://pp.example/wh".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
