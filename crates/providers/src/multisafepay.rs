//! MultiSafepay adapter (redirect family).
//!
//! Creates hosted-page orders via `POST {base}/orders` and normalizes the
//! transaction-status notifications MultiSafepay posts back. Notifications
//! are signed with an HMAC-SHA256 of the raw body.

use std::collections::HashMap;

use serde_json::Value;

use pp_domain::config::PspProviderConfig;
use pp_domain::error::{Error, Result};
use pp_domain::payment::{
    PaymentFlow, PaymentOutcome, ProviderEvent, PspProvider, RedirectIntent, RedirectRequest,
};

use crate::traits::PspAdapter;
use crate::util::{from_reqwest, provider_error, resolve_env, verify_hmac_sha256_hex};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MultisafepayAdapter {
    base_url: String,
    api_key: String,
    webhook_secret: String,
    client: reqwest::Client,
}

impl MultisafepayAdapter {
    /// Create the adapter from provider config, resolving secrets from
    /// the environment once, at this point.
    pub fn from_config(cfg: &PspProviderConfig) -> Result<Self> {
        let api_key = resolve_env(&cfg.api_key_env)?;
        let webhook_secret = resolve_env(&cfg.webhook_secret_env)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| from_reqwest(PspProvider::Multisafepay, e))?;
        Ok(Self::new(&cfg.base_url, api_key, webhook_secret, client))
    }

    pub fn new(
        base_url: &str,
        api_key: String,
        webhook_secret: String,
        client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            webhook_secret,
            client,
        }
    }

    /// Map a MultiSafepay transaction status onto the normalized outcome.
    fn map_status(status: &str) -> PaymentOutcome {
        match status {
            "completed" => PaymentOutcome::Succeeded,
            "declined" | "chargeback" | "error" | "expired" | "cancelled" | "void" => {
                PaymentOutcome::Failed
            }
            "initialized" | "uncleared" | "reserved" => PaymentOutcome::Pending,
            _ => PaymentOutcome::Ignored,
        }
    }
}

#[async_trait::async_trait]
impl PspAdapter for MultisafepayAdapter {
    fn provider(&self) -> PspProvider {
        PspProvider::Multisafepay
    }

    fn flow(&self) -> PaymentFlow {
        PaymentFlow::Redirect
    }

    async fn create_redirect(&self, req: RedirectRequest) -> Result<RedirectIntent> {
        let order_id = req.session_id.to_string();
        let body = serde_json::json!({
            "type": "redirect",
            "order_id": &order_id,
            "currency": req.currency,
            "amount": req.amount_cents,
            "description": req.description.clone().unwrap_or_else(|| format!("Payment {order_id}")),
            "payment_options": {
                "notification_url": req.notification_url,
                "redirect_url": req.success_url,
                "cancel_url": req.cancel_url,
            },
        });

        tracing::debug!(order_id = %order_id, "creating MultiSafepay order");

        let resp = self
            .client
            .post(format!("{}/orders", self.base_url))
            .header("api_key", &self.api_key)
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
                format!("orders returned {status}: {text}"),
            ));
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| from_reqwest(self.provider(), e))?;

        if !payload["success"].as_bool().unwrap_or(false) {
            let info = payload["error_info"].as_str().unwrap_or("unknown error");
            return Err(provider_error(self.provider(), format!("orders failed: {info}")));
        }

        let data = &payload["data"];
        let redirect_url = data["payment_url"]
            .as_str()
            .ok_or_else(|| provider_error(self.provider(), "response missing payment_url"))?
            .to_string();
        let psp_session_id = data["transaction_id"]
            .as_str()
            .map(str::to_owned)
            .or_else(|| data["transaction_id"].as_u64().map(|v| v.to_string()))
            .or_else(|| data["order_id"].as_str().map(str::to_owned))
            .unwrap_or(order_id);

        Ok(RedirectIntent {
            redirect_url,
            psp_session_id,
        })
    }

    fn verify_signature(
        &self,
        raw_body: &[u8],
        signature: &str,
        headers: &HashMap<String, String>,
    ) -> Result<()> {
        // The signature travels in the `auth` header; fall back to the
        // dedicated signature argument for transports that strip it.
        let sig = headers
            .get("auth")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(signature);

        if sig.is_empty() {
            return Err(Error::SignatureInvalid("missing signature".into()));
        }
        if !verify_hmac_sha256_hex(&self.webhook_secret, raw_body, sig) {
            return Err(Error::SignatureInvalid(
                "multisafepay HMAC mismatch".into(),
            ));
        }
        Ok(())
    }

    fn parse_event(&self, raw_body: &str) -> Result<ProviderEvent> {
        let payload: Value = serde_json::from_str(raw_body)?;
        let transaction_id = payload["transactionid"]
            .as_str()
            .map(str::to_owned)
            .or_else(|| payload["transactionid"].as_u64().map(|v| v.to_string()))
            .ok_or_else(|| Error::Validation("notification missing transactionid".into()))?;
        let status = payload["status"]
            .as_str()
            .unwrap_or("unknown")
            .to_ascii_lowercase();

        // MultiSafepay notifications carry no event id of their own; the
        // transaction plus its reported status forms the dedup key, so a
        // redelivery is a duplicate but a status progression is not.
        Ok(ProviderEvent {
            event_id: format!("{transaction_id}:{status}"),
            event_type: status.clone(),
            psp_session_id: Some(transaction_id),
            outcome: Self::map_status(&status),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
