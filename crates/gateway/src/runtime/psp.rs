//! PSP orchestration: routes session actions to provider adapters and
//! reconciles the three independently timed arrivals (browser access,
//! provider webhooks, browser redirect-return) into one session history.
//!
//! Ordering rules:
//! - A provider call and the `Active -> Redirected` transition are one
//!   unit: the transition is recorded only after the provider call
//!   succeeded, so a timeout leaves the session retryable.
//! - The webhook stream is the sole source of truth for settlement. The
//!   browser return never guesses an outcome; it reports what the
//!   webhook already established, or "pending".
//! - A provider event that contradicts an already terminal session is a
//!   reconciliation alert, never an overwrite.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use pp_domain::config::Config;
use pp_domain::error::{Error, Result};
use pp_domain::payment::{
    MandateChargeRequest, PaymentFlow, PaymentOutcome, ProviderEvent, PspProvider,
    RedirectRequest,
};
use pp_providers::{PspAdapter, ProviderRegistry};
use pp_sessions::{
    AuditActor, MandateStore, PortalSession, SessionAction, SessionManager, SessionStatus,
};

use crate::runtime::inbox::{Delivery, InboxEntry, WebhookInbox};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of starting a payment attempt.
#[derive(Debug, Clone)]
pub struct StartRedirectOutcome {
    pub session: PortalSession,
    /// Hosted page for the browser; `None` for mandate debits, which
    /// have no browser step.
    pub redirect_url: Option<String>,
    pub psp_session_id: String,
}

/// Acknowledgement returned to the provider for every webhook delivery.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub status: WebhookStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Processed,
    Duplicate,
    Rejected,
    Failed,
}

/// What the browser learns when it lands on the return URL.
#[derive(Debug, Clone)]
pub struct ReturnOutcome {
    pub session: PortalSession,
    pub payment_confirmed: bool,
    pub pending_confirmation: bool,
    pub message: &'static str,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PspGateway {
    config: Arc<Config>,
    sessions: Arc<SessionManager>,
    mandates: Arc<MandateStore>,
    providers: Arc<ProviderRegistry>,
    inbox: Arc<WebhookInbox>,
}

impl PspGateway {
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<SessionManager>,
        mandates: Arc<MandateStore>,
        providers: Arc<ProviderRegistry>,
        inbox: Arc<WebhookInbox>,
    ) -> Self {
        Self {
            config,
            sessions,
            mandates,
            providers,
            inbox,
        }
    }

    // ── Start ──────────────────────────────────────────────────────

    /// Start a payment attempt for an activated session.
    ///
    /// Card payments go through a hosted redirect; bank debits charge an
    /// active mandate directly. Either way the session ends up
    /// `Redirected` with fresh provider coordinates, or untouched when
    /// the provider call failed.
    pub async fn start_redirect(
        &self,
        raw_token: &str,
        action: SessionAction,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<StartRedirectOutcome> {
        self.validate_return_urls(&[success_url, cancel_url])?;

        let session = self.sessions.authorize_redirect(raw_token, action)?;
        let flow = match action {
            SessionAction::PayByCard => PaymentFlow::Redirect,
            SessionAction::PayByBankDebit => PaymentFlow::MandateDebit,
        };
        let adapter = self
            .providers
            .for_flow(flow)
            .ok_or_else(|| Error::Config(format!("no provider configured for {flow:?}")))?;

        let psp_state = self.sessions.mint_state();

        match flow {
            PaymentFlow::Redirect => {
                self.start_hosted_redirect(session, adapter, psp_state, success_url, cancel_url)
                    .await
            }
            PaymentFlow::MandateDebit => {
                self.start_mandate_charge(session, adapter, psp_state).await
            }
        }
    }

    async fn start_hosted_redirect(
        &self,
        session: PortalSession,
        adapter: Arc<dyn PspAdapter>,
        psp_state: String,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<StartRedirectOutcome> {
        let provider = adapter.provider();
        let intent = adapter
            .create_redirect(RedirectRequest {
                session_id: session.id,
                amount_cents: session.amount_cents,
                currency: session.currency.clone(),
                description: session.description.clone(),
                success_url: append_state(success_url, &psp_state),
                cancel_url: append_state(cancel_url, &psp_state),
                notification_url: self.notification_url(provider),
            })
            .await?;

        // Provider call done; only now does the session move.
        let session = self.sessions.mark_redirected(
            session.id,
            provider,
            intent.psp_session_id.clone(),
            Some(intent.redirect_url.clone()),
            psp_state,
        )?;

        Ok(StartRedirectOutcome {
            session,
            redirect_url: Some(intent.redirect_url),
            psp_session_id: intent.psp_session_id,
        })
    }

    async fn start_mandate_charge(
        &self,
        session: PortalSession,
        adapter: Arc<dyn PspAdapter>,
        psp_state: String,
    ) -> Result<StartRedirectOutcome> {
        let provider = adapter.provider();
        let mandate = self
            .mandates
            .find_active(session.merchant_id, session.customer_id)
            .ok_or(Error::NoActiveMandate)?;

        let charge = adapter
            .create_mandate_charge(MandateChargeRequest {
                session_id: session.id,
                mandate_reference: mandate.reference.clone(),
                amount_cents: session.amount_cents,
                currency: session.currency.clone(),
                description: session.description.clone(),
            })
            .await?;

        let session = self.sessions.mark_redirected(
            session.id,
            provider,
            charge.psp_session_id.clone(),
            None,
            psp_state,
        )?;

        // Some providers settle in the synchronous acknowledgement; most
        // answer pending and settle through the webhook stream.
        let session = match charge.sync_outcome {
            PaymentOutcome::Succeeded => self.sessions.complete_payment(
                session.id,
                AuditActor::System,
                BTreeMap::from([("source".into(), "sync_ack".into())]),
            )?,
            PaymentOutcome::Failed => self.sessions.fail_payment(
                session.id,
                AuditActor::System,
                BTreeMap::from([("source".into(), "sync_ack".into())]),
            )?,
            PaymentOutcome::Pending | PaymentOutcome::Ignored => session,
        };

        Ok(StartRedirectOutcome {
            session,
            redirect_url: None,
            psp_session_id: charge.psp_session_id,
        })
    }

    // ── Webhooks ───────────────────────────────────────────────────

    /// Process one webhook delivery end to end, mapping every failure
    /// mode to an acknowledgement the HTTP layer can return.
    ///
    /// Signature verification comes first and a failure creates no inbox
    /// row and touches no session. Everything past the dedup point is
    /// acknowledged so the provider stops retrying.
    pub async fn handle_webhook(
        &self,
        provider_name: &str,
        raw_body: &[u8],
        signature: &str,
        headers: &HashMap<String, String>,
    ) -> WebhookAck {
        let Some(provider) = PspProvider::parse(provider_name) else {
            tracing::warn!(provider = provider_name, "webhook for unknown provider");
            return rejected();
        };
        let Some(adapter) = self.providers.get(provider) else {
            tracing::warn!(provider = %provider, "webhook for unconfigured provider");
            return rejected();
        };

        if let Err(err) = adapter.verify_signature(raw_body, signature, headers) {
            tracing::warn!(provider = %provider, error = %err, "webhook signature rejected");
            return rejected();
        }

        let body = String::from_utf8_lossy(raw_body);
        let event = match adapter.parse_event(&body) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(provider = %provider, error = %err, "unparseable webhook payload");
                return rejected();
            }
        };

        let entry = match self.inbox.insert_first(
            provider,
            &event.event_id,
            &event.event_type,
            &body,
            (!signature.is_empty()).then(|| signature.to_owned()),
        ) {
            Delivery::Duplicate(existing) => {
                tracing::info!(
                    provider = %provider,
                    event_id = %event.event_id,
                    "duplicate webhook delivery"
                );
                return WebhookAck {
                    acknowledged: true,
                    event_id: Some(existing.event_id),
                    status: WebhookStatus::Duplicate,
                };
            }
            Delivery::First(entry) => entry,
        };
        self.inbox.mark_verified(entry.id);

        let status = self.apply_event(provider, &entry, &event);
        WebhookAck {
            acknowledged: true,
            event_id: Some(entry.event_id),
            status,
        }
    }

    /// Drive the session transition for a freshly claimed event.
    fn apply_event(
        &self,
        provider: PspProvider,
        entry: &InboxEntry,
        event: &ProviderEvent,
    ) -> WebhookStatus {
        let session = event
            .psp_session_id
            .as_deref()
            .and_then(|psp_id| self.sessions.find_by_psp_session(provider, psp_id));

        let Some(session) = session else {
            // Unknown payment reference or an event family we do not
            // track; acknowledged so the provider stops retrying.
            self.inbox
                .mark_processed(entry.id, None, Some("no session resolved".into()));
            return WebhookStatus::Processed;
        };

        self.sessions.record_webhook(
            session.id,
            BTreeMap::from([
                ("event_id".into(), event.event_id.clone()),
                ("event_type".into(), event.event_type.clone()),
            ]),
        );

        let data = BTreeMap::from([
            ("inbox_id".into(), entry.id.to_string()),
            ("psp_event_id".into(), event.event_id.clone()),
            ("psp_event_type".into(), event.event_type.clone()),
        ]);

        let result = match event.outcome {
            PaymentOutcome::Succeeded => {
                self.sessions
                    .complete_payment(session.id, AuditActor::Webhook, data)
            }
            PaymentOutcome::Failed => {
                self.sessions
                    .fail_payment(session.id, AuditActor::Webhook, data)
            }
            PaymentOutcome::Pending | PaymentOutcome::Ignored => {
                self.inbox.mark_processed(entry.id, Some(session.id), None);
                return WebhookStatus::Processed;
            }
        };

        match result {
            Ok(_) => {
                self.inbox.mark_processed(entry.id, Some(session.id), None);
                WebhookStatus::Processed
            }
            Err(Error::IllegalTransition { .. }) => {
                // Someone settled first: consistent redeliveries are fine,
                // a contradiction is an ops alert, never an overwrite.
                let current = self
                    .sessions
                    .get(session.id)
                    .map(|s| s.status)
                    .unwrap_or(session.status);
                let consistent = matches!(
                    (event.outcome, current),
                    (PaymentOutcome::Succeeded, SessionStatus::Completed)
                        | (PaymentOutcome::Failed, SessionStatus::Failed)
                );
                let note = if consistent {
                    None
                } else {
                    tracing::warn!(
                        session_id = %session.id,
                        event_id = %event.event_id,
                        outcome = ?event.outcome,
                        status = %current,
                        "provider event contradicts terminal session state; \
                         flagged for reconciliation"
                    );
                    Some(format!(
                        "terminal state conflict: event {:?} vs status {current}",
                        event.outcome
                    ))
                };
                self.inbox.mark_processed(entry.id, Some(session.id), note);
                WebhookStatus::Processed
            }
            Err(err) => {
                tracing::error!(
                    session_id = %session.id,
                    event_id = %event.event_id,
                    error = %err,
                    "webhook processing failed"
                );
                self.inbox.mark_failed(entry.id, err.to_string());
                WebhookStatus::Failed
            }
        }
    }

    // ── Browser return ─────────────────────────────────────────────

    /// Reconcile the browser's redirect-return with whatever the webhook
    /// stream has already established.
    pub fn handle_return(
        &self,
        state: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ReturnOutcome> {
        let session = self.sessions.find_by_psp_state(state).ok_or(Error::NotFound)?;

        let mut data = BTreeMap::new();
        if !params.is_empty() {
            data.insert(
                "psp_params".into(),
                serde_json::to_string(params).unwrap_or_default(),
            );
        }
        self.sessions.record_callback(session.id, data);

        let outcome = match session.status {
            // Webhook won the race and already settled the session.
            SessionStatus::Completed => ReturnOutcome {
                payment_confirmed: true,
                pending_confirmation: false,
                message: "Payment confirmed",
                session,
            },
            SessionStatus::Failed => ReturnOutcome {
                payment_confirmed: false,
                pending_confirmation: false,
                message: "Payment failed",
                session,
            },
            SessionStatus::Expired | SessionStatus::Cancelled => ReturnOutcome {
                payment_confirmed: false,
                pending_confirmation: false,
                message: "Session is no longer active",
                session,
            },
            // Browser arrived first. The webhook will settle it; never
            // guess the outcome here.
            _ => ReturnOutcome {
                payment_confirmed: false,
                pending_confirmation: true,
                message: "Payment pending confirmation",
                session,
            },
        };
        Ok(outcome)
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn notification_url(&self, provider: PspProvider) -> String {
        format!(
            "{}/v1/webhooks/{provider}",
            self.config.portal.base_url.trim_end_matches('/')
        )
    }

    /// Merchant return URLs must come from an allowlisted origin; an
    /// empty allowlist accepts anything (dev mode, warned at startup).
    fn validate_return_urls(&self, urls: &[&str]) -> Result<()> {
        let allowed = &self.config.portal.allowed_redirect_origins;
        if allowed.is_empty() {
            return Ok(());
        }
        for url in urls {
            let origin = origin_of(url)
                .ok_or_else(|| Error::Validation(format!("invalid return URL: {url}")))?;
            let ok = allowed
                .iter()
                .any(|a| a.trim_end_matches('/').eq_ignore_ascii_case(&origin));
            if !ok {
                return Err(Error::Validation(format!(
                    "return URL origin not allowed: {origin}"
                )));
            }
        }
        Ok(())
    }
}

fn rejected() -> WebhookAck {
    WebhookAck {
        acknowledged: false,
        event_id: None,
        status: WebhookStatus::Rejected,
    }
}

/// Append the correlation state to a return URL. The state is base64url,
/// so no percent-encoding is needed.
fn append_state(url: &str, state: &str) -> String {
    if url.contains('?') {
        format!("{url}&state={state}")
    } else {
        format!("{url}?state={state}")
    }
}

/// `scheme://authority` of a URL, lowercased, without any path.
fn origin_of(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme.is_empty() || rest.is_empty() {
        return None;
    }
    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .filter(|a| !a.is_empty())?;
    Some(format!("{scheme}://{authority}").to_ascii_lowercase())
}
