//! End-to-end orchestration tests: mock PSP adapters driving the session
//! manager, webhook inbox, and race reconciliation.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use pp_domain::config::Config;
use pp_domain::error::{Error, Result};
use pp_domain::payment::{
    ChargeIntent, MandateChargeRequest, PaymentFlow, PaymentOutcome, ProviderEvent, PspProvider,
    Pagination, RedirectIntent, RedirectRequest,
};
use pp_gateway::runtime::inbox::{InboxStatus, WebhookInbox};
use pp_gateway::runtime::psp::{PspGateway, WebhookStatus};
use pp_providers::{ProviderRegistry, PspAdapter};
use pp_sessions::{
    AuditEventType, AuditLog, CreateSessionParams, Mandate, MandateStatus, MandateStore,
    SessionAction, SessionDefaults, SessionManager, SessionStatus, SessionStore,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mock adapters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Redirect-family mock wearing the MultiSafepay provider id. Webhook
/// bodies are `{"event_id", "psp_session_id", "outcome"}`; the literal
/// signature `"valid"` passes verification.
struct MockCardPsp {
    fail_next_create: AtomicBool,
}

impl MockCardPsp {
    fn new() -> Self {
        Self {
            fail_next_create: AtomicBool::new(false),
        }
    }
}

fn parse_mock_event(raw_body: &str) -> Result<ProviderEvent> {
    let v: serde_json::Value = serde_json::from_str(raw_body)?;
    let outcome = match v["outcome"].as_str().unwrap_or("ignored") {
        "succeeded" => PaymentOutcome::Succeeded,
        "failed" => PaymentOutcome::Failed,
        "pending" => PaymentOutcome::Pending,
        _ => PaymentOutcome::Ignored,
    };
    Ok(ProviderEvent {
        event_id: v["event_id"]
            .as_str()
            .ok_or_else(|| Error::Validation("missing event_id".into()))?
            .to_string(),
        event_type: v["outcome"].as_str().unwrap_or("ignored").to_string(),
        psp_session_id: v["psp_session_id"].as_str().map(str::to_owned),
        outcome,
    })
}

fn verify_mock_signature(signature: &str) -> Result<()> {
    if signature == "valid" {
        Ok(())
    } else {
        Err(Error::SignatureInvalid("mock signature mismatch".into()))
    }
}

#[async_trait::async_trait]
impl PspAdapter for MockCardPsp {
    fn provider(&self) -> PspProvider {
        PspProvider::Multisafepay
    }

    fn flow(&self) -> PaymentFlow {
        PaymentFlow::Redirect
    }

    async fn create_redirect(&self, req: RedirectRequest) -> Result<RedirectIntent> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(Error::ProviderUnavailable {
                provider: "multisafepay".into(),
                message: "connect timeout".into(),
            });
        }
        assert!(req.success_url.contains("state="));
        Ok(RedirectIntent {
            redirect_url: format!("https://psp.example/hosted/{}", req.session_id),
            psp_session_id: format!("msp-{}", req.session_id),
        })
    }

    fn verify_signature(
        &self,
        _raw_body: &[u8],
        signature: &str,
        _headers: &HashMap<String, String>,
    ) -> Result<()> {
        verify_mock_signature(signature)
    }

    fn parse_event(&self, raw_body: &str) -> Result<ProviderEvent> {
        parse_mock_event(raw_body)
    }
}

/// Mandate-family mock wearing the GoCardless provider id.
struct MockDebitPsp;

#[async_trait::async_trait]
impl PspAdapter for MockDebitPsp {
    fn provider(&self) -> PspProvider {
        PspProvider::Gocardless
    }

    fn flow(&self) -> PaymentFlow {
        PaymentFlow::MandateDebit
    }

    async fn create_mandate_charge(&self, req: MandateChargeRequest) -> Result<ChargeIntent> {
        assert!(!req.mandate_reference.is_empty());
        Ok(ChargeIntent {
            psp_session_id: format!("pm-{}", req.session_id),
            sync_outcome: PaymentOutcome::Pending,
        })
    }

    fn verify_signature(
        &self,
        _raw_body: &[u8],
        signature: &str,
        _headers: &HashMap<String, String>,
    ) -> Result<()> {
        verify_mock_signature(signature)
    }

    fn parse_event(&self, raw_body: &str) -> Result<ProviderEvent> {
        parse_mock_event(raw_body)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test rig
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Rig {
    psp: PspGateway,
    sessions: Arc<SessionManager>,
    mandates: Arc<MandateStore>,
    inbox: Arc<WebhookInbox>,
    card: Arc<MockCardPsp>,
}

fn rig_with_origins(allowed_origins: Vec<String>) -> Rig {
    let mut config = Config::default();
    config.portal.allowed_redirect_origins = allowed_origins;
    let config = Arc::new(config);

    let sessions = Arc::new(SessionManager::new(
        Arc::new(SessionStore::new()),
        Arc::new(AuditLog::new()),
        SessionDefaults::default(),
    ));
    let mandates = Arc::new(MandateStore::new());
    let card = Arc::new(MockCardPsp::new());
    let providers = Arc::new(ProviderRegistry::with_adapters(vec![
        card.clone() as Arc<dyn PspAdapter>,
        Arc::new(MockDebitPsp) as Arc<dyn PspAdapter>,
    ]));
    let inbox = Arc::new(WebhookInbox::new());

    let psp = PspGateway::new(
        config,
        sessions.clone(),
        mandates.clone(),
        providers,
        inbox.clone(),
    );

    Rig {
        psp,
        sessions,
        mandates,
        inbox,
        card,
    }
}

fn rig() -> Rig {
    rig_with_origins(vec![])
}

fn create_params(actions: Vec<SessionAction>) -> CreateSessionParams {
    CreateSessionParams {
        organisation_id: Uuid::new_v4(),
        merchant_id: Uuid::new_v4(),
        customer_id: Uuid::new_v4(),
        contract_id: None,
        mandate_id: None,
        amount_cents: 15_000,
        currency: "EUR".into(),
        description: None,
        allowed_actions: actions,
        ttl_secs: None,
        max_uses: None,
        metadata: BTreeMap::new(),
    }
}

fn webhook_body(event_id: &str, psp_session_id: &str, outcome: &str) -> String {
    serde_json::json!({
        "event_id": event_id,
        "psp_session_id": psp_session_id,
        "outcome": outcome,
    })
    .to_string()
}

async fn deliver(rig: &Rig, provider: &str, body: &str, signature: &str) -> WebhookStatus {
    rig.psp
        .handle_webhook(provider, body.as_bytes(), signature, &HashMap::new())
        .await
        .status
}

fn settled_events(rig: &Rig, session_id: Uuid) -> usize {
    rig.sessions
        .session_audit(session_id, Pagination::default())
        .unwrap()
        .items
        .iter()
        .filter(|e| {
            matches!(
                e.event_type,
                AuditEventType::PaymentCompleted | AuditEventType::PaymentFailed
            )
        })
        .count()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Card redirect flow
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn card_happy_path_settles_through_the_webhook() {
    let rig = rig();
    let (created, token) = rig
        .sessions
        .create_session(create_params(vec![SessionAction::PayByCard]))
        .unwrap();
    rig.sessions.access_session(&token).unwrap();

    let outcome = rig
        .psp
        .start_redirect(
            &token,
            SessionAction::PayByCard,
            "https://shop.example/ok",
            "https://shop.example/ko",
        )
        .await
        .unwrap();
    assert_eq!(outcome.session.status, SessionStatus::Redirected);
    assert!(outcome.redirect_url.as_deref().unwrap().contains("hosted"));

    let body = webhook_body("evt-1", &outcome.psp_session_id, "succeeded");
    assert_eq!(
        deliver(&rig, "multisafepay", &body, "valid").await,
        WebhookStatus::Processed
    );

    let session = rig.sessions.get(created.id).unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.use_count, 1);
    assert!(session.consumed_at.is_some());

    // Webhook arrived first, so the browser return reports confirmation.
    let state = session.psp_state.clone().unwrap();
    let ret = rig.psp.handle_return(&state, &BTreeMap::new()).unwrap();
    assert!(ret.payment_confirmed);
    assert!(!ret.pending_confirmation);
}

#[tokio::test]
async fn return_before_webhook_is_pending_not_failed() {
    let rig = rig();
    let (created, token) = rig
        .sessions
        .create_session(create_params(vec![SessionAction::PayByCard]))
        .unwrap();
    rig.sessions.access_session(&token).unwrap();
    let outcome = rig
        .psp
        .start_redirect(
            &token,
            SessionAction::PayByCard,
            "https://shop.example/ok",
            "https://shop.example/ko",
        )
        .await
        .unwrap();

    let state = outcome.session.psp_state.clone().unwrap();
    let ret = rig.psp.handle_return(&state, &BTreeMap::new()).unwrap();
    assert!(!ret.payment_confirmed);
    assert!(ret.pending_confirmation);

    // The webhook is the sole source of truth and settles it afterwards.
    let body = webhook_body("evt-2", &outcome.psp_session_id, "succeeded");
    deliver(&rig, "multisafepay", &body, "valid").await;

    let ret = rig.psp.handle_return(&state, &BTreeMap::new()).unwrap();
    assert!(ret.payment_confirmed);
    assert_eq!(
        rig.sessions.get(created.id).unwrap().status,
        SessionStatus::Completed
    );
}

#[tokio::test]
async fn failed_webhook_reports_a_failed_return() {
    let rig = rig();
    let (created, token) = rig
        .sessions
        .create_session(create_params(vec![SessionAction::PayByCard]))
        .unwrap();
    rig.sessions.access_session(&token).unwrap();
    let outcome = rig
        .psp
        .start_redirect(
            &token,
            SessionAction::PayByCard,
            "https://shop.example/ok",
            "https://shop.example/ko",
        )
        .await
        .unwrap();

    let body = webhook_body("evt-3", &outcome.psp_session_id, "failed");
    deliver(&rig, "multisafepay", &body, "valid").await;

    let session = rig.sessions.get(created.id).unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.use_count, 1);

    let state = session.psp_state.clone().unwrap();
    let ret = rig.psp.handle_return(&state, &BTreeMap::new()).unwrap();
    assert!(!ret.payment_confirmed);
    assert!(!ret.pending_confirmation);
}

#[tokio::test]
async fn unknown_return_state_is_rejected() {
    let rig = rig();
    assert!(matches!(
        rig.psp.handle_return("no-such-state", &BTreeMap::new()),
        Err(Error::NotFound)
    ));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Webhook idempotency and verification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn duplicate_webhook_delivery_has_exactly_one_effect() {
    let rig = rig();
    let (created, token) = rig
        .sessions
        .create_session(create_params(vec![SessionAction::PayByCard]))
        .unwrap();
    rig.sessions.access_session(&token).unwrap();
    let outcome = rig
        .psp
        .start_redirect(
            &token,
            SessionAction::PayByCard,
            "https://shop.example/ok",
            "https://shop.example/ko",
        )
        .await
        .unwrap();

    let body = webhook_body("evt-dup", &outcome.psp_session_id, "succeeded");
    assert_eq!(
        deliver(&rig, "multisafepay", &body, "valid").await,
        WebhookStatus::Processed
    );
    assert_eq!(
        deliver(&rig, "multisafepay", &body, "valid").await,
        WebhookStatus::Duplicate
    );
    assert_eq!(
        deliver(&rig, "multisafepay", &body, "valid").await,
        WebhookStatus::Duplicate
    );

    let session = rig.sessions.get(created.id).unwrap();
    assert_eq!(session.use_count, 1);
    assert_eq!(settled_events(&rig, created.id), 1);
    assert_eq!(rig.inbox.len(), 1);
}

#[tokio::test]
async fn forged_signature_leaves_no_trace() {
    let rig = rig();
    let (created, token) = rig
        .sessions
        .create_session(create_params(vec![SessionAction::PayByCard]))
        .unwrap();
    rig.sessions.access_session(&token).unwrap();
    let outcome = rig
        .psp
        .start_redirect(
            &token,
            SessionAction::PayByCard,
            "https://shop.example/ok",
            "https://shop.example/ko",
        )
        .await
        .unwrap();

    let body = webhook_body("evt-forged", &outcome.psp_session_id, "succeeded");
    let ack = rig
        .psp
        .handle_webhook("multisafepay", body.as_bytes(), "forged", &HashMap::new())
        .await;
    assert_eq!(ack.status, WebhookStatus::Rejected);
    assert!(!ack.acknowledged);

    // No ledger row, no session movement.
    assert!(rig.inbox.is_empty());
    assert_eq!(
        rig.sessions.get(created.id).unwrap().status,
        SessionStatus::Redirected
    );
}

#[tokio::test]
async fn webhook_for_unknown_provider_is_rejected() {
    let rig = rig();
    let ack = rig
        .psp
        .handle_webhook("stripe", b"{}", "valid", &HashMap::new())
        .await;
    assert_eq!(ack.status, WebhookStatus::Rejected);
    assert!(rig.inbox.is_empty());
}

#[tokio::test]
async fn pending_and_unknown_events_acknowledge_without_moving_the_session() {
    let rig = rig();
    let (created, token) = rig
        .sessions
        .create_session(create_params(vec![SessionAction::PayByCard]))
        .unwrap();
    rig.sessions.access_session(&token).unwrap();
    let outcome = rig
        .psp
        .start_redirect(
            &token,
            SessionAction::PayByCard,
            "https://shop.example/ok",
            "https://shop.example/ko",
        )
        .await
        .unwrap();

    let pending = webhook_body("evt-p", &outcome.psp_session_id, "pending");
    assert_eq!(
        deliver(&rig, "multisafepay", &pending, "valid").await,
        WebhookStatus::Processed
    );

    // Forward compatibility: event types this engine does not act on.
    let odd = webhook_body("evt-o", &outcome.psp_session_id, "subscription_renewed");
    assert_eq!(
        deliver(&rig, "multisafepay", &odd, "valid").await,
        WebhookStatus::Processed
    );

    assert_eq!(
        rig.sessions.get(created.id).unwrap().status,
        SessionStatus::Redirected
    );
}

#[tokio::test]
async fn contradictory_event_after_terminal_state_is_flagged_not_applied() {
    let rig = rig();
    let (created, token) = rig
        .sessions
        .create_session(create_params(vec![SessionAction::PayByCard]))
        .unwrap();
    rig.sessions.access_session(&token).unwrap();
    let outcome = rig
        .psp
        .start_redirect(
            &token,
            SessionAction::PayByCard,
            "https://shop.example/ok",
            "https://shop.example/ko",
        )
        .await
        .unwrap();

    let ok = webhook_body("evt-a", &outcome.psp_session_id, "succeeded");
    deliver(&rig, "multisafepay", &ok, "valid").await;

    // A later event contradicts the recorded terminal state.
    let contradiction = webhook_body("evt-b", &outcome.psp_session_id, "failed");
    assert_eq!(
        deliver(&rig, "multisafepay", &contradiction, "valid").await,
        WebhookStatus::Processed
    );

    let session = rig.sessions.get(created.id).unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.use_count, 1);

    let row = rig.inbox.find(PspProvider::Multisafepay, "evt-b").unwrap();
    assert_eq!(row.status, InboxStatus::Processed);
    assert!(row.error.as_deref().unwrap().contains("conflict"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider failures and URL validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn provider_outage_leaves_the_session_retryable() {
    let rig = rig();
    let (created, token) = rig
        .sessions
        .create_session(create_params(vec![SessionAction::PayByCard]))
        .unwrap();
    rig.sessions.access_session(&token).unwrap();

    rig.card.fail_next_create.store(true, Ordering::SeqCst);
    let err = rig
        .psp
        .start_redirect(
            &token,
            SessionAction::PayByCard,
            "https://shop.example/ok",
            "https://shop.example/ko",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProviderUnavailable { .. }));

    // No transition was recorded, so the retry goes through cleanly.
    let session = rig.sessions.get(created.id).unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert!(session.psp_state.is_none());

    let retry = rig
        .psp
        .start_redirect(
            &token,
            SessionAction::PayByCard,
            "https://shop.example/ok",
            "https://shop.example/ko",
        )
        .await
        .unwrap();
    assert_eq!(retry.session.status, SessionStatus::Redirected);
}

#[tokio::test]
async fn return_urls_outside_the_allowlist_are_rejected() {
    let rig = rig_with_origins(vec!["https://shop.example".into()]);
    let (created, token) = rig
        .sessions
        .create_session(create_params(vec![SessionAction::PayByCard]))
        .unwrap();
    rig.sessions.access_session(&token).unwrap();

    let err = rig
        .psp
        .start_redirect(
            &token,
            SessionAction::PayByCard,
            "https://evil.example/ok",
            "https://shop.example/ko",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(
        rig.sessions.get(created.id).unwrap().status,
        SessionStatus::Active
    );

    assert!(rig
        .psp
        .start_redirect(
            &token,
            SessionAction::PayByCard,
            "https://shop.example/pay/ok",
            "https://shop.example/pay/ko",
        )
        .await
        .is_ok());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mandate debit flow
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn mandate_debit_settles_via_webhook_with_no_browser_step() {
    let rig = rig();
    let (created, token) = rig
        .sessions
        .create_session(create_params(vec![SessionAction::PayByBankDebit]))
        .unwrap();

    rig.mandates.insert(Mandate {
        id: Uuid::new_v4(),
        merchant_id: created.merchant_id,
        customer_id: created.customer_id,
        provider: PspProvider::Gocardless,
        reference: "MD0007".into(),
        reference_masked: "FR76 **** 0007".into(),
        status: MandateStatus::Active,
        created_at: Utc::now(),
    });

    rig.sessions.access_session(&token).unwrap();
    let outcome = rig
        .psp
        .start_redirect(
            &token,
            SessionAction::PayByBankDebit,
            "https://shop.example/ok",
            "https://shop.example/ko",
        )
        .await
        .unwrap();

    assert!(outcome.redirect_url.is_none());
    assert_eq!(outcome.session.status, SessionStatus::Redirected);

    let body = webhook_body("EV1", &outcome.psp_session_id, "succeeded");
    assert_eq!(
        deliver(&rig, "gocardless", &body, "valid").await,
        WebhookStatus::Processed
    );
    assert_eq!(
        rig.sessions.get(created.id).unwrap().status,
        SessionStatus::Completed
    );
}

#[tokio::test]
async fn missing_mandate_fails_without_touching_the_session() {
    let rig = rig();
    let (created, token) = rig
        .sessions
        .create_session(create_params(vec![SessionAction::PayByBankDebit]))
        .unwrap();
    rig.sessions.access_session(&token).unwrap();

    let err = rig
        .psp
        .start_redirect(
            &token,
            SessionAction::PayByBankDebit,
            "https://shop.example/ok",
            "https://shop.example/ko",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoActiveMandate));

    let session = rig.sessions.get(created.id).unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert!(session.psp_session_id.is_none());
}
