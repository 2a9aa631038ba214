//! Session lifecycle operations.
//!
//! The manager owns the session store, the audit log, and the token codec,
//! and is the only place that moves sessions through their state machine.
//! The PSP orchestration in the gateway calls into it; nothing here talks
//! to a provider.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use pp_domain::error::{Error, Result};
use pp_domain::payment::{Page, Pagination, PspProvider};

use crate::audit::{AuditActor, AuditEvent, AuditEventType, AuditLog};
use crate::session::{PortalSession, SessionAction, SessionStatus};
use crate::store::{SessionFilter, SessionStore};
use crate::token::{TokenCodec, TOKEN_VERSION};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Engine-level defaults applied when a creation request leaves a knob
/// unset. Wired from `portal.*` config by the gateway.
#[derive(Debug, Clone, Copy)]
pub struct SessionDefaults {
    pub ttl_secs: u64,
    pub max_uses: u32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            ttl_secs: 900,
            max_uses: 1,
        }
    }
}

/// Merchant-side request to create a session.
#[derive(Debug, Clone)]
pub struct CreateSessionParams {
    pub organisation_id: Uuid,
    pub merchant_id: Uuid,
    pub customer_id: Uuid,
    pub contract_id: Option<Uuid>,
    pub mandate_id: Option<Uuid>,
    pub amount_cents: i64,
    pub currency: String,
    pub description: Option<String>,
    pub allowed_actions: Vec<SessionAction>,
    pub ttl_secs: Option<u64>,
    pub max_uses: Option<u32>,
    pub metadata: BTreeMap<String, String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionManager {
    store: Arc<SessionStore>,
    audit: Arc<AuditLog>,
    codec: TokenCodec,
    defaults: SessionDefaults,
}

impl SessionManager {
    pub fn new(store: Arc<SessionStore>, audit: Arc<AuditLog>, defaults: SessionDefaults) -> Self {
        Self {
            store,
            audit,
            codec: TokenCodec,
            defaults,
        }
    }

    // ── Creation ───────────────────────────────────────────────────

    /// Create a session and return it together with the raw bearer token.
    /// The raw token is not retained anywhere; this is the caller's only
    /// chance to see it.
    pub fn create_session(&self, params: CreateSessionParams) -> Result<(PortalSession, String)> {
        if params.amount_cents <= 0 {
            return Err(Error::Validation("amount_cents must be positive".into()));
        }
        if params.currency.len() != 3 || !params.currency.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(Error::Validation(
                "currency must be a 3-letter ISO 4217 code".into(),
            ));
        }
        if params.allowed_actions.is_empty() {
            return Err(Error::Validation(
                "at least one allowed action is required".into(),
            ));
        }

        let token = self.codec.issue();
        let ttl_secs = params.ttl_secs.unwrap_or(self.defaults.ttl_secs);
        let max_uses = params.max_uses.unwrap_or(self.defaults.max_uses);
        let now = Utc::now();

        let session = PortalSession {
            id: Uuid::new_v4(),
            organisation_id: params.organisation_id,
            merchant_id: params.merchant_id,
            customer_id: params.customer_id,
            contract_id: params.contract_id,
            mandate_id: params.mandate_id,
            amount_cents: params.amount_cents,
            currency: params.currency.to_ascii_uppercase(),
            description: params.description,
            allowed_actions: params.allowed_actions,
            status: SessionStatus::Created,
            token_hash: token.hash.clone(),
            token_version: TOKEN_VERSION.into(),
            use_count: 0,
            max_uses,
            consumed_at: None,
            expires_at: now + chrono::Duration::seconds(ttl_secs as i64),
            last_accessed_at: None,
            psp_state: None,
            psp_provider: None,
            psp_session_id: None,
            psp_redirect_url: None,
            metadata: params.metadata,
            created_at: now,
            updated_at: now,
        };

        self.store.insert(session.clone())?;
        self.audit.append(
            session.id,
            AuditEventType::SessionCreated,
            AuditActor::System,
            None,
            Some(SessionStatus::Created),
            BTreeMap::from([
                ("ttl_secs".into(), ttl_secs.to_string()),
                ("max_uses".into(), max_uses.to_string()),
                ("amount_cents".into(), session.amount_cents.to_string()),
                ("currency".into(), session.currency.clone()),
            ]),
        );

        tracing::info!(
            session_id = %session.id,
            customer_id = %session.customer_id,
            amount_cents = session.amount_cents,
            "portal session created"
        );

        Ok((session, token.raw))
    }

    // ── Token resolution ───────────────────────────────────────────

    /// Resolve a raw token to a live (non-terminal, non-expired) session
    /// without touching its state.
    fn resolve_live(&self, raw_token: &str) -> Result<PortalSession> {
        if !TokenCodec::validate_format(raw_token) {
            return Err(Error::Validation("malformed token".into()));
        }
        let session = self
            .store
            .find_by_token_hash(&TokenCodec::hash(raw_token))
            .ok_or(Error::NotFound)?;

        if session.status == SessionStatus::Expired {
            return Err(Error::Expired);
        }
        if session.status.is_terminal() {
            return Err(Error::Terminal);
        }
        if session.is_expired(Utc::now()) {
            // Lazy expiry: the sweep has not come around yet.
            self.expire_session(session.id);
            return Err(Error::Expired);
        }
        Ok(session)
    }

    /// Customer opens the portal link.
    ///
    /// `Created -> Active` on first access; idempotent afterwards (a
    /// repeat access only touches `last_accessed_at`).
    pub fn access_session(&self, raw_token: &str) -> Result<PortalSession> {
        let session = self.resolve_live(raw_token)?;
        let now = Utc::now();

        if session.status == SessionStatus::Created {
            let moved = self.store.transition(session.id, SessionStatus::Active, |row| {
                row.last_accessed_at = Some(now);
            })?;
            self.audit.append(
                session.id,
                AuditEventType::SessionActivated,
                AuditActor::PortalToken,
                Some(moved.previous),
                Some(SessionStatus::Active),
                BTreeMap::new(),
            );
            tracing::info!(session_id = %session.id, "portal session activated");
            Ok(moved.session)
        } else {
            let updated = self.store.update(session.id, |row| {
                row.last_accessed_at = Some(now);
            })?;
            self.audit.append(
                session.id,
                AuditEventType::SessionAccessed,
                AuditActor::PortalToken,
                None,
                None,
                BTreeMap::new(),
            );
            Ok(updated)
        }
    }

    /// Guard a redirect attempt: the session must be `Active`, allow the
    /// requested action, and still have a settlement left. No state is
    /// changed here; `mark_redirected` runs after the provider call
    /// succeeds, so a provider timeout leaves the session retryable.
    pub fn authorize_redirect(
        &self,
        raw_token: &str,
        action: SessionAction,
    ) -> Result<PortalSession> {
        let session = self.resolve_live(raw_token)?;

        if session.status != SessionStatus::Active {
            return Err(Error::IllegalTransition {
                from: session.status.to_string(),
                to: SessionStatus::Redirected.to_string(),
            });
        }
        if !session.has_action(action) {
            return Err(Error::Validation(format!(
                "action {} not allowed for this session",
                action.as_str()
            )));
        }
        if !session.can_consume() {
            return Err(Error::Validation("session already consumed".into()));
        }
        Ok(session)
    }

    /// Mint a fresh redirect correlation state.
    pub fn mint_state(&self) -> String {
        self.codec.mint_state()
    }

    /// Record a successful provider handoff: `Active -> Redirected` with
    /// the provider coordinates and a fresh `psp_state` (any previous
    /// value is rotated out).
    pub fn mark_redirected(
        &self,
        id: Uuid,
        provider: PspProvider,
        psp_session_id: String,
        redirect_url: Option<String>,
        psp_state: String,
    ) -> Result<PortalSession> {
        let moved = self
            .store
            .transition(id, SessionStatus::Redirected, |row| {
                row.psp_provider = Some(provider);
                row.psp_session_id = Some(psp_session_id.clone());
                row.psp_redirect_url = redirect_url.clone();
                row.psp_state = Some(psp_state.clone());
            })?;
        self.audit.append(
            id,
            AuditEventType::RedirectInitiated,
            AuditActor::PortalToken,
            Some(moved.previous),
            Some(SessionStatus::Redirected),
            BTreeMap::from([
                ("psp_provider".into(), provider.to_string()),
                ("psp_session_id".into(), psp_session_id),
            ]),
        );
        tracing::info!(
            session_id = %id,
            provider = %provider,
            "redirect initiated"
        );
        Ok(moved.session)
    }

    // ── Settlement ─────────────────────────────────────────────────

    /// Settle a redirected session as paid. Bumps the use counter and
    /// latches `consumed_at` once the last permitted use is spent.
    pub fn complete_payment(
        &self,
        id: Uuid,
        actor: AuditActor,
        data: BTreeMap<String, String>,
    ) -> Result<PortalSession> {
        self.settle(id, SessionStatus::Completed, AuditEventType::PaymentCompleted, actor, data)
    }

    /// Settle a redirected session as failed. Consumes a use exactly like
    /// a completion: the attempt happened.
    pub fn fail_payment(
        &self,
        id: Uuid,
        actor: AuditActor,
        data: BTreeMap<String, String>,
    ) -> Result<PortalSession> {
        self.settle(id, SessionStatus::Failed, AuditEventType::PaymentFailed, actor, data)
    }

    fn settle(
        &self,
        id: Uuid,
        target: SessionStatus,
        event_type: AuditEventType,
        actor: AuditActor,
        data: BTreeMap<String, String>,
    ) -> Result<PortalSession> {
        let now = Utc::now();
        let moved = self.store.transition(id, target, |row| {
            row.use_count += 1;
            if row.use_count >= row.max_uses {
                row.consumed_at = Some(now);
            }
        })?;
        self.audit.append(
            id,
            event_type,
            actor,
            Some(moved.previous),
            Some(target),
            data,
        );
        tracing::info!(
            session_id = %id,
            status = %target,
            use_count = moved.session.use_count,
            "payment settled"
        );
        Ok(moved.session)
    }

    // ── Cancellation and expiry ────────────────────────────────────

    /// Explicit, caller-initiated cancellation of a non-terminal session.
    /// Does not touch any in-flight provider call.
    pub fn cancel_session(&self, id: Uuid, reason: Option<String>) -> Result<PortalSession> {
        let moved = self
            .store
            .transition(id, SessionStatus::Cancelled, |_| {})?;
        let mut data = BTreeMap::new();
        if let Some(reason) = reason {
            data.insert("reason".into(), reason);
        }
        self.audit.append(
            id,
            AuditEventType::SessionCancelled,
            AuditActor::Admin,
            Some(moved.previous),
            Some(SessionStatus::Cancelled),
            data,
        );
        tracing::info!(session_id = %id, "portal session cancelled");
        Ok(moved.session)
    }

    /// Sweep every non-terminal session past its deadline into `Expired`.
    /// Returns the number of sessions moved. Safe to run concurrently
    /// with live traffic: each candidate goes through the guarded
    /// transition, so a session that settled a moment earlier is left
    /// untouched and simply not counted.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> usize {
        let mut expired = 0;
        for id in self.store.expired_non_terminal(now) {
            if self.expire_session(id) {
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::info!(count = expired, "expired stale portal sessions");
        }
        expired
    }

    fn expire_session(&self, id: Uuid) -> bool {
        match self.store.transition(id, SessionStatus::Expired, |_| {}) {
            Ok(moved) => {
                self.audit.append(
                    id,
                    AuditEventType::SessionExpired,
                    AuditActor::System,
                    Some(moved.previous),
                    Some(SessionStatus::Expired),
                    BTreeMap::new(),
                );
                true
            }
            // Lost the race to a settlement or another sweep; nothing to do.
            Err(Error::IllegalTransition { .. }) | Err(Error::NotFound) => false,
            Err(err) => {
                tracing::warn!(session_id = %id, error = %err, "expiry transition failed");
                false
            }
        }
    }

    // ── Queries and bookkeeping ────────────────────────────────────

    pub fn get(&self, id: Uuid) -> Result<PortalSession> {
        self.store.get(id).ok_or(Error::NotFound)
    }

    pub fn find_by_psp_state(&self, state: &str) -> Option<PortalSession> {
        self.store.find_by_psp_state(state)
    }

    pub fn find_by_psp_session(
        &self,
        provider: PspProvider,
        psp_session_id: &str,
    ) -> Option<PortalSession> {
        self.store.find_by_psp_session(provider, psp_session_id)
    }

    pub fn list_sessions(
        &self,
        filter: &SessionFilter,
        pagination: Pagination,
    ) -> Page<PortalSession> {
        self.store.list(filter, pagination)
    }

    pub fn session_audit(&self, id: Uuid, pagination: Pagination) -> Result<Page<AuditEvent>> {
        // Distinguish "unknown session" from "no events yet".
        self.get(id)?;
        Ok(self.audit.for_session(id, pagination))
    }

    /// Record the browser's arrival on the return URL.
    pub fn record_callback(&self, id: Uuid, data: BTreeMap<String, String>) {
        self.audit.append(
            id,
            AuditEventType::CallbackReceived,
            AuditActor::PortalToken,
            None,
            None,
            data,
        );
    }

    /// Record a provider webhook that touched this session.
    pub fn record_webhook(&self, id: Uuid, data: BTreeMap<String, String>) {
        self.audit.append(
            id,
            AuditEventType::WebhookReceived,
            AuditActor::Webhook,
            None,
            None,
            data,
        );
    }
}
