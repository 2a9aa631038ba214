//! Append-only audit trail of session lifecycle events.
//!
//! Every state transition writes exactly one event. Events are immutable
//! facts; the log exposes no update or delete operation.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pp_domain::payment::{Page, Pagination};

use crate::session::SessionStatus;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    SessionCreated,
    SessionAccessed,
    SessionActivated,
    RedirectInitiated,
    CallbackReceived,
    WebhookReceived,
    PaymentCompleted,
    PaymentFailed,
    SessionExpired,
    SessionCancelled,
}

/// Who caused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditActor {
    /// The customer's browser, authenticated by the bearer token.
    PortalToken,
    /// A merchant-side caller on the admin API.
    Admin,
    /// An inbound provider webhook.
    Webhook,
    /// The engine itself (creation, expiry sweep).
    System,
}

/// One immutable audit fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub event_type: AuditEventType,
    pub actor: AuditActor,
    pub previous_status: Option<SessionStatus>,
    pub new_status: Option<SessionStatus>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory audit log, events grouped per session in arrival order.
#[derive(Default)]
pub struct AuditLog {
    events: RwLock<HashMap<Uuid, Vec<AuditEvent>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one event. Returns the stored copy.
    pub fn append(
        &self,
        session_id: Uuid,
        event_type: AuditEventType,
        actor: AuditActor,
        previous_status: Option<SessionStatus>,
        new_status: Option<SessionStatus>,
        data: BTreeMap<String, String>,
    ) -> AuditEvent {
        let event = AuditEvent {
            id: Uuid::new_v4(),
            session_id,
            event_type,
            actor,
            previous_status,
            new_status,
            data,
            created_at: Utc::now(),
        };
        self.events
            .write()
            .entry(session_id)
            .or_default()
            .push(event.clone());
        event
    }

    /// Events for one session, oldest first.
    pub fn for_session(&self, session_id: Uuid, pagination: Pagination) -> Page<AuditEvent> {
        let all = self
            .events
            .read()
            .get(&session_id)
            .cloned()
            .unwrap_or_default();
        Page::from_slice(all, pagination)
    }

    /// Count of events of a given type for one session.
    pub fn count_of(&self, session_id: Uuid, event_type: AuditEventType) -> usize {
        self.events
            .read()
            .get(&session_id)
            .map(|v| v.iter().filter(|e| e.event_type == event_type).count())
            .unwrap_or(0)
    }
}
