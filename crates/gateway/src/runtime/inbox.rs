//! Webhook inbox, the idempotency ledger for inbound PSP events.
//!
//! PSPs deliver at least once, out of order, and retry on timeouts. The
//! inbox turns that stream into exactly-once side effects: one row per
//! distinct `(provider, event_id)`, claimed by a single constrained
//! insert under one lock. Rows are never deleted; they are the replay
//! evidence for disputes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pp_domain::payment::{Page, Pagination, PspProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboxStatus {
    Received,
    Verified,
    Processed,
    Failed,
}

/// One record per distinct provider event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEntry {
    pub id: Uuid,
    pub provider: PspProvider,
    /// Provider-native event id; unique together with `provider`.
    pub event_id: String,
    pub event_type: String,
    pub raw_payload: String,
    pub signature: Option<String>,
    pub status: InboxStatus,
    /// Resolved lazily once processing identifies the session.
    pub session_id: Option<Uuid>,
    /// Processing note: failure reason or reconciliation alert.
    pub error: Option<String>,
    /// How many redeliveries of this event arrived after the first.
    pub duplicate_count: u32,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Outcome of the constrained insert.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// This call claimed the event; side effects may run exactly once.
    First(InboxEntry),
    /// The event was seen before; no further side effect is permitted.
    Duplicate(InboxEntry),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbox
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Inner {
    by_key: HashMap<(PspProvider, String), Uuid>,
    rows: HashMap<Uuid, InboxEntry>,
}

#[derive(Default)]
pub struct WebhookInbox {
    inner: Mutex<Inner>,
}

impl WebhookInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an event or report it as already seen.
    ///
    /// This is the sole deduplication point: key check and insert happen
    /// under one lock acquisition, never as check-then-insert across two.
    /// A duplicate bumps the redelivery counter on the stored row but
    /// changes nothing else.
    pub fn insert_first(
        &self,
        provider: PspProvider,
        event_id: &str,
        event_type: &str,
        raw_payload: &str,
        signature: Option<String>,
    ) -> Delivery {
        let mut inner = self.inner.lock();

        if let Some(existing_id) = inner.by_key.get(&(provider, event_id.to_owned())).copied() {
            let row = inner
                .rows
                .get_mut(&existing_id)
                .expect("index points at a stored row");
            row.duplicate_count += 1;
            return Delivery::Duplicate(row.clone());
        }

        let entry = InboxEntry {
            id: Uuid::new_v4(),
            provider,
            event_id: event_id.to_owned(),
            event_type: event_type.to_owned(),
            raw_payload: raw_payload.to_owned(),
            signature,
            status: InboxStatus::Received,
            session_id: None,
            error: None,
            duplicate_count: 0,
            received_at: Utc::now(),
            processed_at: None,
        };
        inner
            .by_key
            .insert((provider, event_id.to_owned()), entry.id);
        inner.rows.insert(entry.id, entry.clone());
        Delivery::First(entry)
    }

    pub fn mark_verified(&self, id: Uuid) {
        let mut inner = self.inner.lock();
        if let Some(row) = inner.rows.get_mut(&id) {
            row.status = InboxStatus::Verified;
        }
    }

    /// Processing finished; link the session when one was resolved and
    /// keep an optional note (e.g. a reconciliation alert).
    pub fn mark_processed(&self, id: Uuid, session_id: Option<Uuid>, note: Option<String>) {
        let mut inner = self.inner.lock();
        if let Some(row) = inner.rows.get_mut(&id) {
            row.status = InboxStatus::Processed;
            row.session_id = session_id;
            row.error = note;
            row.processed_at = Some(Utc::now());
        }
    }

    pub fn mark_failed(&self, id: Uuid, error: String) {
        let mut inner = self.inner.lock();
        if let Some(row) = inner.rows.get_mut(&id) {
            row.status = InboxStatus::Failed;
            row.error = Some(error);
            row.processed_at = Some(Utc::now());
        }
    }

    pub fn get(&self, id: Uuid) -> Option<InboxEntry> {
        self.inner.lock().rows.get(&id).cloned()
    }

    pub fn find(&self, provider: PspProvider, event_id: &str) -> Option<InboxEntry> {
        let inner = self.inner.lock();
        let id = inner.by_key.get(&(provider, event_id.to_owned()))?;
        inner.rows.get(id).cloned()
    }

    /// Ledger listing for ops inspection, newest first.
    pub fn list(&self, pagination: Pagination) -> Page<InboxEntry> {
        let mut all: Vec<InboxEntry> = self.inner.lock().rows.values().cloned().collect();
        all.sort_by(|a, b| b.received_at.cmp(&a.received_at).then(a.id.cmp(&b.id)));
        Page::from_slice(all, pagination)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().rows.is_empty()
    }
}
