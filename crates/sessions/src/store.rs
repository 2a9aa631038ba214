//! Engine-owned session store.
//!
//! The store is the persistence seam the engine's correctness leans on:
//! status writes happen through [`SessionStore::transition`], which
//! re-checks the transition guard against the row as it exists under the
//! write lock. Two callers racing to move the same session cannot both
//! win; the loser observes the new status and fails without side effects.
//!
//! Secondary indexes (token hash, psp_state, provider session id) are
//! maintained on every write so the webhook and browser-return paths can
//! resolve sessions without scanning.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use pp_domain::error::{Error, Result};
use pp_domain::payment::{Page, Pagination, PspProvider};

use crate::session::{PortalSession, SessionStatus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Listing filter; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub organisation_id: Option<Uuid>,
    pub merchant_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub status: Option<SessionStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl SessionFilter {
    fn matches(&self, s: &PortalSession) -> bool {
        self.organisation_id.is_none_or(|v| s.organisation_id == v)
            && self.merchant_id.is_none_or(|v| s.merchant_id == v)
            && self.customer_id.is_none_or(|v| s.customer_id == v)
            && self.status.is_none_or(|v| s.status == v)
            && self.created_after.is_none_or(|v| s.created_at >= v)
            && self.created_before.is_none_or(|v| s.created_at <= v)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, PortalSession>,
    by_token_hash: HashMap<String, Uuid>,
    by_psp_state: HashMap<String, Uuid>,
    by_psp_session: HashMap<(PspProvider, String), Uuid>,
}

/// A transition that won its guard: the status it moved from plus the
/// row as written.
#[derive(Debug, Clone)]
pub struct Transitioned {
    pub previous: SessionStatus,
    pub session: PortalSession,
}

/// In-memory session store. Rows are never deleted.
#[derive(Default)]
pub struct SessionStore {
    inner: RwLock<Inner>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created session. Rejects a duplicate token hash,
    /// which would break token lookup.
    pub fn insert(&self, session: PortalSession) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.by_token_hash.contains_key(&session.token_hash) {
            return Err(Error::Validation("duplicate token hash".into()));
        }
        inner
            .by_token_hash
            .insert(session.token_hash.clone(), session.id);
        index_psp_fields(&mut inner, &session);
        inner.sessions.insert(session.id, session);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<PortalSession> {
        self.inner.read().sessions.get(&id).cloned()
    }

    pub fn find_by_token_hash(&self, token_hash: &str) -> Option<PortalSession> {
        let inner = self.inner.read();
        let id = inner.by_token_hash.get(token_hash)?;
        inner.sessions.get(id).cloned()
    }

    /// Resolve a browser return by its correlation state.
    ///
    /// The index narrows the candidate; the stored value is then compared
    /// in constant time. Hashing both sides first normalizes lengths so
    /// `ct_eq` always compares 32 bytes.
    pub fn find_by_psp_state(&self, state: &str) -> Option<PortalSession> {
        let inner = self.inner.read();
        let id = inner.by_psp_state.get(state)?;
        let session = inner.sessions.get(id)?;
        let stored = session.psp_state.as_deref()?;
        let a = Sha256::digest(stored.as_bytes());
        let b = Sha256::digest(state.as_bytes());
        bool::from(a.ct_eq(&b)).then(|| session.clone())
    }

    pub fn find_by_psp_session(
        &self,
        provider: PspProvider,
        psp_session_id: &str,
    ) -> Option<PortalSession> {
        let inner = self.inner.read();
        let id = inner
            .by_psp_session
            .get(&(provider, psp_session_id.to_owned()))?;
        inner.sessions.get(id).cloned()
    }

    /// Apply a guarded status transition.
    ///
    /// The guard runs against the row under the write lock, not against
    /// whatever the caller read earlier, so a concurrent winner makes this
    /// call fail with `IllegalTransition` and no side effect.
    pub fn transition<F>(&self, id: Uuid, target: SessionStatus, mutate: F) -> Result<Transitioned>
    where
        F: FnOnce(&mut PortalSession),
    {
        let mut inner = self.inner.write();
        let session = inner.sessions.get_mut(&id).ok_or(Error::NotFound)?;
        let from = session.status;
        if !from.can_transition_to(target) {
            return Err(Error::IllegalTransition {
                from: from.to_string(),
                to: target.to_string(),
            });
        }

        session.status = target;
        mutate(session);
        session.updated_at = Utc::now();
        let snapshot = session.clone();
        index_psp_fields(&mut inner, &snapshot);
        Ok(Transitioned {
            previous: from,
            session: snapshot,
        })
    }

    /// Mutate non-status fields of a session. Status writes must go
    /// through [`SessionStore::transition`].
    pub fn update<F>(&self, id: Uuid, mutate: F) -> Result<PortalSession>
    where
        F: FnOnce(&mut PortalSession),
    {
        let mut inner = self.inner.write();
        let session = inner.sessions.get_mut(&id).ok_or(Error::NotFound)?;
        mutate(session);
        session.updated_at = Utc::now();
        let snapshot = session.clone();
        index_psp_fields(&mut inner, &snapshot);
        Ok(snapshot)
    }

    /// Newest first, filtered and paginated.
    pub fn list(&self, filter: &SessionFilter, pagination: Pagination) -> Page<PortalSession> {
        let mut all: Vec<PortalSession> = self
            .inner
            .read()
            .sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Page::from_slice(all, pagination)
    }

    /// Ids of non-terminal sessions whose deadline has passed.
    pub fn expired_non_terminal(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.inner
            .read()
            .sessions
            .values()
            .filter(|s| !s.status.is_terminal() && s.is_expired(now))
            .map(|s| s.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().sessions.is_empty()
    }
}

/// Keep the psp_state / psp_session_id indexes in step with a row.
/// Stale keys from a rotated psp_state stay in the map but point at a row
/// whose stored value no longer matches, which the constant-time check in
/// `find_by_psp_state` rejects.
fn index_psp_fields(inner: &mut Inner, session: &PortalSession) {
    if let Some(ref state) = session.psp_state {
        inner.by_psp_state.insert(state.clone(), session.id);
    }
    if let (Some(provider), Some(ref psp_id)) = (session.psp_provider, &session.psp_session_id) {
        inner
            .by_psp_session
            .insert((provider, psp_id.clone()), session.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionAction;
    use std::collections::BTreeMap;

    fn session() -> PortalSession {
        let now = Utc::now();
        PortalSession {
            id: Uuid::new_v4(),
            organisation_id: Uuid::new_v4(),
            merchant_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            contract_id: None,
            mandate_id: None,
            amount_cents: 15_000,
            currency: "EUR".into(),
            description: None,
            allowed_actions: vec![SessionAction::PayByCard],
            status: SessionStatus::Created,
            token_hash: Uuid::new_v4().to_string(),
            token_version: "v1".into(),
            use_count: 0,
            max_uses: 1,
            consumed_at: None,
            expires_at: now + chrono::Duration::minutes(15),
            last_accessed_at: None,
            psp_state: None,
            psp_provider: None,
            psp_session_id: None,
            psp_redirect_url: None,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn duplicate_token_hash_is_rejected() {
        let store = SessionStore::new();
        let a = session();
        let mut b = session();
        b.token_hash = a.token_hash.clone();

        store.insert(a).unwrap();
        assert!(matches!(store.insert(b), Err(Error::Validation(_))));
    }

    #[test]
    fn transition_guard_runs_against_current_row() {
        let store = SessionStore::new();
        let s = session();
        let id = s.id;
        store.insert(s).unwrap();

        // First caller wins the CREATED -> ACTIVE move.
        store
            .transition(id, SessionStatus::Active, |_| {})
            .unwrap();

        // Second caller raced on the same stale read and loses cleanly.
        let err = store
            .transition(id, SessionStatus::Active, |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { .. }));
        assert_eq!(store.get(id).unwrap().status, SessionStatus::Active);
    }

    #[test]
    fn failed_transition_applies_no_mutation() {
        let store = SessionStore::new();
        let s = session();
        let id = s.id;
        store.insert(s).unwrap();

        let _ = store.transition(id, SessionStatus::Completed, |row| {
            row.use_count = 99;
        });
        assert_eq!(store.get(id).unwrap().use_count, 0);
    }

    #[test]
    fn psp_state_lookup_follows_rotation() {
        let store = SessionStore::new();
        let s = session();
        let id = s.id;
        store.insert(s).unwrap();
        store
            .transition(id, SessionStatus::Active, |_| {})
            .unwrap();

        store
            .transition(id, SessionStatus::Redirected, |row| {
                row.psp_state = Some("state-one".into());
            })
            .unwrap();
        assert_eq!(store.find_by_psp_state("state-one").unwrap().id, id);

        // Rotation invalidates the old correlation value.
        store
            .update(id, |row| {
                row.psp_state = Some("state-two".into());
            })
            .unwrap();
        assert!(store.find_by_psp_state("state-one").is_none());
        assert_eq!(store.find_by_psp_state("state-two").unwrap().id, id);
    }

    #[test]
    fn psp_session_index_resolves_webhooks() {
        let store = SessionStore::new();
        let s = session();
        let id = s.id;
        store.insert(s).unwrap();
        store
            .transition(id, SessionStatus::Active, |_| {})
            .unwrap();
        store
            .transition(id, SessionStatus::Redirected, |row| {
                row.psp_provider = Some(PspProvider::Multisafepay);
                row.psp_session_id = Some("msp-123".into());
            })
            .unwrap();

        assert_eq!(
            store
                .find_by_psp_session(PspProvider::Multisafepay, "msp-123")
                .unwrap()
                .id,
            id
        );
        assert!(store
            .find_by_psp_session(PspProvider::Gocardless, "msp-123")
            .is_none());
    }

    #[test]
    fn expired_non_terminal_skips_settled_rows() {
        let store = SessionStore::new();
        let now = Utc::now();

        let mut stale = session();
        stale.expires_at = now - chrono::Duration::minutes(1);
        let stale_id = stale.id;
        store.insert(stale).unwrap();

        let mut settled = session();
        settled.expires_at = now - chrono::Duration::minutes(1);
        settled.status = SessionStatus::Completed;
        store.insert(settled).unwrap();

        let mut fresh = session();
        fresh.expires_at = now + chrono::Duration::minutes(10);
        store.insert(fresh).unwrap();

        assert_eq!(store.expired_non_terminal(now), vec![stale_id]);
    }

    #[test]
    fn list_filters_by_customer_and_status() {
        let store = SessionStore::new();
        let customer = Uuid::new_v4();

        let mut a = session();
        a.customer_id = customer;
        store.insert(a).unwrap();

        let b = session();
        store.insert(b).unwrap();

        let page = store.list(
            &SessionFilter {
                customer_id: Some(customer),
                ..Default::default()
            },
            Pagination::default(),
        );
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].customer_id, customer);

        let none = store.list(
            &SessionFilter {
                customer_id: Some(customer),
                status: Some(SessionStatus::Completed),
                ..Default::default()
            },
            Pagination::default(),
        );
        assert_eq!(none.total, 0);
    }
}
