//! The portal payment session entity and its state machine.
//!
//! A session is the unit of work for one customer-facing payment attempt.
//! Status moves `Created -> Active -> Redirected -> {Completed | Failed}`;
//! any non-terminal status may also move to `Expired` (time based) or
//! `Cancelled` (explicit). Terminal statuses have no outgoing transitions.
//! Every mutation goes through the store's guarded transition, which
//! consults [`SessionStatus::can_transition_to`] against the value read
//! under the write lock.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pp_domain::payment::PspProvider;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    Active,
    Redirected,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl SessionStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Expired | Self::Cancelled
        )
    }

    /// Pure transition check consulted before every status write.
    ///
    /// An illegal transition is rejected by the caller, never coerced.
    pub fn can_transition_to(self, target: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, target) {
            (Self::Created, Self::Active) => true,
            (Self::Active, Self::Redirected) => true,
            (Self::Redirected, Self::Completed | Self::Failed) => true,
            // Any non-terminal state can expire or be cancelled.
            (_, Self::Expired | Self::Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Active => "ACTIVE",
            Self::Redirected => "REDIRECTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the customer is allowed to do with a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionAction {
    PayByCard,
    PayByBankDebit,
}

impl SessionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PayByCard => "PAY_BY_CARD",
            Self::PayByBankDebit => "PAY_BY_BANK_DEBIT",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One customer-facing payment attempt.
///
/// Holds only the token's SHA-256 hash, never the raw token. Terminal
/// sessions are retained indefinitely for audit and dispute resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalSession {
    pub id: Uuid,
    pub organisation_id: Uuid,
    pub merchant_id: Uuid,
    pub customer_id: Uuid,
    pub contract_id: Option<Uuid>,
    pub mandate_id: Option<Uuid>,

    /// Amount in integer minor units (cents).
    pub amount_cents: i64,
    /// ISO 4217 code, e.g. `"EUR"`.
    pub currency: String,
    pub description: Option<String>,
    pub allowed_actions: Vec<SessionAction>,

    pub status: SessionStatus,

    /// Hex SHA-256 of the bearer token. Unique across all sessions.
    pub token_hash: String,
    pub token_version: String,

    pub use_count: u32,
    pub max_uses: u32,
    /// Set once the final permitted settlement has happened.
    pub consumed_at: Option<DateTime<Utc>>,

    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,

    /// Correlation value minted at redirect time. Matches the browser's
    /// return call to this session without trusting client-supplied ids.
    /// Rotated whenever a new redirect attempt starts.
    pub psp_state: Option<String>,
    pub psp_provider: Option<PspProvider>,
    pub psp_session_id: Option<String>,
    pub psp_redirect_url: Option<String>,

    pub metadata: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PortalSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Whether another settlement is still permitted.
    pub fn can_consume(&self) -> bool {
        self.use_count < self.max_uses && self.consumed_at.is_none()
    }

    pub fn has_action(&self, action: SessionAction) -> bool {
        self.allowed_actions.contains(&action)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::SessionStatus::*;
    use super::*;

    const ALL: [SessionStatus; 7] = [
        Created, Active, Redirected, Completed, Failed, Expired, Cancelled,
    ];

    #[test]
    fn created_moves_to_active_only_among_progress_states() {
        assert!(Created.can_transition_to(Active));
        assert!(!Created.can_transition_to(Redirected));
        assert!(!Created.can_transition_to(Completed));
        assert!(!Created.can_transition_to(Failed));
    }

    #[test]
    fn active_moves_to_redirected_only_among_progress_states() {
        assert!(Active.can_transition_to(Redirected));
        assert!(!Active.can_transition_to(Created));
        assert!(!Active.can_transition_to(Completed));
        assert!(!Active.can_transition_to(Failed));
    }

    #[test]
    fn redirected_settles_to_completed_or_failed() {
        assert!(Redirected.can_transition_to(Completed));
        assert!(Redirected.can_transition_to(Failed));
        assert!(!Redirected.can_transition_to(Active));
        assert!(!Redirected.can_transition_to(Created));
    }

    #[test]
    fn every_non_terminal_state_can_expire_and_cancel() {
        for from in [Created, Active, Redirected] {
            assert!(from.can_transition_to(Expired), "{from} -> EXPIRED");
            assert!(from.can_transition_to(Cancelled), "{from} -> CANCELLED");
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn no_state_transitions_to_itself() {
        for s in ALL {
            assert!(!s.can_transition_to(s));
        }
    }

    #[test]
    fn consumption_latch() {
        let now = Utc::now();
        let mut session = PortalSession {
            id: Uuid::new_v4(),
            organisation_id: Uuid::new_v4(),
            merchant_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            contract_id: None,
            mandate_id: None,
            amount_cents: 1000,
            currency: "EUR".into(),
            description: None,
            allowed_actions: vec![SessionAction::PayByCard],
            status: Active,
            token_hash: "h".into(),
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
        };

        assert!(session.can_consume());
        session.use_count = 1;
        session.consumed_at = Some(now);
        assert!(!session.can_consume());
    }
}
