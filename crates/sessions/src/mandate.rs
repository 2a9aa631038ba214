//! Bank-debit mandate registry.
//!
//! Mandate CRUD lives with the merchant-side modules; the engine only
//! needs the lookup that answers "does this customer have a chargeable
//! mandate with this merchant right now".

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use pp_domain::payment::PspProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MandateStatus {
    PendingCustomerApproval,
    Active,
    Suspended,
    Cancelled,
    Expired,
}

/// A customer's standing authorization for recurring bank-debit charges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mandate {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub customer_id: Uuid,
    pub provider: PspProvider,
    /// Provider-native mandate reference, sent with every charge.
    pub reference: String,
    /// Masked bank reference safe to show to the customer.
    pub reference_masked: String,
    pub status: MandateStatus,
    pub created_at: DateTime<Utc>,
}

impl Mandate {
    pub fn is_chargeable(&self) -> bool {
        self.status == MandateStatus::Active
    }
}

/// In-memory mandate registry with the merchant/customer scope lookup.
#[derive(Default)]
pub struct MandateStore {
    mandates: RwLock<HashMap<Uuid, Mandate>>,
}

impl MandateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, mandate: Mandate) {
        self.mandates.write().insert(mandate.id, mandate);
    }

    pub fn get(&self, id: Uuid) -> Option<Mandate> {
        self.mandates.read().get(&id).cloned()
    }

    /// The newest active mandate for this merchant/customer pair, if any.
    pub fn find_active(&self, merchant_id: Uuid, customer_id: Uuid) -> Option<Mandate> {
        self.mandates
            .read()
            .values()
            .filter(|m| {
                m.merchant_id == merchant_id && m.customer_id == customer_id && m.is_chargeable()
            })
            .max_by_key(|m| m.created_at)
            .cloned()
    }
}
