//! Provider-agnostic payment types shared by the session, provider, and
//! gateway crates.
//!
//! Adapters translate between these types and each PSP's wire format; the
//! session engine never sees provider-specific payloads.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Providers and flows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A supported payment service provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PspProvider {
    Multisafepay,
    Gocardless,
}

impl PspProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Multisafepay => "multisafepay",
            Self::Gocardless => "gocardless",
        }
    }

    /// Parse a provider name as it appears in webhook URLs and config.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "multisafepay" => Some(Self::Multisafepay),
            "gocardless" => Some(Self::Gocardless),
            _ => None,
        }
    }
}

impl std::fmt::Display for PspProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a provider collects the payment.
///
/// `Redirect` sends the customer's browser to a hosted page and gets it back
/// via a return URL. `MandateDebit` charges a previously authorized bank
/// mandate directly; there is no browser step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFlow {
    Redirect,
    MandateDebit,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Request to start a hosted-page payment with a redirect-family provider.
#[derive(Debug, Clone)]
pub struct RedirectRequest {
    pub session_id: Uuid,
    pub amount_cents: i64,
    /// ISO 4217 code, e.g. `"EUR"`.
    pub currency: String,
    pub description: Option<String>,
    /// Where the provider sends the browser after the hosted page.
    /// Both already carry the correlation `state` parameter.
    pub success_url: String,
    pub cancel_url: String,
    /// Server-to-server webhook endpoint for this provider.
    pub notification_url: String,
}

/// Result of creating a hosted-page payment.
#[derive(Debug, Clone)]
pub struct RedirectIntent {
    /// Hosted page the customer's browser is sent to.
    pub redirect_url: String,
    /// Provider-side identifier for this payment attempt.
    pub psp_session_id: String,
}

/// Request to charge an existing bank-debit mandate.
#[derive(Debug, Clone)]
pub struct MandateChargeRequest {
    pub session_id: Uuid,
    /// Provider-native mandate reference (never the local mandate id).
    pub mandate_reference: String,
    pub amount_cents: i64,
    pub currency: String,
    pub description: Option<String>,
}

/// Result of submitting a mandate charge.
#[derive(Debug, Clone)]
pub struct ChargeIntent {
    pub psp_session_id: String,
    /// Outcome reported in the provider's synchronous acknowledgement.
    /// Usually `Pending`; the webhook stream settles the final state.
    pub sync_outcome: PaymentOutcome,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Normalized webhook events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalized outcome of a provider event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
    /// The provider has the payment in flight; no state change yet.
    Pending,
    /// Recognized delivery but an event type this engine does not act on.
    Ignored,
}

/// A provider webhook parsed into provider-agnostic shape.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    /// Provider-native event id; dedup key together with the provider.
    pub event_id: String,
    /// Provider-native event type, kept verbatim for the inbox ledger.
    pub event_type: String,
    /// Provider-side payment identifier, when the event carries one.
    pub psp_session_id: Option<String>,
    pub outcome: PaymentOutcome,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pagination
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 1-based page request used by all listing operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "d_page")]
    pub page: usize,
    #[serde(default = "d_per_page")]
    pub per_page: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: d_page(),
            per_page: d_per_page(),
        }
    }
}

impl Pagination {
    /// Clamp to sane bounds: page >= 1, 1 <= per_page <= 200.
    pub fn clamped(self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, 200),
        }
    }
}

/// One page of results plus the total count across all pages.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    pub fn from_slice(all: Vec<T>, pagination: Pagination) -> Self {
        let p = pagination.clamped();
        let total = all.len();
        let total_pages = total.div_ceil(p.per_page).max(1);
        let items = all
            .into_iter()
            .skip((p.page - 1) * p.per_page)
            .take(p.per_page)
            .collect();
        Self {
            items,
            total,
            page: p.page,
            total_pages,
        }
    }
}

fn d_page() -> usize {
    1
}
fn d_per_page() -> usize {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parse_roundtrip() {
        for p in [PspProvider::Multisafepay, PspProvider::Gocardless] {
            assert_eq!(PspProvider::parse(p.as_str()), Some(p));
        }
        assert_eq!(PspProvider::parse("MULTISAFEPAY"), Some(PspProvider::Multisafepay));
        assert_eq!(PspProvider::parse("stripe"), None);
    }

    #[test]
    fn page_windows_and_totals() {
        let all: Vec<u32> = (0..95).collect();
        let page = Page::from_slice(
            all,
            Pagination {
                page: 2,
                per_page: 40,
            },
        );
        assert_eq!(page.items.first(), Some(&40));
        assert_eq!(page.items.len(), 40);
        assert_eq!(page.total, 95);
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn pagination_clamps_out_of_range_values() {
        let p = Pagination {
            page: 0,
            per_page: 10_000,
        }
        .clamped();
        assert_eq!(p.page, 1);
        assert_eq!(p.per_page, 200);
    }

    #[test]
    fn empty_listing_still_has_one_page() {
        let page: Page<u32> = Page::from_slice(vec![], Pagination::default());
        assert!(page.items.is_empty());
        assert_eq!(page.total_pages, 1);
    }
}
