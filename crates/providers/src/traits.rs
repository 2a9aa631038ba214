use std::collections::HashMap;

use pp_domain::error::{Error, Result};
use pp_domain::payment::{
    ChargeIntent, MandateChargeRequest, PaymentFlow, ProviderEvent, PspProvider, RedirectIntent,
    RedirectRequest,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core adapter trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every PSP adapter must implement.
///
/// Implementations are provider-specific adapters (MultiSafepay,
/// GoCardless) that translate between the engine's payment types and the
/// wire format of each provider's HTTP API. An adapter belongs to exactly
/// one flow family and overrides the matching creation call; the other
/// one keeps the default rejection.
#[async_trait::async_trait]
pub trait PspAdapter: Send + Sync {
    /// Which provider this adapter talks to.
    fn provider(&self) -> PspProvider;

    /// The flow family this adapter serves.
    fn flow(&self) -> PaymentFlow;

    /// Create a hosted-page payment (redirect family).
    async fn create_redirect(&self, _req: RedirectRequest) -> Result<RedirectIntent> {
        Err(Error::Validation(format!(
            "{} does not support hosted redirects",
            self.provider()
        )))
    }

    /// Charge an existing bank-debit mandate (mandate family).
    async fn create_mandate_charge(&self, _req: MandateChargeRequest) -> Result<ChargeIntent> {
        Err(Error::Validation(format!(
            "{} does not support mandate charges",
            self.provider()
        )))
    }

    /// Verify a webhook delivery against the provider's signing scheme.
    ///
    /// Pure computation over the raw body; must not touch the network.
    /// Header keys arrive lowercased.
    fn verify_signature(
        &self,
        raw_body: &[u8],
        signature: &str,
        headers: &HashMap<String, String>,
    ) -> Result<()>;

    /// Parse a verified webhook body into a normalized event.
    fn parse_event(&self, raw_body: &str) -> Result<ProviderEvent>;
}
