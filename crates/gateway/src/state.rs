use std::sync::Arc;

use pp_domain::config::Config;
use pp_providers::ProviderRegistry;
use pp_sessions::{MandateStore, SessionManager};

use crate::runtime::inbox::WebhookInbox;
use crate::runtime::psp::PspGateway;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core** — config, session manager, mandate registry
/// - **PSP** — provider adapters, webhook inbox, orchestration
/// - **Security** — admin token hash computed once at startup
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub mandates: Arc<MandateStore>,

    // ── PSP ───────────────────────────────────────────────────────
    pub providers: Arc<ProviderRegistry>,
    pub inbox: Arc<WebhookInbox>,
    pub psp: Arc<PspGateway>,

    // ── Security (startup-computed) ───────────────────────────────
    /// SHA-256 hash of the admin bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub admin_token_hash: Option<Vec<u8>>,
}
