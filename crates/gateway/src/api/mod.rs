pub mod admin;
pub mod auth;
pub mod portal;
pub mod webhooks;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use pp_domain::error::Error;
use pp_domain::payment::PspProvider;
use pp_sessions::{PortalSession, SessionAction, SessionStatus};

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (the customer-facing portal channel
/// plus provider webhooks, where the token or the signature is the auth)
/// and **protected** (merchant-side operations gated behind the admin
/// bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/healthz", get(health))
        // Providers (signature-authenticated)
        .route("/v1/webhooks/:provider", post(webhooks::receive_webhook))
        // Customer-facing channel (token-authenticated)
        .route("/v1/portal/access", post(portal::access_session))
        .route("/v1/portal/redirect", post(portal::start_redirect))
        .route("/v1/portal/return", get(portal::handle_return));

    let protected = Router::new()
        .route(
            "/v1/sessions",
            post(admin::create_session).get(admin::list_sessions),
        )
        .route("/v1/sessions/expire-stale", post(admin::expire_stale))
        .route("/v1/inbox", get(webhooks::list_inbox))
        .route("/v1/sessions/:id", get(admin::get_session))
        .route("/v1/sessions/:id/audit", get(admin::session_audit))
        .route("/v1/sessions/:id/cancel", post(admin::cancel_session))
        .layer(middleware::from_fn_with_state(
            state,
            auth::require_admin_token,
        ));

    public.merge(protected)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

/// Map an engine error onto the HTTP taxonomy.
pub(crate) fn error_response(err: &Error) -> Response {
    let status = match err {
        Error::NotFound => StatusCode::NOT_FOUND,
        Error::Expired => StatusCode::GONE,
        Error::Terminal | Error::IllegalTransition { .. } | Error::NoActiveMandate => {
            StatusCode::CONFLICT
        }
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::SignatureInvalid(_) => StatusCode::UNAUTHORIZED,
        Error::ProviderUnavailable { .. } => StatusCode::BAD_GATEWAY,
        Error::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, err.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Views
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session as exposed over the API. The token hash and the live
/// correlation state never leave the engine.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub organisation_id: Uuid,
    pub merchant_id: Uuid,
    pub customer_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mandate_id: Option<Uuid>,
    pub amount_cents: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub allowed_actions: Vec<SessionAction>,
    pub status: SessionStatus,
    pub use_count: u32,
    pub max_uses: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psp_provider: Option<PspProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psp_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PortalSession> for SessionView {
    fn from(s: PortalSession) -> Self {
        Self {
            id: s.id,
            organisation_id: s.organisation_id,
            merchant_id: s.merchant_id,
            customer_id: s.customer_id,
            contract_id: s.contract_id,
            mandate_id: s.mandate_id,
            amount_cents: s.amount_cents,
            currency: s.currency,
            description: s.description,
            allowed_actions: s.allowed_actions,
            status: s.status,
            use_count: s.use_count,
            max_uses: s.max_uses,
            consumed_at: s.consumed_at,
            expires_at: s.expires_at,
            last_accessed_at: s.last_accessed_at,
            psp_provider: s.psp_provider,
            psp_session_id: s.psp_session_id,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}
