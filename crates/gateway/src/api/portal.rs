//! Customer-facing portal endpoints.
//!
//! The bearer token in the request body is the only authentication on
//! this surface; there is no account or cookie. Raw tokens are never
//! logged.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};

use pp_sessions::SessionAction;

use crate::api::{error_response, SessionView};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct AccessRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct RedirectApiRequest {
    pub token: String,
    /// `"CARD"` or `"BANK_DEBIT"`.
    pub method: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Serialize)]
pub struct RedirectApiResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub psp_session_id: String,
    pub session: SessionView,
}

#[derive(Debug, Deserialize)]
pub struct ReturnQuery {
    pub state: String,
    /// Whatever else the provider appended to the return URL.
    #[serde(flatten)]
    pub psp_params: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ReturnResponse {
    pub payment_confirmed: bool,
    pub pending_confirmation: bool,
    pub message: &'static str,
    pub session: SessionView,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `POST /v1/portal/access`
///
/// Customer opens the portal link: activates the session on first use,
/// idempotent afterwards.
pub async fn access_session(
    State(state): State<AppState>,
    Json(body): Json<AccessRequest>,
) -> impl IntoResponse {
    match state.sessions.access_session(&body.token) {
        Ok(session) => Json(SessionView::from(session)).into_response(),
        Err(err) => error_response(&err),
    }
}

/// `POST /v1/portal/redirect`
///
/// Starts the provider flow for the chosen method. Card payments return
/// a hosted-page URL; bank debits return no URL (there is no browser
/// step, the webhook stream settles the session).
pub async fn start_redirect(
    State(state): State<AppState>,
    Json(body): Json<RedirectApiRequest>,
) -> impl IntoResponse {
    let action = match body.method.to_ascii_uppercase().as_str() {
        "CARD" => SessionAction::PayByCard,
        "BANK_DEBIT" | "SEPA_DEBIT" => SessionAction::PayByBankDebit,
        other => {
            return super::api_error(
                axum::http::StatusCode::BAD_REQUEST,
                format!("invalid payment method: {other}"),
            );
        }
    };

    match state
        .psp
        .start_redirect(&body.token, action, &body.success_url, &body.cancel_url)
        .await
    {
        Ok(outcome) => Json(RedirectApiResponse {
            redirect_url: outcome.redirect_url,
            psp_session_id: outcome.psp_session_id,
            session: SessionView::from(outcome.session),
        })
        .into_response(),
        Err(err) => error_response(&err),
    }
}

/// `GET /v1/portal/return?state=...`
///
/// The browser comes back from the hosted page. Never reports a hard
/// failure for a merely pending outcome; the caller polls or waits for
/// the webhook-driven status push.
pub async fn handle_return(
    State(state): State<AppState>,
    Query(query): Query<ReturnQuery>,
) -> impl IntoResponse {
    match state.psp.handle_return(&query.state, &query.psp_params) {
        Ok(outcome) => Json(ReturnResponse {
            payment_confirmed: outcome.payment_confirmed,
            pending_confirmation: outcome.pending_confirmation,
            message: outcome.message,
            session: SessionView::from(outcome.session),
        })
        .into_response(),
        Err(err) => error_response(&err),
    }
}
