//! Merchant-side session operations, gated behind the admin bearer token.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pp_domain::payment::{Page, Pagination};
use pp_sessions::{CreateSessionParams, SessionAction, SessionFilter, SessionStatus};

use crate::api::{error_response, SessionView};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub organisation_id: Uuid,
    pub merchant_id: Uuid,
    pub customer_id: Uuid,
    #[serde(default)]
    pub contract_id: Option<Uuid>,
    #[serde(default)]
    pub mandate_id: Option<Uuid>,
    pub amount_cents: i64,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
    pub allowed_actions: Vec<SessionAction>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub max_uses: Option<u32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session: SessionView,
    /// The raw bearer token. Returned exactly once, here; embed it into
    /// the customer-facing URL and forget it.
    pub token: String,
    pub portal_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub organisation_id: Option<Uuid>,
    #[serde(default)]
    pub merchant_id: Option<Uuid>,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub per_page: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub per_page: Option<usize>,
}

fn pagination(page: Option<usize>, per_page: Option<usize>) -> Pagination {
    let defaults = Pagination::default();
    Pagination {
        page: page.unwrap_or(defaults.page),
        per_page: per_page.unwrap_or(defaults.per_page),
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `POST /v1/sessions`
pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    let params = CreateSessionParams {
        organisation_id: body.organisation_id,
        merchant_id: body.merchant_id,
        customer_id: body.customer_id,
        contract_id: body.contract_id,
        mandate_id: body.mandate_id,
        amount_cents: body.amount_cents,
        currency: body.currency,
        description: body.description,
        allowed_actions: body.allowed_actions,
        ttl_secs: body.ttl_secs,
        max_uses: body.max_uses,
        metadata: body.metadata,
    };

    match state.sessions.create_session(params) {
        Ok((session, token)) => {
            let portal_url = format!(
                "{}/p/{token}",
                state.config.portal.base_url.trim_end_matches('/')
            );
            (
                StatusCode::CREATED,
                Json(CreateSessionResponse {
                    session: SessionView::from(session),
                    token,
                    portal_url,
                }),
            )
                .into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// `GET /v1/sessions`
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let filter = SessionFilter {
        organisation_id: query.organisation_id,
        merchant_id: query.merchant_id,
        customer_id: query.customer_id,
        status: query.status,
        created_after: query.created_after,
        created_before: query.created_before,
    };
    let page = state
        .sessions
        .list_sessions(&filter, pagination(query.page, query.per_page));
    let page = Page {
        items: page.items.into_iter().map(SessionView::from).collect(),
        total: page.total,
        page: page.page,
        total_pages: page.total_pages,
    };
    Json(page).into_response()
}

/// `GET /v1/sessions/:id`
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.sessions.get(id) {
        Ok(session) => Json(SessionView::from(session)).into_response(),
        Err(err) => error_response(&err),
    }
}

/// `GET /v1/sessions/:id/audit`
pub async fn session_audit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    match state
        .sessions
        .session_audit(id, pagination(query.page, query.per_page))
    {
        Ok(page) => Json(page).into_response(),
        Err(err) => error_response(&err),
    }
}

/// `POST /v1/sessions/:id/cancel`
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelRequest>,
) -> impl IntoResponse {
    match state.sessions.cancel_session(id, body.reason) {
        Ok(session) => Json(SessionView::from(session)).into_response(),
        Err(err) => error_response(&err),
    }
}

/// `POST /v1/sessions/expire-stale`
///
/// Manual sweep trigger for external schedulers; the background sweeper
/// does the same thing on its own interval.
pub async fn expire_stale(State(state): State<AppState>) -> impl IntoResponse {
    let expired = state.sessions.expire_stale(Utc::now());
    Json(serde_json::json!({ "expired": expired })).into_response()
}
