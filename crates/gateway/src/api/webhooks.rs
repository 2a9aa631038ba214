//! Provider webhook endpoint.
//!
//! `POST /v1/webhooks/:provider` takes the raw body untouched; the
//! adapter's HMAC verification runs over exactly the bytes the provider
//! signed. A `rejected` verdict maps to 401 so the provider's retry and
//! alerting path fires; every other verdict maps to 200 so retries stop,
//! duplicates included.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use pp_domain::payment::Pagination;

use crate::runtime::psp::WebhookStatus;
use crate::state::AppState;

/// `POST /v1/webhooks/:provider`
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    // Adapters see lowercase header names regardless of transport casing.
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_owned()))
        })
        .collect();
    let signature = headers
        .get("x-signature")
        .cloned()
        .unwrap_or_default();

    let ack = state
        .psp
        .handle_webhook(&provider, &body, &signature, &headers)
        .await;

    let status = if ack.status == WebhookStatus::Rejected {
        StatusCode::UNAUTHORIZED
    } else {
        StatusCode::OK
    };
    (status, Json(ack)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct InboxQuery {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub per_page: Option<usize>,
}

/// `GET /v1/inbox`
///
/// Ledger inspection for ops: every distinct event ever received, with
/// its processing outcome and redelivery count.
pub async fn list_inbox(
    State(state): State<AppState>,
    Query(query): Query<InboxQuery>,
) -> impl IntoResponse {
    let defaults = Pagination::default();
    let page = state.inbox.list(Pagination {
        page: query.page.unwrap_or(defaults.page),
        per_page: query.per_page.unwrap_or(defaults.per_page),
    });
    Json(page).into_response()
}
