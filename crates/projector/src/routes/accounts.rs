//! Balance and statement query endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use common::{AccountId, TransferId};
use serde::Serialize;

use crate::projection::Projector;
use crate::store::ReadStore;

/// Shared application state accessible from all handlers.
pub struct AppState<R: ReadStore> {
    pub projector: Projector<R>,
}

// -- Response types --

#[derive(Serialize)]
pub struct BalanceResponse {
    pub account_id: String,
    pub currency: String,
    pub balance_minor: i64,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct StatementEntry {
    pub account_id: String,
    pub entry_id: String,
    pub amount_minor: i64,
    pub side: String,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct StatementsResponse {
    pub statements: Vec<StatementEntry>,
}

#[derive(Serialize)]
pub struct TransferViewResponse {
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_minor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

// -- Handlers --

/// GET /v1/accounts/{id}/balance — the materialized balance.
///
/// An account the projector has not seen yet answers with a zero balance in
/// the requested (or default) currency; the read model is eventually
/// consistent, not omniscient.
#[tracing::instrument(skip(state, params))]
pub async fn balance<R: ReadStore>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Ok(account_id) = id.parse::<AccountId>() else {
        return error_response(StatusCode::BAD_REQUEST, "invalid account_id");
    };
    let currency = params.get("currency").map(String::as_str);

    match state.projector.store().get_balance(account_id, currency).await {
        Ok(Some(balance)) => (
            StatusCode::OK,
            Json(BalanceResponse {
                account_id: balance.account_id.to_string(),
                currency: balance.currency,
                balance_minor: balance.balance_minor,
                updated_at: balance.updated_at.to_rfc3339(),
            }),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::OK,
            Json(BalanceResponse {
                account_id: account_id.to_string(),
                currency: currency.unwrap_or("USD").to_string(),
                balance_minor: 0,
                updated_at: Utc::now().to_rfc3339(),
            }),
        )
            .into_response(),
        Err(error) => {
            tracing::error!(%error, "balance query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// GET /v1/accounts/{id}/statements — the append-only statement log,
/// optionally bounded by RFC3339 `from`/`to`.
#[tracing::instrument(skip(state, params))]
pub async fn statements<R: ReadStore>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Ok(account_id) = id.parse::<AccountId>() else {
        return error_response(StatusCode::BAD_REQUEST, "invalid account_id");
    };

    let from = match parse_bound(params.get("from")) {
        Ok(bound) => bound,
        Err(response) => return response,
    };
    let to = match parse_bound(params.get("to")) {
        Ok(bound) => bound,
        Err(response) => return response,
    };

    match state
        .projector
        .store()
        .list_statements(account_id, from, to)
        .await
    {
        Ok(rows) => (
            StatusCode::OK,
            Json(StatementsResponse {
                statements: rows
                    .into_iter()
                    .map(|row| StatementEntry {
                        account_id: row.account_id.to_string(),
                        entry_id: row.entry_id.to_string(),
                        amount_minor: row.amount_minor,
                        side: row.side,
                        timestamp: row.ts.to_rfc3339(),
                    })
                    .collect(),
            }),
        )
            .into_response(),
        Err(error) => {
            tracing::error!(%error, "statements query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// GET /v1/transfers/{id} — the read-side transfer view.
#[tracing::instrument(skip(state))]
pub async fn transfer<R: ReadStore>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Response {
    let Ok(transfer_id) = id.parse::<TransferId>() else {
        return error_response(StatusCode::BAD_REQUEST, "invalid transfer id");
    };

    match state.projector.store().get_transfer(transfer_id).await {
        Ok(Some(view)) => (
            StatusCode::OK,
            Json(TransferViewResponse {
                id: view.id.to_string(),
                status: view.status,
                from_account_id: view.from_account.map(|a| a.to_string()),
                to_account_id: view.to_account.map(|a| a.to_string()),
                amount_minor: view.amount_minor,
                currency: view.currency,
                failure_reason: view.failure_reason,
            }),
        )
            .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "transfer not found"),
        Err(error) => {
            tracing::error!(%error, "transfer query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn parse_bound(raw: Option<&String>) -> std::result::Result<Option<DateTime<Utc>>, Response> {
    match raw {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| {
                error_response(
                    StatusCode::BAD_REQUEST,
                    "time bounds must be RFC3339 timestamps",
                )
            }),
    }
}
