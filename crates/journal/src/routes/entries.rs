//! Entry posting and lookup endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use common::{EntryId, TransferId};
use domain::{Line, Side};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::service::JournalService;
use crate::store::JournalStore;

/// Shared application state accessible from all handlers.
pub struct AppState<S: JournalStore> {
    pub service: JournalService<S>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateEntryRequest {
    pub batch_id: String,
    pub currency: String,
    pub lines: Vec<LineRequest>,
}

#[derive(Deserialize)]
pub struct LineRequest {
    pub account_id: String,
    pub amount_minor: i64,
    pub side: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct EntryResponse {
    pub entry_id: String,
    pub batch_id: String,
}

#[derive(Serialize)]
pub struct BatchEntryResponse {
    pub entry_id: String,
    pub batch_id: String,
    pub voided: bool,
}

// -- Handlers --

/// POST /v1/entries — append a balanced double-entry record.
///
/// 201 on a fresh batch, 200 when the batch was already posted (idempotent
/// replay), 400 on validation failure.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: JournalStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateEntryRequest>,
) -> Result<(StatusCode, Json<EntryResponse>), ApiError> {
    let batch_id: TransferId = req
        .batch_id
        .parse()
        .map_err(|_| ApiError::BadRequest("batch_id must be a valid UUID".to_string()))?;

    let mut lines = Vec::with_capacity(req.lines.len());
    for (i, line) in req.lines.iter().enumerate() {
        let account_id = line
            .account_id
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("lines[{i}].account_id must be a valid UUID")))?;
        let side = Side::parse(&line.side).ok_or_else(|| {
            ApiError::BadRequest(format!("lines[{i}].side must be 'DEBIT' or 'CREDIT'"))
        })?;
        lines.push(Line {
            account_id,
            amount_minor: line.amount_minor,
            side,
        });
    }

    let posted = state.service.post_entry(batch_id, &req.currency, lines).await?;

    let status = if posted.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(EntryResponse {
            entry_id: posted.entry_id.to_string(),
            batch_id: posted.batch_id.to_string(),
        }),
    ))
}

/// GET /v1/entries/by-batch/{batch_id} — the reconciliation oracle.
#[tracing::instrument(skip(state))]
pub async fn get_by_batch<S: JournalStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(batch_id): Path<String>,
) -> Result<(StatusCode, Json<BatchEntryResponse>), ApiError> {
    let batch_id: TransferId = batch_id
        .parse()
        .map_err(|_| ApiError::BadRequest("batch_id must be a valid UUID".to_string()))?;

    match state.service.lookup_batch(batch_id).await? {
        Some(found) => Ok((
            StatusCode::OK,
            Json(BatchEntryResponse {
                entry_id: found.entry_id.to_string(),
                batch_id: found.batch_id.to_string(),
                voided: found.voided,
            }),
        )),
        None => Err(ApiError::NotFound(format!(
            "no entry for batch {batch_id}"
        ))),
    }
}

/// POST /v1/entries/{entry_id}/void — append the compensating entry.
#[tracing::instrument(skip(state))]
pub async fn void<S: JournalStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(entry_id): Path<String>,
) -> Result<(StatusCode, Json<EntryResponse>), ApiError> {
    let entry_id: EntryId = entry_id
        .parse()
        .map_err(|_| ApiError::BadRequest("entry_id must be a valid UUID".to_string()))?;

    let voided = state.service.void_entry(entry_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(EntryResponse {
            entry_id: voided.entry_id.to_string(),
            batch_id: voided.batch_id.to_string(),
        }),
    ))
}
