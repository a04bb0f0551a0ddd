//! Transfer submission and lookup endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::TransferId;
use domain::{Transfer, TransferState};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::idem::IdemGuard;
use crate::ledger::LedgerGateway;
use crate::saga::{CreateTransfer, SagaExecutor};
use crate::store::TransferStore;

/// Shared application state accessible from all handlers.
pub struct AppState<S: TransferStore, L: LedgerGateway, G: IdemGuard> {
    pub saga: SagaExecutor<S, L, G>,
    /// Root cancellation; request-scoped journal backoffs race it on
    /// shutdown.
    pub cancel: CancellationToken,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateTransferRequest {
    pub from_account_id: String,
    pub to_account_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub idempotency_key: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct TransferResponse {
    pub transfer_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct TransferView {
    pub id: String,
    pub from_account_id: String,
    pub to_account_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub idempotency_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub recovery_attempts: i32,
    pub created_at: String,
    pub updated_at: String,
}

// -- Handlers --

/// POST /v1/transfers — submit a transfer.
///
/// 201 when the saga reached COMPLETED synchronously, 202 when the outcome
/// is pending (the compensator will finish it), 400 on validation, 409 on an
/// in-flight duplicate, 500 when the saga terminally failed.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: TransferStore, L: LedgerGateway, G: IdemGuard>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Json(req): Json<CreateTransferRequest>,
) -> Result<Response, ApiError> {
    let from_account = req
        .from_account_id
        .parse()
        .map_err(|_| ApiError::BadRequest("from_account_id must be a valid UUID".to_string()))?;
    let to_account = req
        .to_account_id
        .parse()
        .map_err(|_| ApiError::BadRequest("to_account_id must be a valid UUID".to_string()))?;

    let cmd = CreateTransfer {
        from_account,
        to_account,
        amount_minor: req.amount_minor,
        currency: req.currency,
        idempotency_key: req.idempotency_key,
    };

    let transfer = state.saga.execute(cmd, &state.cancel).await?;
    Ok(transfer_response(&transfer))
}

/// GET /v1/transfers/{id} — full transfer view.
#[tracing::instrument(skip(state))]
pub async fn get<S: TransferStore, L: LedgerGateway, G: IdemGuard>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Path(id): Path<String>,
) -> Result<Json<TransferView>, ApiError> {
    let id: TransferId = id
        .parse()
        .map_err(|_| ApiError::BadRequest("transfer id must be a valid UUID".to_string()))?;

    let transfer = state
        .saga
        .get(id)
        .await?
        .ok_or(ApiError::Orchestrator(crate::OrchestratorError::NotFound))?;

    Ok(Json(TransferView {
        id: transfer.id.to_string(),
        from_account_id: transfer.from_account.to_string(),
        to_account_id: transfer.to_account.to_string(),
        amount_minor: transfer.amount_minor,
        currency: transfer.currency.clone(),
        status: transfer.state.to_string(),
        idempotency_key: transfer.idempotency_key.clone(),
        entry_id: transfer.ledger_entry_id.map(|e| e.to_string()),
        failure_reason: transfer.failure_reason.clone(),
        recovery_attempts: transfer.recovery_attempts,
        created_at: transfer.created_at.to_rfc3339(),
        updated_at: transfer.updated_at.to_rfc3339(),
    }))
}

/// Maps a transfer's durable state to the submission response.
fn transfer_response(transfer: &Transfer) -> Response {
    let body = TransferResponse {
        transfer_id: transfer.id.to_string(),
        status: transfer.state.to_string(),
        entry_id: transfer.ledger_entry_id.map(|e| e.to_string()),
        error: transfer.failure_reason.clone(),
    };

    let status = match transfer.state {
        TransferState::Completed => StatusCode::CREATED,
        TransferState::Failed => StatusCode::INTERNAL_SERVER_ERROR,
        TransferState::Initiated | TransferState::LedgerCalled | TransferState::Recovering => {
            StatusCode::ACCEPTED
        }
    };

    (status, Json(body)).into_response()
}
