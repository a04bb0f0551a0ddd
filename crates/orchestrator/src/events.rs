//! Outbox record builders for transfer lifecycle events.

use chrono::Utc;
use common::{events, EventType, TransferId};
use domain::Transfer;
use outbox::OutboxRecord;
use prost::Message;

const AGGREGATE_TYPE: &str = "Transfer";

/// `TransferInitiated`, written in the same transaction as the INITIATED row.
pub fn transfer_initiated(transfer: &Transfer) -> OutboxRecord {
    let event = events::TransferInitiated {
        transfer_id: transfer.id.to_string(),
        from: transfer.from_account.to_string(),
        to: transfer.to_account.to_string(),
        amount: Some(events::Money {
            units: transfer.amount_minor,
            currency: transfer.currency.clone(),
        }),
        idem_key: transfer.idempotency_key.clone(),
        ts_unix_ms: transfer.created_at.timestamp_millis(),
    };
    OutboxRecord::new(
        AGGREGATE_TYPE,
        transfer.id.as_uuid(),
        EventType::TransferInitiated,
        event.encode_to_vec(),
    )
}

/// `TransferCompleted`, written with the terminal COMPLETED transition.
pub fn transfer_completed(id: TransferId) -> OutboxRecord {
    let event = events::TransferCompleted {
        transfer_id: id.to_string(),
        ts_unix_ms: Utc::now().timestamp_millis(),
    };
    OutboxRecord::new(
        AGGREGATE_TYPE,
        id.as_uuid(),
        EventType::TransferCompleted,
        event.encode_to_vec(),
    )
}

/// `TransferFailed`, written with the terminal FAILED transition.
pub fn transfer_failed(id: TransferId, reason: &str) -> OutboxRecord {
    let event = events::TransferFailed {
        transfer_id: id.to_string(),
        reason: reason.to_string(),
        ts_unix_ms: Utc::now().timestamp_millis(),
    };
    OutboxRecord::new(
        AGGREGATE_TYPE,
        id.as_uuid(),
        EventType::TransferFailed,
        event.encode_to_vec(),
    )
}
