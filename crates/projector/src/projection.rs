//! The event fold: turns bus events into read-model writes.

use chrono::{DateTime, TimeZone, Utc};
use common::{events, EventId};
use prost::Message;
use tracing::{debug, info, warn};

use crate::error::ProjectorError;
use crate::store::{BalanceDelta, EntryFold, ReadStore, StatementRow, TransferViewRow};
use crate::Result;

/// Folds published events into balances, statements, and the transfer view.
///
/// Idempotent by event id: the store refuses to re-apply an event it has
/// seen, so the projection state is independent of how many times the bus
/// delivers a message.
#[derive(Clone)]
pub struct Projector<R> {
    store: R,
}

impl<R: ReadStore> Projector<R> {
    pub fn new(store: R) -> Self {
        Self { store }
    }

    /// Dispatches one message by its `event_type` header. Unknown types are
    /// acknowledged and skipped; malformed payloads error (and block — no
    /// dead-letter sink yet).
    #[tracing::instrument(skip(self, payload), fields(event_id = %event_id, event_type = %event_type))]
    pub async fn handle(
        &self,
        event_id: EventId,
        event_type: &str,
        payload: &[u8],
    ) -> Result<()> {
        let applied = match event_type {
            "EntryPosted" => {
                let event = events::EntryPosted::decode(payload)?;
                self.apply_entry_posted(event_id, &event).await?
            }
            "TransferInitiated" => {
                let event = events::TransferInitiated::decode(payload)?;
                self.apply_transfer_initiated(event_id, &event).await?
            }
            "TransferCompleted" => {
                let event = events::TransferCompleted::decode(payload)?;
                let id = parse_id(&event.transfer_id, "transfer_id")?;
                self.store
                    .apply_transfer_status(event_id, id, "COMPLETED", None)
                    .await?
            }
            "TransferFailed" => {
                let event = events::TransferFailed::decode(payload)?;
                let id = parse_id(&event.transfer_id, "transfer_id")?;
                self.store
                    .apply_transfer_status(event_id, id, "FAILED", Some(&event.reason))
                    .await?
            }
            other => {
                warn!(event_type = other, "unknown event type, skipping");
                return Ok(());
            }
        };

        if applied {
            metrics::counter!("projector_events_applied", "event_type" => event_type.to_string())
                .increment(1);
        } else {
            debug!("event already processed, skipping");
            metrics::counter!("projector_events_deduplicated").increment(1);
        }
        Ok(())
    }

    /// The EntryPosted fold: holder-oriented balance deltas plus statement
    /// appends.
    ///
    /// Sign convention (deliberate, not classical bookkeeping): the
    /// orchestrator encodes "money out" as DEBIT on the source and "money
    /// in" as CREDIT on the destination, so DEBIT subtracts from the
    /// holder-view balance and CREDIT adds to it.
    async fn apply_entry_posted(
        &self,
        event_id: EventId,
        event: &events::EntryPosted,
    ) -> Result<bool> {
        let entry_id = parse_id(&event.entry_id, "entry_id")?;
        let ts = millis_to_utc(event.ts_unix_ms);

        let mut fold = EntryFold::default();
        for line in &event.lines {
            let account_id = parse_id(&line.account_id, "account_id")?;
            let amount = line
                .amount
                .as_ref()
                .ok_or_else(|| ProjectorError::Malformed("line missing amount".to_string()))?;

            let side = events::Side::try_from(line.side)
                .map_err(|_| ProjectorError::Malformed(format!("unknown side {}", line.side)))?;
            let delta_minor = match side {
                events::Side::Debit => -amount.units,
                events::Side::Credit => amount.units,
                events::Side::Unspecified => {
                    return Err(ProjectorError::Malformed("unspecified side".to_string()));
                }
            };

            fold.deltas.push(BalanceDelta {
                account_id,
                currency: amount.currency.clone(),
                delta_minor,
            });
            fold.statements.push(StatementRow {
                account_id,
                entry_id,
                amount_minor: amount.units,
                side: side.as_str_name().to_string(),
                ts,
            });
        }

        let applied = self.store.apply_entry(event_id, &fold).await?;
        if applied {
            info!(entry_id = %entry_id, lines = event.lines.len(), "projected entry");
        }
        Ok(applied)
    }

    async fn apply_transfer_initiated(
        &self,
        event_id: EventId,
        event: &events::TransferInitiated,
    ) -> Result<bool> {
        let row = TransferViewRow {
            id: parse_id(&event.transfer_id, "transfer_id")?,
            from_account: Some(parse_id(&event.from, "from")?),
            to_account: Some(parse_id(&event.to, "to")?),
            amount_minor: event.amount.as_ref().map(|a| a.units),
            currency: event.amount.as_ref().map(|a| a.currency.clone()),
            status: "INITIATED".to_string(),
            failure_reason: None,
        };
        self.store.apply_transfer_initiated(event_id, &row).await
    }

    /// Read access used by the query routes.
    pub fn store(&self) -> &R {
        &self.store
    }
}

fn parse_id<T: From<uuid::Uuid>>(s: &str, field: &str) -> Result<T> {
    s.parse::<uuid::Uuid>()
        .map(T::from)
        .map_err(|_| ProjectorError::Malformed(format!("bad {field}: {s}")))
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}
