//! Shared identifier types, event payload schema, and topic routing for the
//! credit-ledger services.

pub mod events;
pub mod http;
pub mod types;

pub use events::{
    AccountCreated, EntryLine, EntryPosted, EventType, Money, Side, TransferCompleted,
    TransferFailed, TransferInitiated,
};
pub use types::{AccountId, EntryId, EventId, TransferId};
