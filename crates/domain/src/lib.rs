//! Domain layer for the credit ledger.
//!
//! This crate provides the business rules shared by the services:
//! - Transfer aggregate with its five-state saga lifecycle
//! - Journal entry with double-entry validation and voiding
//! - Validation errors surfaced to API callers as 4xx responses

pub mod entry;
pub mod error;
pub mod transfer;

pub use entry::{Entry, Line, Side};
pub use error::{DomainError, ValidationError};
pub use transfer::{Transfer, TransferState};
