//! Event payload schema and topic routing.
//!
//! Payloads are binary, schema-versioned prost messages (package
//! `ledger.v1`). The message definitions are written by hand rather than
//! generated so the crate builds without a protoc toolchain; tags are part of
//! the wire contract and must not be renumbered.

/// Monetary amount in minor units of the given ISO-4217 currency.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Money {
    #[prost(int64, tag = "1")]
    pub units: i64,
    #[prost(string, tag = "2")]
    pub currency: ::prost::alloc::string::String,
}

/// Debit/credit side of a journal line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Side {
    Unspecified = 0,
    Debit = 1,
    Credit = 2,
}

impl Side {
    /// String form used in HTTP payloads and the read model.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Side::Unspecified => "UNSPECIFIED",
            Side::Debit => "DEBIT",
            Side::Credit => "CREDIT",
        }
    }
}

/// One line of a posted journal entry.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntryLine {
    #[prost(string, tag = "1")]
    pub account_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub amount: ::core::option::Option<Money>,
    #[prost(enumeration = "Side", tag = "3")]
    pub side: i32,
}

/// A balanced journal entry was committed by the journal service.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntryPosted {
    #[prost(string, tag = "1")]
    pub entry_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub batch_id: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "3")]
    pub lines: ::prost::alloc::vec::Vec<EntryLine>,
    #[prost(int64, tag = "4")]
    pub ts_unix_ms: i64,
}

/// A transfer was accepted and durably recorded by the orchestrator.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransferInitiated {
    #[prost(string, tag = "1")]
    pub transfer_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub from: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub to: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "4")]
    pub amount: ::core::option::Option<Money>,
    #[prost(string, tag = "5")]
    pub idem_key: ::prost::alloc::string::String,
    #[prost(int64, tag = "6")]
    pub ts_unix_ms: i64,
}

/// A transfer reached its COMPLETED terminal state.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransferCompleted {
    #[prost(string, tag = "1")]
    pub transfer_id: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub ts_unix_ms: i64,
}

/// A transfer reached its FAILED terminal state.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransferFailed {
    #[prost(string, tag = "1")]
    pub transfer_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub reason: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub ts_unix_ms: i64,
}

/// An account was opened (emitted by the external accounts service; routed
/// here so every writer shares one topic map).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AccountCreated {
    #[prost(string, tag = "1")]
    pub account_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub currency: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub ts_unix_ms: i64,
}

/// Kafka topic for account lifecycle events.
pub const TOPIC_ACCOUNT: &str = "ledger.account.v1";
/// Kafka topic for journal entry events.
pub const TOPIC_ENTRY: &str = "ledger.entry.v1";
/// Kafka topic for transfer lifecycle events.
pub const TOPIC_TRANSFER: &str = "ledger.transfer.v1";
/// Fallback topic for event types without a dedicated stream.
pub const TOPIC_DEFAULT: &str = "ledger.events.v1";

/// The closed set of event types the ledger publishes.
///
/// Topic routing is a pure function of the tag; anything outside this set
/// lands on [`TOPIC_DEFAULT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    AccountCreated,
    EntryPosted,
    TransferInitiated,
    TransferCompleted,
    TransferFailed,
}

impl EventType {
    /// Returns the wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AccountCreated => "AccountCreated",
            EventType::EntryPosted => "EntryPosted",
            EventType::TransferInitiated => "TransferInitiated",
            EventType::TransferCompleted => "TransferCompleted",
            EventType::TransferFailed => "TransferFailed",
        }
    }

    /// Parses a wire name back into the closed set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AccountCreated" => Some(EventType::AccountCreated),
            "EntryPosted" => Some(EventType::EntryPosted),
            "TransferInitiated" => Some(EventType::TransferInitiated),
            "TransferCompleted" => Some(EventType::TransferCompleted),
            "TransferFailed" => Some(EventType::TransferFailed),
            _ => None,
        }
    }

    /// Destination topic for this event type.
    pub fn topic(&self) -> &'static str {
        match self {
            EventType::AccountCreated => TOPIC_ACCOUNT,
            EventType::EntryPosted => TOPIC_ENTRY,
            EventType::TransferInitiated
            | EventType::TransferCompleted
            | EventType::TransferFailed => TOPIC_TRANSFER,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a stored event_type string to its destination topic.
///
/// Unknown types fall through to the default topic rather than failing the
/// relay; the record still drains.
pub fn topic_for(event_type: &str) -> &'static str {
    EventType::parse(event_type)
        .map(|t| t.topic())
        .unwrap_or(TOPIC_DEFAULT)
}
