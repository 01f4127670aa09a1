use rust_decimal::Decimal;
use thiserror::Error;

/// Raised at startup; missing credentials or a malformed config. Aborts the process.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

/// Transient failures against the stream, broker, or persistence store.
/// Never aborts the session; callers retry with bounded backoff.
#[derive(Debug, Error)]
pub enum TransientNetworkError {
    #[error("stream error: {0}")]
    Stream(String),
    #[error("broker error: {0}")]
    Broker(String),
    #[error("store error: {0}")]
    Store(String),
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("insufficient balance: need {need}, available {available}")]
    InsufficientFunds { need: Decimal, available: Decimal },
    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),
}

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("attempted sell of {requested} exceeds net quantity {net_qty}")]
    Oversell { requested: u32, net_qty: u32 },
    #[error("sell attempted against a flat position")]
    FlatPosition,
    #[error("invalid quantity: {0}")]
    InvalidQuantity(u32),
}

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("invalid order: {reason}")]
    InvalidOrder { reason: String },
    #[error("invalid instrument: security_id {0}")]
    InvalidInstrument(i64),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Position(#[from] PositionError),
    #[error("broker rejected order: {0}")]
    BrokerRejection(String),
    #[error(transparent)]
    Transient(#[from] TransientNetworkError),
}

/// Not a failure — a dedupe hit. Returned as a status, never propagated as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateOrder;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("max reconnect attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
    #[error(transparent)]
    Transient(#[from] TransientNetworkError),
}

#[derive(Debug, Error)]
pub enum ReconciliationDrift {
    #[error("position present on broker but missing in tracker: security_id {0}")]
    MissingInTracker(i64),
    #[error("position present in tracker but missing on broker: security_id {0}")]
    MissingInBroker(i64),
    #[error("quantity mismatch for security_id {security_id}: tracker {tracker_qty}, broker {broker_qty}")]
    QuantityMismatch {
        security_id: i64,
        tracker_qty: u32,
        broker_qty: u32,
    },
}
