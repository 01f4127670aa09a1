//! Interfaces the core depends on but never implements itself — broker
//! connectivity, instrument metadata, the streaming transport, candle
//! history, and notification. Concrete adapters live under `infrastructure`.

use crate::domain::errors::{OrderError, TransientNetworkError};
use crate::domain::types::{
    Candle, ExitReason, Instrument, OptionType, OrderRequest, OrderStatus, Segment,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::mpsc::Receiver;

/// A confirmed fill returned by a broker on a successful placement.
#[derive(Debug, Clone)]
pub struct BrokerFill {
    pub order_id: String,
    pub fill_price: Decimal,
    pub fill_quantity: u32,
}

/// Broker-reported open position, used by the Reconciler to diff against PositionStore.
#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub segment: Segment,
    pub security_id: i64,
    pub net_qty: u32,
    pub avg_price: Decimal,
}

/// Single capability interface for paper and live brokers alike (spec.md §9:
/// replaces monkey-patched "try this method then that" duck typing with one
/// trait every adapter implements in full).
#[async_trait]
pub trait Broker: Send + Sync {
    async fn place(&self, req: &OrderRequest) -> Result<BrokerFill, OrderError>;
    async fn cancel(&self, order_id: &str) -> Result<(), OrderError>;
    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, TransientNetworkError>;
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, TransientNetworkError>;
    async fn get_funds(&self) -> Result<Decimal, TransientNetworkError>;
}

/// Read-only instrument metadata lookup (C2). Pure; callers handle absence.
pub trait InstrumentLookup: Send + Sync {
    fn security_id(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        strike: Decimal,
        option_type: OptionType,
    ) -> Option<i64>;
    fn expiry_dates(&self, symbol: &str) -> Vec<NaiveDate>;
    fn strikes(&self, symbol: &str, expiry: NaiveDate) -> Vec<Decimal>;
    fn exchange_segment(&self, security_id: i64) -> Option<Segment>;
    fn lot_size(&self, security_id: i64) -> Option<u32>;
    fn instrument(&self, security_id: i64) -> Option<Instrument>;
}

/// Raw, heterogeneous packet shapes a streaming transport may emit. TickCache's
/// normalizer (C1) maps every variant into the canonical `Tick`.
#[derive(Debug, Clone)]
pub enum RawPacket {
    Full {
        segment: Segment,
        security_id: i64,
        ltp: Decimal,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
        day_high: Decimal,
        day_low: Decimal,
        atp: Decimal,
        oi: Option<Decimal>,
        ts: chrono::DateTime<chrono::Utc>,
    },
    Ltp {
        segment: Segment,
        security_id: i64,
        ltp: Decimal,
        ts: chrono::DateTime<chrono::Utc>,
    },
    OiOnly {
        segment: Segment,
        security_id: i64,
        oi: Decimal,
        ts: chrono::DateTime<chrono::Utc>,
    },
}

impl RawPacket {
    pub fn key(&self) -> (Segment, i64) {
        match self {
            RawPacket::Full {
                segment,
                security_id,
                ..
            } => (segment.clone(), *security_id),
            RawPacket::Ltp {
                segment,
                security_id,
                ..
            } => (segment.clone(), *security_id),
            RawPacket::OiOnly {
                segment,
                security_id,
                ..
            } => (segment.clone(), *security_id),
        }
    }

    pub fn ts(&self) -> chrono::DateTime<chrono::Utc> {
        match self {
            RawPacket::Full { ts, .. } | RawPacket::Ltp { ts, .. } | RawPacket::OiOnly { ts, .. } => *ts,
        }
    }
}

/// The live/paper streaming connection FeedManager drives through its state
/// machine. `connect` hands back the packet stream for the session.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self) -> Result<Receiver<RawPacket>, TransientNetworkError>;
    async fn disconnect(&self);
    async fn subscribe(&self, segment: &Segment, security_id: i64) -> Result<(), TransientNetworkError>;
    async fn unsubscribe(&self, security_id: i64) -> Result<(), TransientNetworkError>;
}

/// TTL-cacheable REST fallback for last traded price (C1 collaborator).
#[async_trait]
pub trait LtpLookup: Send + Sync {
    async fn fetch_ltp(&self, segment: &Segment, security_id: i64) -> Result<Decimal, TransientNetworkError>;
}

/// Candle history for a symbol/timeframe, fed by the tick-to-candle aggregator.
pub trait CandleSource: Send + Sync {
    fn candles(&self, symbol: &str, timeframe_minutes: u32) -> Vec<Candle>;
}

/// Structured lifecycle/risk events; formatting into human text is an
/// external collaborator's job (spec.md §1 excludes notification formatting).
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    OrderPlaced {
        symbol: String,
        side: crate::domain::types::OrderSide,
        quantity: u32,
        price: Decimal,
    },
    ExitIssued {
        security_id: i64,
        reason: ExitReason,
        quantity: u32,
    },
    DailyLossCapTripped {
        current_equity: Decimal,
        starting_equity: Decimal,
    },
    FeedReconnected {
        attempt: u32,
    },
    SessionFinalized {
        session_id: String,
        total_pnl: Decimal,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotificationEvent);
}

/// Namespaced key-value persistence (spec.md §6's `dhan_scalper:v1` layout).
#[async_trait]
pub trait PersistStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<i64>) -> Result<(), TransientNetworkError>;
    async fn get(&self, key: &str) -> Result<Option<String>, TransientNetworkError>;
    async fn delete(&self, key: &str) -> Result<(), TransientNetworkError>;
}
