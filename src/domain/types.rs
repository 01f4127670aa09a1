use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange segment as reported by the feed/broker (e.g. "IDX_I", "NSE_FNO", "BSE_FNO").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment(pub String);

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Segment {
    fn from(value: &str) -> Self {
        Segment(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentType {
    Index,
    Option,
    Future,
    Equity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    Ce,
    Pe,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionType::Ce => write!(f, "CE"),
            OptionType::Pe => write!(f, "PE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
}

/// The kind of raw packet a tick was normalized from. Used so the normalizer
/// knows which fields are authoritative (an OI-only packet must not stomp price).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickKind {
    Full,
    Ltp,
    Quote,
    OiOnly,
}

/// Canonical tick shape every feed packet is normalized into. Primary key is
/// `(segment, security_id)`; `ts` is required to be monotonic non-decreasing
/// per key by `TickCache::put`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub segment: Segment,
    pub security_id: i64,
    pub ltp: Decimal,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub ts: DateTime<Utc>,
    pub day_high: Decimal,
    pub day_low: Decimal,
    pub atp: Decimal,
    pub oi: Option<Decimal>,
    pub kind: TickKind,
    pub instrument_type: InstrumentType,
    pub expiry_date: Option<NaiveDate>,
    pub strike: Option<Decimal>,
    pub option_type: Option<OptionType>,
}

impl Tick {
    pub fn key(&self) -> (Segment, i64) {
        (self.segment.clone(), self.security_id)
    }
}

/// Read-only instrument metadata, supplied by InstrumentMaster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub security_id: i64,
    pub segment: Segment,
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub lot_size: u32,
    pub strike: Option<Decimal>,
    pub expiry: Option<NaiveDate>,
    pub option_type: Option<OptionType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub security_id: i64,
    pub segment: Segment,
    pub side: OrderSide,
    pub quantity: u32,
    pub price: Decimal,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub fill_price: Option<Decimal>,
    pub fill_quantity: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Request to place an order, consumed by OrderGateway::place.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub security_id: i64,
    pub segment: Segment,
    pub side: OrderSide,
    pub quantity: u32,
    pub price: Decimal,
    pub order_type: OrderType,
    pub option_type: Option<OptionType>,
    pub strike: Option<Decimal>,
}

/// A short-lived key suppressing duplicate order submissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey(pub String);

impl DedupeKey {
    pub fn for_request(req: &OrderRequest) -> Self {
        DedupeKey(format!(
            "{}:{}:{}:{}:{:?}",
            req.symbol, req.security_id, req.side, req.quantity, req.order_type
        ))
    }
}

/// Per-exit idempotency key: one exit per (security_id, reason) per session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub security_id: i64,
    pub reason: ExitReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TimeStop,
    TrailingStop,
    TechnicalInvalid,
    DailyLossCap,
    ReconciledMissing,
    Manual,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TimeStop => "TIME_STOP",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::TechnicalInvalid => "TECHNICAL_INVALID",
            ExitReason::DailyLossCap => "DAILY_LOSS_CAP",
            ExitReason::ReconciledMissing => "RECONCILED_MISSING",
            ExitReason::Manual => "MANUAL",
        };
        write!(f, "{s}")
    }
}

/// Trading signal direction produced by the SignalEngine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalDirection {
    Long,
    Short,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub segment: Segment,
    pub security_id: i64,
    pub side: Side,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub key: PositionKey,
    pub symbol: String,
    pub buy_qty: u32,
    pub buy_avg: Decimal,
    pub sell_qty: u32,
    pub sell_avg: Decimal,
    pub net_qty: u32,
    pub day_buy_qty: u32,
    pub day_sell_qty: u32,
    pub current_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub entry_fee: Decimal,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub option_type: Option<OptionType>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.net_qty > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub ts: DateTime<Utc>,
}
