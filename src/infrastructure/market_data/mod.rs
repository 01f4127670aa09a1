pub mod candles;
pub mod ltp;
pub mod websocket;

pub use candles::CandleAggregator;
pub use ltp::RestLtpLookup;
pub use websocket::WebSocketTransport;
