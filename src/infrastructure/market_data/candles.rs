//! Tick-to-candle aggregator feeding SignalEngine (C7) through the
//! `CandleSource` port. Bucketing ticks into fixed-width OHLC bars is the
//! same role the teacher's `spread_cache`/market-data layer plays for its
//! strategies, here specialized to simple time-bucketed candles per
//! `(symbol, timeframe_minutes)`.

use crate::domain::ports::CandleSource;
use crate::domain::types::{Candle, Tick};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

const MAX_CANDLES_PER_SERIES: usize = 500;

struct Series {
    candles: Vec<Candle>,
}

pub struct CandleAggregator {
    series: Mutex<HashMap<(String, u32), Series>>,
}

impl Default for CandleAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl CandleAggregator {
    pub fn new() -> Self {
        Self {
            series: Mutex::new(HashMap::new()),
        }
    }

    /// Folds one tick into the bucketed candle series for `symbol` at every
    /// `timeframe_minutes` this aggregator is asked to track. Call once per
    /// normalized tick (FeedManager's `handle_packet` path).
    pub fn on_tick(&self, symbol: &str, timeframe_minutes: u32, tick: &Tick) {
        let bucket_start = floor_to_bucket(tick.ts, timeframe_minutes);
        let mut series = self.series.lock().expect("candle aggregator lock poisoned");
        let entry = series.entry((symbol.to_string(), timeframe_minutes)).or_insert_with(|| Series { candles: Vec::new() });

        match entry.candles.last_mut() {
            Some(candle) if candle.ts == bucket_start => {
                candle.high = candle.high.max(tick.ltp);
                candle.low = candle.low.min(tick.ltp);
                candle.close = tick.ltp;
                candle.volume += tick.volume;
            }
            _ => {
                entry.candles.push(Candle {
                    open: tick.ltp,
                    high: tick.ltp,
                    low: tick.ltp,
                    close: tick.ltp,
                    volume: tick.volume,
                    ts: bucket_start,
                });
                if entry.candles.len() > MAX_CANDLES_PER_SERIES {
                    entry.candles.remove(0);
                }
            }
        }
    }
}

impl CandleSource for CandleAggregator {
    fn candles(&self, symbol: &str, timeframe_minutes: u32) -> Vec<Candle> {
        self.series
            .lock()
            .expect("candle aggregator lock poisoned")
            .get(&(symbol.to_string(), timeframe_minutes))
            .map(|s| s.candles.clone())
            .unwrap_or_default()
    }
}

fn floor_to_bucket(ts: DateTime<Utc>, timeframe_minutes: u32) -> DateTime<Utc> {
    let minutes_since_epoch = ts.timestamp() / 60;
    let bucket = minutes_since_epoch - (minutes_since_epoch % timeframe_minutes as i64);
    Utc.timestamp_opt(bucket * 60, 0).single().unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{InstrumentType, Segment, TickKind};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn tick_at(secs: i64, ltp: rust_decimal::Decimal) -> Tick {
        Tick {
            segment: Segment::from("NSE_FNO"),
            security_id: 1,
            ltp,
            open: ltp,
            high: ltp,
            low: ltp,
            close: ltp,
            volume: dec!(10),
            ts: Utc.timestamp_opt(secs, 0).unwrap(),
            day_high: ltp,
            day_low: ltp,
            atp: ltp,
            oi: None,
            kind: TickKind::Full,
            instrument_type: InstrumentType::Option,
            expiry_date: None,
            strike: None,
            option_type: None,
        }
    }

    #[test]
    fn ticks_within_same_bucket_merge_into_one_candle() {
        let agg = CandleAggregator::new();
        agg.on_tick("NIFTY", 1, &tick_at(0, dec!(100)));
        agg.on_tick("NIFTY", 1, &tick_at(30, dec!(105)));
        let candles = agg.candles("NIFTY", 1);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].high, dec!(105));
        assert_eq!(candles[0].close, dec!(105));
        assert_eq!(candles[0].volume, dec!(20));
    }

    #[test]
    fn tick_in_new_bucket_starts_a_new_candle() {
        let agg = CandleAggregator::new();
        agg.on_tick("NIFTY", 1, &tick_at(0, dec!(100)));
        agg.on_tick("NIFTY", 1, &tick_at(90, dec!(110)));
        let candles = agg.candles("NIFTY", 1);
        assert_eq!(candles.len(), 2);
    }
}
