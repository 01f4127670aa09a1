//! C1 — TickCache: the in-memory latest-tick-per-instrument store and packet
//! normalizer. Safe for concurrent readers/writers; writes are O(1) under a
//! short critical section (spec.md §4.1, §5).

use crate::domain::ports::{LtpLookup, RawPacket};
use crate::domain::types::{Instrument, InstrumentType, Segment, Tick, TickKind};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

type Key = (Segment, i64);

struct FallbackEntry {
    price: Decimal,
    fetched_at: Instant,
}

pub struct TickCache {
    entries: RwLock<HashMap<Key, Tick>>,
    ltp_lookup: Option<Arc<dyn LtpLookup>>,
    fallback_cache: RwLock<HashMap<Key, FallbackEntry>>,
    fallback_ttl: Duration,
}

impl TickCache {
    pub fn new(ltp_lookup: Option<Arc<dyn LtpLookup>>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ltp_lookup,
            fallback_cache: RwLock::new(HashMap::new()),
            fallback_ttl: Duration::from_secs(30),
        }
    }

    pub fn with_fallback_ttl(mut self, ttl: Duration) -> Self {
        self.fallback_ttl = ttl;
        self
    }

    /// Build a canonical Tick from a heterogeneous raw packet, merging with
    /// the currently cached entry for OI-only / LTP-only packets so their
    /// narrower field set never stomps the rest of the canonical record.
    pub fn raw_to_tick(existing: Option<&Tick>, raw: &RawPacket, instrument: &Instrument) -> Tick {
        let base = existing.cloned().unwrap_or_else(|| Tick {
            segment: raw.key().0,
            security_id: raw.key().1,
            ltp: Decimal::ZERO,
            open: Decimal::ZERO,
            high: Decimal::ZERO,
            low: Decimal::ZERO,
            close: Decimal::ZERO,
            volume: Decimal::ZERO,
            ts: raw.ts(),
            day_high: Decimal::ZERO,
            day_low: Decimal::ZERO,
            atp: Decimal::ZERO,
            oi: None,
            kind: TickKind::Full,
            instrument_type: instrument.instrument_type,
            expiry_date: instrument.expiry,
            strike: instrument.strike,
            option_type: instrument.option_type,
        });

        match raw {
            RawPacket::Full {
                ltp,
                open,
                high,
                low,
                close,
                volume,
                day_high,
                day_low,
                atp,
                oi,
                ts,
                ..
            } => normalize_tick(Tick {
                ltp: *ltp,
                open: *open,
                high: *high,
                low: *low,
                close: *close,
                volume: *volume,
                ts: *ts,
                day_high: *day_high,
                day_low: *day_low,
                atp: *atp,
                oi: oi.or(base.oi),
                kind: TickKind::Full,
                ..base
            }),
            RawPacket::Ltp { ltp, ts, .. } => normalize_tick(Tick {
                ltp: *ltp,
                ts: *ts,
                kind: TickKind::Ltp,
                ..base
            }),
            RawPacket::OiOnly { oi, ts, .. } => normalize_tick(Tick {
                oi: Some(*oi),
                ts: *ts,
                kind: TickKind::OiOnly,
                ..base
            }),
        }
    }

    /// Overwrites the entry for the key unless `ts` is older than what's
    /// stored; returns true if the tick was applied.
    pub fn put(&self, tick: Tick) -> bool {
        let tick = normalize_tick(tick);
        let key = tick.key();
        let mut entries = self.entries.write().expect("tick cache lock poisoned");
        if let Some(existing) = entries.get(&key)
            && tick.ts < existing.ts
        {
            debug!(
                security_id = tick.security_id,
                stored_ts = %existing.ts,
                packet_ts = %tick.ts,
                "TickCache: dropping out-of-order tick"
            );
            return false;
        }
        entries.insert(key, tick);
        true
    }

    pub fn put_raw(&self, raw: RawPacket, instrument: &Instrument) -> bool {
        let key = raw.key();
        let existing = self.entries.read().expect("tick cache lock poisoned").get(&key).cloned();
        let tick = Self::raw_to_tick(existing.as_ref(), &raw, instrument);
        self.put(tick)
    }

    pub fn get(&self, segment: &Segment, security_id: i64) -> Option<Tick> {
        self.entries
            .read()
            .expect("tick cache lock poisoned")
            .get(&(segment.clone(), security_id))
            .cloned()
    }

    pub fn all(&self) -> HashMap<Key, Tick> {
        self.entries.read().expect("tick cache lock poisoned").clone()
    }

    /// Last traded price, optionally falling back to a TTL-cached REST lookup
    /// when there's no recent tick for the key.
    pub async fn ltp(&self, segment: &Segment, security_id: i64, use_fallback: bool) -> Option<Decimal> {
        if let Some(tick) = self.get(segment, security_id) {
            return Some(tick.ltp);
        }
        if !use_fallback {
            return None;
        }
        let key = (segment.clone(), security_id);
        if let Some(entry) = self.fallback_cache.read().expect("fallback lock poisoned").get(&key)
            && entry.fetched_at.elapsed() < self.fallback_ttl
        {
            return Some(entry.price);
        }
        let lookup = self.ltp_lookup.as_ref()?;
        match lookup.fetch_ltp(segment, security_id).await {
            Ok(price) => {
                self.fallback_cache.write().expect("fallback lock poisoned").insert(
                    key,
                    FallbackEntry {
                        price,
                        fetched_at: Instant::now(),
                    },
                );
                Some(price)
            }
            Err(_) => None,
        }
    }
}

/// Idempotent canonicalization: clamps fields so the cached record's own
/// invariants hold (volume non-negative, day high/low bracket the LTP,
/// atp defaults to the LTP when unset). Running this twice on the same
/// value is a no-op since the first pass already establishes the invariants.
pub fn normalize_tick(mut tick: Tick) -> Tick {
    if tick.volume < Decimal::ZERO {
        tick.volume = Decimal::ZERO;
    }
    if tick.atp.is_zero() {
        tick.atp = tick.ltp;
    }
    if tick.day_high < tick.ltp {
        tick.day_high = tick.ltp;
    }
    if !tick.day_low.is_zero() && tick.day_low > tick.ltp {
        tick.day_low = tick.ltp;
    } else if tick.day_low.is_zero() {
        tick.day_low = tick.ltp;
    }
    tick
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn tick_at(ts_secs: i64, ltp: Decimal) -> Tick {
        Tick {
            segment: Segment::from("NSE_FNO"),
            security_id: 1,
            ltp,
            open: ltp,
            high: ltp,
            low: ltp,
            close: ltp,
            volume: dec!(0),
            ts: Utc.timestamp_opt(ts_secs, 0).unwrap(),
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
    fn put_overwrites_on_newer_ts() {
        let cache = TickCache::new(None);
        assert!(cache.put(tick_at(100, dec!(50))));
        assert!(cache.put(tick_at(101, dec!(55))));
        let got = cache.get(&Segment::from("NSE_FNO"), 1).unwrap();
        assert_eq!(got.ltp, dec!(55));
    }

    #[test]
    fn put_drops_older_ts() {
        let cache = TickCache::new(None);
        assert!(cache.put(tick_at(101, dec!(55))));
        assert!(!cache.put(tick_at(100, dec!(50))));
        let got = cache.get(&Segment::from("NSE_FNO"), 1).unwrap();
        assert_eq!(got.ltp, dec!(55));
    }

    #[test]
    fn normalize_is_idempotent() {
        let t = tick_at(100, dec!(50));
        let once = normalize_tick(t.clone());
        let twice = normalize_tick(once.clone());
        assert_eq!(once.ltp, twice.ltp);
        assert_eq!(once.day_high, twice.day_high);
        assert_eq!(once.day_low, twice.day_low);
        assert_eq!(once.atp, twice.atp);
    }

    #[test]
    fn oi_only_packet_preserves_price_fields() {
        let cache = TickCache::new(None);
        cache.put(tick_at(100, dec!(50)));
        let instrument = Instrument {
            security_id: 1,
            segment: Segment::from("NSE_FNO"),
            symbol: "NIFTY".into(),
            instrument_type: InstrumentType::Option,
            lot_size: 75,
            strike: None,
            expiry: None,
            option_type: None,
        };
        let raw = RawPacket::OiOnly {
            segment: Segment::from("NSE_FNO"),
            security_id: 1,
            oi: dec!(12345),
            ts: Utc.timestamp_opt(101, 0).unwrap(),
        };
        assert!(cache.put_raw(raw, &instrument));
        let got = cache.get(&Segment::from("NSE_FNO"), 1).unwrap();
        assert_eq!(got.ltp, dec!(50));
        assert_eq!(got.oi, Some(dec!(12345)));
    }
}
