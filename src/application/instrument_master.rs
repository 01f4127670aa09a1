//! C2 — InstrumentMaster: read-only instrument metadata lookup. Loading the
//! table from the CSV instrument master is an external collaborator's job
//! (spec.md §1); this component only consumes an already-loaded table.

use crate::domain::ports::InstrumentLookup;
use crate::domain::types::{Instrument, OptionType, Segment};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;

pub struct InMemoryInstrumentMaster {
    by_security_id: HashMap<i64, Instrument>,
    by_symbol: HashMap<String, Vec<i64>>,
}

impl InMemoryInstrumentMaster {
    pub fn new(instruments: Vec<Instrument>) -> Self {
        let mut by_security_id = HashMap::with_capacity(instruments.len());
        let mut by_symbol: HashMap<String, Vec<i64>> = HashMap::new();
        for instrument in instruments {
            by_symbol
                .entry(instrument.symbol.clone())
                .or_default()
                .push(instrument.security_id);
            by_security_id.insert(instrument.security_id, instrument);
        }
        Self {
            by_security_id,
            by_symbol,
        }
    }
}

impl InstrumentLookup for InMemoryInstrumentMaster {
    fn security_id(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        strike: Decimal,
        option_type: OptionType,
    ) -> Option<i64> {
        let ids = self.by_symbol.get(symbol)?;
        ids.iter().copied().find(|id| {
            self.by_security_id.get(id).is_some_and(|inst| {
                inst.expiry == Some(expiry)
                    && inst.strike == Some(strike)
                    && inst.option_type == Some(option_type)
            })
        })
    }

    fn expiry_dates(&self, symbol: &str) -> Vec<NaiveDate> {
        let Some(ids) = self.by_symbol.get(symbol) else {
            return Vec::new();
        };
        let mut dates: Vec<NaiveDate> = ids
            .iter()
            .filter_map(|id| self.by_security_id.get(id).and_then(|i| i.expiry))
            .collect();
        dates.sort();
        dates.dedup();
        dates
    }

    fn strikes(&self, symbol: &str, expiry: NaiveDate) -> Vec<Decimal> {
        let Some(ids) = self.by_symbol.get(symbol) else {
            return Vec::new();
        };
        let mut strikes: Vec<Decimal> = ids
            .iter()
            .filter_map(|id| self.by_security_id.get(id))
            .filter(|inst| inst.expiry == Some(expiry))
            .filter_map(|inst| inst.strike)
            .collect();
        strikes.sort();
        strikes.dedup();
        strikes
    }

    fn exchange_segment(&self, security_id: i64) -> Option<Segment> {
        self.by_security_id.get(&security_id).map(|i| i.segment.clone())
    }

    fn lot_size(&self, security_id: i64) -> Option<u32> {
        self.by_security_id.get(&security_id).map(|i| i.lot_size)
    }

    fn instrument(&self, security_id: i64) -> Option<Instrument> {
        self.by_security_id.get(&security_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::InstrumentType;
    use rust_decimal_macros::dec;

    fn sample() -> InMemoryInstrumentMaster {
        InMemoryInstrumentMaster::new(vec![Instrument {
            security_id: 42,
            segment: Segment::from("NSE_FNO"),
            symbol: "NIFTY".into(),
            instrument_type: InstrumentType::Option,
            lot_size: 75,
            strike: Some(dec!(25000)),
            expiry: NaiveDate::from_ymd_opt(2026, 8, 6),
            option_type: Some(OptionType::Ce),
        }])
    }

    #[test]
    fn looks_up_known_instrument() {
        let master = sample();
        let expiry = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        assert_eq!(
            master.security_id("NIFTY", expiry, dec!(25000), OptionType::Ce),
            Some(42)
        );
        assert_eq!(master.lot_size(42), Some(75));
        assert_eq!(master.exchange_segment(42), Some(Segment::from("NSE_FNO")));
    }

    #[test]
    fn unknown_query_returns_none() {
        let master = sample();
        let expiry = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        assert_eq!(
            master.security_id("BANKNIFTY", expiry, dec!(50000), OptionType::Pe),
            None
        );
        assert_eq!(master.lot_size(999), None);
    }
}
