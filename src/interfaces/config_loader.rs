//! Config-file and instrument-master loading (SPEC_FULL.md §6 AMBIENT). Both
//! are explicit external collaborators per spec.md §1 — the core only ever
//! consumes an already-built `EngineConfig`/`InstrumentLookup`.
//!
//! The per-symbol table reuses `dotenvy`'s key=value parser instead of
//! pulling in a YAML crate the teacher never depended on: a config file is a
//! flat `SYMBOL__<SYMBOL>__<field>=value` list, the same shape a `.env` file
//! already takes. The instrument master is a hand-rolled CSV reader — CSV
//! parsing is explicitly out of the core's scope (spec.md §1), and no CSV
//! crate is part of the teacher's stack.

use crate::domain::types::{Instrument, InstrumentType, OptionType, Segment};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Parses `SYMBOL__<SYMBOL>__<field>=value` entries into the nested map
/// `config::symbol_configs_from_map` expects. Lines outside that prefix
/// (global overrides meant for `std::env::var`) are ignored here.
pub fn load_symbol_table(path: &Path) -> Result<HashMap<String, HashMap<String, String>>> {
    let mut out: HashMap<String, HashMap<String, String>> = HashMap::new();
    for entry in dotenvy::from_path_iter(path).with_context(|| format!("failed to open {}", path.display()))? {
        let (key, value) = entry.with_context(|| format!("malformed entry in {}", path.display()))?;
        let Some(rest) = key.strip_prefix("SYMBOL__") else { continue };
        let Some((symbol, field)) = rest.split_once("__") else { continue };
        out.entry(symbol.to_string()).or_default().insert(field.to_lowercase(), value);
    }
    Ok(out)
}

/// Columns: `security_id,segment,symbol,instrument_type,lot_size,strike,expiry,option_type`.
/// `strike`/`expiry`/`option_type` are blank for the index row itself. A
/// missing or unreadable file degrades to an empty instrument master rather
/// than aborting startup — entries are suppressed, but an already-open
/// position's risk management doesn't depend on this lookup succeeding.
pub fn load_instrument_master(path: Option<&str>) -> Vec<Instrument> {
    let Some(path) = path else {
        warn!("INSTRUMENT_MASTER_CSV not set; instrument lookups will be empty");
        return Vec::new();
    };
    match std::fs::read_to_string(path) {
        Ok(contents) => contents.lines().skip(1).filter_map(parse_instrument_row).collect(),
        Err(e) => {
            warn!(path, "failed to read instrument master: {e}");
            Vec::new()
        }
    }
}

fn parse_instrument_row(line: &str) -> Option<Instrument> {
    let cols: Vec<&str> = line.split(',').map(str::trim).collect();
    if cols.len() < 8 {
        return None;
    }
    Some(Instrument {
        security_id: cols[0].parse().ok()?,
        segment: Segment::from(cols[1]),
        symbol: cols[2].to_string(),
        instrument_type: parse_instrument_type(cols[3])?,
        lot_size: cols[4].parse().ok()?,
        strike: if cols[5].is_empty() { None } else { Decimal::from_str(cols[5]).ok() },
        expiry: if cols[6].is_empty() { None } else { NaiveDate::parse_from_str(cols[6], "%Y-%m-%d").ok() },
        option_type: parse_option_type(cols[7]),
    })
}

fn parse_instrument_type(s: &str) -> Option<InstrumentType> {
    match s.to_ascii_uppercase().as_str() {
        "INDEX" => Some(InstrumentType::Index),
        "OPTION" => Some(InstrumentType::Option),
        "FUTURE" => Some(InstrumentType::Future),
        "EQUITY" => Some(InstrumentType::Equity),
        _ => None,
    }
}

fn parse_option_type(s: &str) -> Option<OptionType> {
    match s.to_ascii_uppercase().as_str() {
        "CE" => Some(OptionType::Ce),
        "PE" => Some(OptionType::Pe),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_option_row() {
        let inst = parse_instrument_row("42,NSE_FNO,NIFTY,OPTION,75,25000,2026-08-06,CE").unwrap();
        assert_eq!(inst.security_id, 42);
        assert_eq!(inst.lot_size, 75);
        assert_eq!(inst.option_type, Some(OptionType::Ce));
        assert_eq!(inst.expiry, NaiveDate::from_ymd_opt(2026, 8, 6));
    }

    #[test]
    fn index_row_has_no_strike_or_option_type() {
        let inst = parse_instrument_row("13,IDX_I,NIFTY,INDEX,1,,,").unwrap();
        assert_eq!(inst.strike, None);
        assert_eq!(inst.option_type, None);
    }

    #[test]
    fn short_row_is_rejected() {
        assert!(parse_instrument_row("13,IDX_I,NIFTY").is_none());
    }

    #[test]
    fn missing_file_degrades_to_empty() {
        assert!(load_instrument_master(Some("/nonexistent/path.csv")).is_empty());
        assert!(load_instrument_master(None).is_empty());
    }

    #[test]
    fn symbol_table_groups_fields_by_symbol() {
        let path = std::env::temp_dir().join(format!("scalper_test_symbols_{}.env", std::process::id()));
        std::fs::write(&path, "SYMBOL__NIFTY__idx_sid=13\nSYMBOL__NIFTY__seg_idx=IDX_I\nOTHER=ignored\n").unwrap();
        let table = load_symbol_table(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(table["NIFTY"]["idx_sid"], "13");
        assert_eq!(table["NIFTY"]["seg_idx"], "IDX_I");
        assert_eq!(table.len(), 1);
    }
}
