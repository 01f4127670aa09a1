//! C3 — Wallet: atomic available/used/realized-PnL accounting. `used` tracks
//! the cost basis currently blocked in open positions so that
//! `total = available + used` always holds (spec.md §3, §4.3, §8).
//!
//! A single mutex guards the whole state so a gateway operation's
//! read-validate-write cycle can never interleave with another mutation of
//! the same wallet (spec.md §5).

use crate::domain::errors::WalletError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub available: Decimal,
    pub used: Decimal,
    pub total: Decimal,
    pub realized_pnl: Decimal,
    pub starting_balance: Decimal,
}

struct WalletState {
    available: Decimal,
    used: Decimal,
    realized_pnl: Decimal,
    starting_balance: Decimal,
}

pub struct Wallet {
    state: Mutex<WalletState>,
}

impl Wallet {
    pub fn new(starting_balance: Decimal) -> Self {
        Self {
            state: Mutex::new(WalletState {
                available: starting_balance,
                used: Decimal::ZERO,
                realized_pnl: Decimal::ZERO,
                starting_balance,
            }),
        }
    }

    pub fn snapshot(&self) -> WalletSnapshot {
        let state = self.state.lock().expect("wallet lock poisoned");
        WalletSnapshot {
            available: state.available,
            used: state.used,
            total: state.available + state.used,
            realized_pnl: state.realized_pnl,
            starting_balance: state.starting_balance,
        }
    }

    /// Blocks `cost_basis + fee` from `available` into `used`. Fails without
    /// mutating state if `available < cost_basis + fee`.
    pub fn debit(&self, cost_basis: Decimal, fee: Decimal) -> Result<(), WalletError> {
        let required = cost_basis + fee;
        if required < Decimal::ZERO {
            return Err(WalletError::InvalidAmount(required));
        }
        let mut state = self.state.lock().expect("wallet lock poisoned");
        if state.available < required {
            return Err(WalletError::InsufficientFunds {
                need: required,
                available: state.available,
            });
        }
        state.available -= required;
        state.used += cost_basis;
        Ok(())
    }

    /// Releases `cost_basis_released` back out of `used`, and credits
    /// `gross_proceeds - fee` into `available`. Always succeeds.
    pub fn credit(&self, gross_proceeds: Decimal, fee: Decimal, cost_basis_released: Decimal) {
        let mut state = self.state.lock().expect("wallet lock poisoned");
        state.available += gross_proceeds - fee;
        state.used = (state.used - cost_basis_released).max(Decimal::ZERO);
    }

    pub fn record_realized(&self, pnl: Decimal) {
        let mut state = self.state.lock().expect("wallet lock poisoned");
        state.realized_pnl += pnl;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn debit_fails_on_insufficient_funds() {
        let wallet = Wallet::new(dec!(1000));
        let err = wallet.debit(dec!(7500), dec!(20)).unwrap_err();
        match err {
            WalletError::InsufficientFunds { need, available } => {
                assert_eq!(need, dec!(7520));
                assert_eq!(available, dec!(1000));
            }
            _ => panic!("wrong error"),
        }
        let snap = wallet.snapshot();
        assert_eq!(snap.available, dec!(1000));
        assert_eq!(snap.used, dec!(0));
    }

    #[test]
    fn total_equals_available_plus_used_after_every_mutation() {
        let wallet = Wallet::new(dec!(100000));
        wallet.debit(dec!(7500), dec!(20)).unwrap();
        let s1 = wallet.snapshot();
        assert_eq!(s1.total, s1.available + s1.used);

        wallet.debit(dec!(10500), dec!(20)).unwrap();
        let s2 = wallet.snapshot();
        assert_eq!(s2.total, s2.available + s2.used);
        assert_eq!(s2.used, dec!(18000));

        wallet.credit(dec!(12000), dec!(20), dec!(9000));
        wallet.record_realized(dec!(3000));
        let s3 = wallet.snapshot();
        assert_eq!(s3.total, s3.available + s3.used);
        assert_eq!(s3.used, dec!(9000));
        assert_eq!(s3.realized_pnl, dec!(3000));
    }

    #[test]
    fn round_trip_buy_then_sell_same_price_zero_fee_restores_available() {
        let wallet = Wallet::new(dec!(100000));
        wallet.debit(dec!(7500), dec!(0)).unwrap();
        wallet.credit(dec!(7500), dec!(0), dec!(7500));
        wallet.record_realized(dec!(0));
        let snap = wallet.snapshot();
        assert_eq!(snap.available, dec!(100000));
        assert_eq!(snap.used, dec!(0));
        assert_eq!(snap.realized_pnl, dec!(0));
    }

    #[test]
    fn available_never_negative() {
        let wallet = Wallet::new(dec!(100));
        assert!(wallet.debit(dec!(1000), dec!(0)).is_err());
        assert!(wallet.snapshot().available >= Decimal::ZERO);
    }
}
