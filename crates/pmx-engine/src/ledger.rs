//! Cash ledger shared by the entry path and the monitor loop.
//!
//! Entries debit fill notional; completed exits credit the proceeds back.
//! The risk gate reads the available figure for its balance check, so both
//! legs of a round trip must land here or the gate starves over a session.

use parking_lot::Mutex;
use rust_decimal::Decimal;

pub struct BalanceLedger {
    cash: Mutex<Decimal>,
}

impl BalanceLedger {
    pub fn new(starting: Decimal) -> Self {
        Self {
            cash: Mutex::new(starting),
        }
    }

    pub fn available(&self) -> Decimal {
        *self.cash.lock()
    }

    /// Deduct fill notional for a new position.
    pub fn debit(&self, amount: Decimal) {
        *self.cash.lock() -= amount;
    }

    /// Credit exit proceeds (or an operator deposit).
    pub fn credit(&self, amount: Decimal) {
        *self.cash.lock() += amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_trip_restores_cash_plus_pnl() {
        let ledger = BalanceLedger::new(dec!(1000));
        ledger.debit(dec!(45)); // 100 @ 0.45
        assert_eq!(ledger.available(), dec!(955));
        ledger.credit(dec!(52)); // exited 100 @ 0.52
        assert_eq!(ledger.available(), dec!(1007));
    }
}
