// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Bounded single-currency accumulator with per-call rate caps.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency::Quantity;

/// A bounded accumulator of one currency.
///
/// Invariant: `0 <= stored <= capacity`. A single `receive`/`extract` call
/// never moves more than the lesser of the request, the remaining headroom
/// (or stored amount) and the per-call cap. Non-positive requests move
/// nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyCell<Q> {
    capacity: Q,
    max_receive: Q,
    max_extract: Q,
    stored: Q,
}

/// Integer-valued cell.
pub type PrimaryCell = EnergyCell<i64>;
/// Real-valued cell.
pub type SecondaryCell = EnergyCell<Decimal>;

impl<Q: Quantity> EnergyCell<Q> {
    pub fn new(capacity: Q, max_receive: Q, max_extract: Q) -> Self {
        let zero = Q::zero();
        Self {
            capacity: capacity.max(zero),
            max_receive: max_receive.max(zero),
            max_extract: max_extract.max(zero),
            stored: zero,
        }
    }

    /// Same cap for both directions.
    pub fn symmetric(capacity: Q, max_transfer: Q) -> Self {
        Self::new(capacity, max_transfer, max_transfer)
    }

    pub fn with_stored(mut self, stored: Q) -> Self {
        self.set_stored(stored);
        self
    }

    /// Accept up to `amount`; returns what was (or would be) accepted.
    pub fn receive(&mut self, amount: Q, simulate: bool) -> Q {
        if !amount.is_positive() {
            return Q::zero();
        }
        let accepted = amount.min(self.headroom()).min(self.max_receive);
        if !simulate {
            self.stored = self.stored + accepted;
        }
        accepted
    }

    /// Remove up to `amount`; returns what was (or would be) removed.
    pub fn extract(&mut self, amount: Q, simulate: bool) -> Q {
        if !amount.is_positive() {
            return Q::zero();
        }
        let removed = amount.min(self.stored).min(self.max_extract);
        if !simulate {
            self.stored = self.stored - removed;
        }
        removed
    }

    pub fn stored(&self) -> Q {
        self.stored
    }

    pub fn capacity(&self) -> Q {
        self.capacity
    }

    pub fn headroom(&self) -> Q {
        self.capacity - self.stored
    }

    pub fn max_receive(&self) -> Q {
        self.max_receive
    }

    pub fn max_extract(&self) -> Q {
        self.max_extract
    }

    /// `stored / capacity`, or 0 for a zero-capacity cell.
    pub fn fill_ratio(&self) -> f64 {
        let cap = self.capacity.as_f64();
        if cap <= 0.0 {
            return 0.0;
        }
        self.stored.as_f64() / cap
    }

    /// Overwrite the stored amount, clamped into `[0, capacity]`.
    pub fn set_stored(&mut self, stored: Q) {
        self.stored = stored.max(Q::zero()).min(self.capacity);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn receive_is_capped_per_call_and_by_capacity() {
        let mut cell = PrimaryCell::new(1000, 100, 100);
        assert_eq!(cell.receive(150, false), 100);
        assert_eq!(cell.stored(), 100);

        for _ in 0..9 {
            cell.receive(100, false);
        }
        assert_eq!(cell.stored(), 1000);
        assert_eq!(cell.receive(100, false), 0);
    }

    #[test]
    fn simulate_never_mutates() {
        let mut cell = PrimaryCell::symmetric(500, 500).with_stored(200);
        assert_eq!(cell.receive(1000, true), 300);
        assert_eq!(cell.extract(1000, true), 200);
        assert_eq!(cell.stored(), 200);
    }

    #[test]
    fn negative_requests_move_nothing() {
        let mut cell = PrimaryCell::symmetric(500, 500).with_stored(200);
        assert_eq!(cell.receive(-50, false), 0);
        assert_eq!(cell.extract(-50, false), 0);
        assert_eq!(cell.stored(), 200);

        let mut sec = SecondaryCell::symmetric(dec!(10), dec!(10));
        assert_eq!(sec.receive(dec!(-1.5), false), Decimal::ZERO);
    }

    #[test]
    fn extract_is_capped_by_stored_and_rate() {
        let mut cell = PrimaryCell::new(1000, 1000, 64).with_stored(100);
        assert_eq!(cell.extract(80, false), 64);
        assert_eq!(cell.extract(80, false), 36);
        assert_eq!(cell.extract(80, false), 0);
    }

    #[test]
    fn set_stored_clamps() {
        let mut cell = SecondaryCell::symmetric(dec!(10), dec!(1));
        cell.set_stored(dec!(25));
        assert_eq!(cell.stored(), dec!(10));
        cell.set_stored(dec!(-3));
        assert_eq!(cell.stored(), Decimal::ZERO);
    }

    #[test]
    fn fill_ratio_of_empty_capacity_is_zero() {
        let cell = PrimaryCell::symmetric(0, 10);
        assert_eq!(cell.fill_ratio(), 0.0);
    }
}
