// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Dual-currency storage behind a priority/conversion policy.
//!
//! All public amounts are expressed in primary units. Moving energy through
//! the secondary cell always converts at the storage's current
//! `conversion_efficiency`, so the secondary leg is lossy in both
//! directions while the primary leg is exact.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StorageTuning;
use crate::currency::ExchangeRate;
use crate::storage::cell::{PrimaryCell, SecondaryCell};

// ---------------------------------------------------------------------------
// PriorityPolicy
// ---------------------------------------------------------------------------

/// Which cell a hybrid storage tries first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriorityPolicy {
    PrimaryFirst,
    SecondaryFirst,
    /// Split every request in half across both cells.
    Balanced,
    /// Pick one of the above from the current fill ratio.
    Optimized,
}

impl PriorityPolicy {
    /// Whether a transfer between two hybrids should run in secondary.
    pub fn favors_secondary(&self) -> bool {
        matches!(self, Self::SecondaryFirst | Self::Optimized)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Receive,
    Extract,
}

// ---------------------------------------------------------------------------
// HybridStorage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HybridStorage {
    primary: PrimaryCell,
    secondary: SecondaryCell,
    policy: PriorityPolicy,
    auto_conversion: bool,
    conversion_efficiency: Decimal,
    rate: ExchangeRate,
    tuning: StorageTuning,
    primary_ops: u64,
    secondary_ops: u64,
    last_tune_ms: u64,
}

impl HybridStorage {
    /// Balanced policy, auto-conversion on, default efficiency.
    pub fn new(primary: PrimaryCell, secondary: SecondaryCell, rate: ExchangeRate) -> Self {
        let tuning = StorageTuning::default();
        Self {
            primary,
            secondary,
            policy: PriorityPolicy::Balanced,
            auto_conversion: true,
            conversion_efficiency: tuning.default_efficiency,
            rate,
            tuning,
            primary_ops: 0,
            secondary_ops: 0,
            last_tune_ms: 0,
        }
    }

    pub fn with_policy(mut self, policy: PriorityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_auto_conversion(mut self, enabled: bool) -> Self {
        self.auto_conversion = enabled;
        self
    }

    /// Replace the tuning parameters; the current efficiency is re-clamped.
    pub fn with_tuning(mut self, tuning: StorageTuning) -> Self {
        self.conversion_efficiency = tuning.clamp_efficiency(self.conversion_efficiency);
        self.tuning = tuning;
        self
    }

    pub fn with_efficiency(mut self, efficiency: Decimal) -> Self {
        self.set_conversion_efficiency(efficiency);
        self
    }

    // -- Accessors -----------------------------------------------------------

    pub fn policy(&self) -> PriorityPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: PriorityPolicy) {
        self.policy = policy;
    }

    pub fn auto_conversion(&self) -> bool {
        self.auto_conversion
    }

    pub fn set_auto_conversion(&mut self, enabled: bool) {
        self.auto_conversion = enabled;
    }

    pub fn conversion_efficiency(&self) -> Decimal {
        self.conversion_efficiency
    }

    /// Set the efficiency, clamped into the tuning bounds.
    pub fn set_conversion_efficiency(&mut self, efficiency: Decimal) {
        self.conversion_efficiency = self.tuning.clamp_efficiency(efficiency);
    }

    pub fn primary(&self) -> &PrimaryCell {
        &self.primary
    }

    pub fn secondary(&self) -> &SecondaryCell {
        &self.secondary
    }

    pub fn exchange_rate(&self) -> &ExchangeRate {
        &self.rate
    }

    /// Restore stored amounts, each clamped to its cell's capacity.
    pub fn set_stored(&mut self, primary: i64, secondary: Decimal) {
        self.primary.set_stored(primary);
        self.secondary.set_stored(secondary);
    }

    /// Total stored, in primary units (secondary valued losslessly).
    pub fn stored(&self) -> i64 {
        self.primary.stored().saturating_add(self.rate.primary_value(self.secondary.stored()))
    }

    /// Total stored as an exact primary equivalent; unlike [`stored`](Self::stored)
    /// a fractional secondary remainder is kept.
    pub fn stored_value(&self) -> Decimal {
        Decimal::from(self.primary.stored()) + self.rate.exact_primary_value(self.secondary.stored())
    }

    /// Total capacity, in primary units.
    pub fn capacity(&self) -> i64 {
        self.primary.capacity().saturating_add(self.rate.primary_value(self.secondary.capacity()))
    }

    /// Mixed fill ratio across both cells.
    pub fn fill_ratio(&self) -> f64 {
        let cap = self.capacity();
        if cap <= 0 {
            return 0.0;
        }
        self.stored() as f64 / cap as f64
    }

    /// `(primary, secondary)` operation counts since the last tuning step.
    pub fn operation_counts(&self) -> (u64, u64) {
        (self.primary_ops, self.secondary_ops)
    }

    // -- Public transfer surface --------------------------------------------

    /// Accept up to `amount` primary units according to the policy.
    pub fn receive_energy(&mut self, amount: i64, simulate: bool) -> i64 {
        if amount <= 0 {
            return 0;
        }
        let policy = self.effective_policy(Flow::Receive);
        self.dispatch(policy, Flow::Receive, amount, simulate)
    }

    /// Release up to `amount` primary units according to the policy.
    pub fn extract_energy(&mut self, amount: i64, simulate: bool) -> i64 {
        if amount <= 0 {
            return 0;
        }
        let policy = self.effective_policy(Flow::Extract);
        self.dispatch(policy, Flow::Extract, amount, simulate)
    }

    /// Direct access to the secondary cell, no conversion.
    pub fn receive_secondary(&mut self, amount: Decimal, simulate: bool) -> Decimal {
        let moved = self.secondary.receive(amount, simulate);
        if !simulate && moved > Decimal::ZERO {
            self.secondary_ops += 1;
        }
        moved
    }

    /// Direct access to the secondary cell, no conversion.
    pub fn extract_secondary(&mut self, amount: Decimal, simulate: bool) -> Decimal {
        let moved = self.secondary.extract(amount, simulate);
        if !simulate && moved > Decimal::ZERO {
            self.secondary_ops += 1;
        }
        moved
    }

    // -- Self-tuning -----------------------------------------------------------

    /// Run one tuning step if at least `interval_ms` of simulated time has
    /// passed. Returns whether the efficiency moved.
    ///
    /// The step only applies when the secondary cell carried traffic since the
    /// previous step: scarce energy (`r < low_fill`) nudges efficiency up,
    /// abundant energy (`r > high_fill`) nudges it down. The result is
    /// always clamped into `[min_efficiency, max_efficiency]`.
    pub fn tune(&mut self, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_tune_ms) < self.tuning.interval_ms {
            return false;
        }
        self.last_tune_ms = now_ms;
        let (primary_ops, secondary_ops) = (self.primary_ops, self.secondary_ops);
        self.primary_ops = 0;
        self.secondary_ops = 0;
        if secondary_ops == 0 {
            return false;
        }

        let r = self.fill_ratio();
        let before = self.conversion_efficiency;
        let proposed = if r < self.tuning.low_fill {
            before + self.tuning.step
        } else if r > self.tuning.high_fill {
            before - self.tuning.step
        } else {
            before
        };
        self.conversion_efficiency = self.tuning.clamp_efficiency(proposed);

        let moved = self.conversion_efficiency != before;
        if moved {
            debug!(
                fill = r,
                primary_ops,
                secondary_ops,
                from = %before,
                to = %self.conversion_efficiency,
                "conversion efficiency tuned"
            );
        }
        moved
    }

    // -- Internals -------------------------------------------------------------

    /// Resolve `Optimized` to a concrete policy for one direction.
    ///
    /// Receive: when nearly empty refill through primary (no conversion
    /// loss); when nearly full use whichever cell has more relative headroom.
    /// Extract: when nearly empty draw primary first to conserve; when nearly
    /// full drain whichever cell is fuller.
    fn effective_policy(&self, flow: Flow) -> PriorityPolicy {
        if self.policy != PriorityPolicy::Optimized {
            return self.policy;
        }
        let r = self.fill_ratio();
        if r < self.tuning.low_fill {
            return PriorityPolicy::PrimaryFirst;
        }
        if r > self.tuning.high_fill {
            let primary_fill = self.primary.fill_ratio();
            let secondary_fill = self.secondary.fill_ratio();
            let primary_wins = match flow {
                Flow::Receive => primary_fill <= secondary_fill,
                Flow::Extract => primary_fill >= secondary_fill,
            };
            return if primary_wins {
                PriorityPolicy::PrimaryFirst
            } else {
                PriorityPolicy::SecondaryFirst
            };
        }
        PriorityPolicy::Balanced
    }

    fn dispatch(&mut self, policy: PriorityPolicy, flow: Flow, amount: i64, simulate: bool) -> i64 {
        match policy {
            PriorityPolicy::PrimaryFirst => {
                let first = self.primary_leg(flow, amount, simulate);
                let rest = amount - first;
                let second = if rest > 0 && self.auto_conversion {
                    self.secondary_leg(flow, rest, simulate)
                } else {
                    0
                };
                first + second
            }
            PriorityPolicy::SecondaryFirst => {
                let first = self.secondary_leg(flow, amount, simulate);
                let rest = amount - first;
                let second = if rest > 0 && self.auto_conversion {
                    self.primary_leg(flow, rest, simulate)
                } else {
                    0
                };
                first + second
            }
            PriorityPolicy::Balanced => {
                let secondary_half = amount / 2;
                let primary_half = amount - secondary_half;
                self.primary_leg(flow, primary_half, simulate)
                    + self.secondary_leg(flow, secondary_half, simulate)
            }
            PriorityPolicy::Optimized => {
                let resolved = self.effective_policy(flow);
                if resolved == PriorityPolicy::Optimized {
                    return 0;
                }
                self.dispatch(resolved, flow, amount, simulate)
            }
        }
    }

    fn primary_leg(&mut self, flow: Flow, amount: i64, simulate: bool) -> i64 {
        let moved = match flow {
            Flow::Receive => self.primary.receive(amount, simulate),
            Flow::Extract => self.primary.extract(amount, simulate),
        };
        if !simulate && moved > 0 {
            self.primary_ops += 1;
        }
        moved
    }

    /// Move `amount` primary units through the secondary cell. Returns the
    /// primary units actually accounted for.
    fn secondary_leg(&mut self, flow: Flow, amount: i64, simulate: bool) -> i64 {
        if amount <= 0 {
            return 0;
        }
        let eff = self.conversion_efficiency;
        match flow {
            Flow::Receive => {
                let wanted = self.rate.to_secondary(amount, eff);
                let room = self.secondary.receive(wanted, true);
                let units = if room == wanted {
                    amount
                } else {
                    self.rate.primary_fitting(room, eff)
                };
                let converted = self.rate.to_secondary(units, eff);
                if units == 0 || converted <= Decimal::ZERO {
                    return 0;
                }
                self.secondary.receive(converted, simulate);
                if !simulate {
                    self.secondary_ops += 1;
                }
                units
            }
            Flow::Extract => {
                let needed = match self.rate.secondary_needed(amount, eff) {
                    Some(n) => n,
                    None => return 0,
                };
                let available = self.secondary.extract(needed, true);
                let out = self.rate.to_primary(available, eff).min(amount);
                if out == 0 {
                    return 0;
                }
                let take = self
                    .rate
                    .secondary_needed(out, eff)
                    .map_or(available, |n| n.min(available));
                self.secondary.extract(take, simulate);
                if !simulate {
                    self.secondary_ops += 1;
                }
                out
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::cell::EnergyCell;
    use rust_decimal_macros::dec;

    /// 1000 primary + 2500 secondary (= 1000 primary-equivalent).
    fn storage(policy: PriorityPolicy) -> HybridStorage {
        HybridStorage::new(
            EnergyCell::symmetric(1000, 1000),
            EnergyCell::symmetric(dec!(2500), dec!(2500)),
            ExchangeRate::default(),
        )
        .with_policy(policy)
    }

    #[test]
    fn primary_first_fills_primary_before_converting() {
        let mut s = storage(PriorityPolicy::PrimaryFirst);
        assert_eq!(s.receive_energy(600, false), 600);
        assert_eq!(s.primary().stored(), 600);
        assert_eq!(s.secondary().stored(), Decimal::ZERO);

        // 400 fit in primary, 200 spill into secondary at 0.95.
        assert_eq!(s.receive_energy(600, false), 600);
        assert_eq!(s.primary().stored(), 1000);
        assert_eq!(s.secondary().stored(), dec!(475));
    }

    #[test]
    fn primary_first_without_auto_conversion_stops_at_primary() {
        let mut s = storage(PriorityPolicy::PrimaryFirst).with_auto_conversion(false);
        assert_eq!(s.receive_energy(1500, false), 1000);
        assert_eq!(s.secondary().stored(), Decimal::ZERO);
    }

    #[test]
    fn secondary_first_converts_whole_request() {
        let mut s = storage(PriorityPolicy::SecondaryFirst);
        assert_eq!(s.receive_energy(100, false), 100);
        assert_eq!(s.primary().stored(), 0);
        assert_eq!(s.secondary().stored(), dec!(237.5));
    }

    #[test]
    fn balanced_splits_and_sums_partial_results() {
        let mut s = HybridStorage::new(
            EnergyCell::symmetric(1000, 1000),
            EnergyCell::symmetric(dec!(10), dec!(10)),
            ExchangeRate::default(),
        );
        // Secondary half only fits 4 units (4 * 2.5 * 0.95 = 9.5 <= 10).
        let accepted = s.receive_energy(101, false);
        assert_eq!(s.primary().stored(), 51);
        assert_eq!(accepted, 51 + 4);
    }

    #[test]
    fn extract_never_exceeds_stored_value() {
        let mut s = storage(PriorityPolicy::SecondaryFirst);
        s.set_stored(0, dec!(250));
        // 250 secondary is 100 primary at full efficiency, less after loss.
        let out = s.extract_energy(1000, false);
        assert!(out <= 95, "got {out}");
        assert!(out > 0);
    }

    #[test]
    fn simulate_leaves_both_cells_untouched() {
        let mut s = storage(PriorityPolicy::Balanced);
        s.set_stored(500, dec!(500));
        let before = (s.primary().stored(), s.secondary().stored());
        s.receive_energy(300, true);
        s.extract_energy(300, true);
        assert_eq!((s.primary().stored(), s.secondary().stored()), before);
        assert_eq!(s.operation_counts(), (0, 0));
    }

    #[test]
    fn negative_amounts_rejected() {
        let mut s = storage(PriorityPolicy::Balanced);
        assert_eq!(s.receive_energy(-10, false), 0);
        assert_eq!(s.extract_energy(-10, false), 0);
    }

    #[test]
    fn optimized_refills_primary_when_nearly_empty() {
        let mut s = storage(PriorityPolicy::Optimized);
        assert_eq!(s.receive_energy(100, false), 100);
        assert_eq!(s.primary().stored(), 100);
        assert_eq!(s.secondary().stored(), Decimal::ZERO);
    }

    #[test]
    fn optimized_balances_in_mid_range() {
        let mut s = storage(PriorityPolicy::Optimized);
        s.set_stored(500, dec!(1250));
        s.receive_energy(100, false);
        assert_eq!(s.primary().stored(), 550);
        assert!(s.secondary().stored() > dec!(1250));
    }

    #[test]
    fn optimized_drains_fuller_cell_when_nearly_full() {
        let mut s = storage(PriorityPolicy::Optimized);
        s.set_stored(900, dec!(2500));
        s.extract_energy(50, false);
        assert_eq!(s.primary().stored(), 900);
        assert!(s.secondary().stored() < dec!(2500));
    }

    #[test]
    fn tuning_raises_efficiency_when_scarce() {
        let mut s = storage(PriorityPolicy::SecondaryFirst);
        s.receive_energy(10, false);
        assert!(s.tune(1_000));
        assert_eq!(s.conversion_efficiency(), dec!(0.955));
    }

    #[test]
    fn tuning_lowers_efficiency_when_abundant() {
        let mut s = storage(PriorityPolicy::SecondaryFirst);
        s.set_stored(1000, dec!(2400));
        s.extract_energy(1, false);
        assert!(s.tune(1_000));
        assert_eq!(s.conversion_efficiency(), dec!(0.945));
    }

    #[test]
    fn tuning_respects_interval_and_requires_secondary_traffic() {
        let mut s = storage(PriorityPolicy::PrimaryFirst);
        s.receive_energy(10, false);
        assert!(!s.tune(500), "interval not yet elapsed");
        assert!(!s.tune(1_000), "primary-only traffic leaves efficiency alone");
        assert_eq!(s.conversion_efficiency(), dec!(0.95));
    }

    #[test]
    fn tuning_never_leaves_bounds() {
        let mut s = storage(PriorityPolicy::SecondaryFirst);
        for i in 1..=100u64 {
            s.receive_secondary(dec!(0.0001), false);
            s.extract_secondary(dec!(0.0001), false);
            s.tune(i * 1_000);
        }
        assert_eq!(s.conversion_efficiency(), dec!(0.99));

        s.set_stored(1000, dec!(2500));
        for i in 101..=200u64 {
            s.extract_secondary(dec!(0.0001), false);
            s.tune(i * 1_000);
        }
        assert_eq!(s.conversion_efficiency(), dec!(0.90));
    }

    #[test]
    fn efficiency_setter_clamps() {
        let mut s = storage(PriorityPolicy::Balanced);
        s.set_conversion_efficiency(dec!(1.5));
        assert_eq!(s.conversion_efficiency(), dec!(0.99));
        s.set_conversion_efficiency(dec!(0.1));
        assert_eq!(s.conversion_efficiency(), dec!(0.90));
    }
}
