// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! The capability interface devices expose to the grid, plus two
//! ready-made implementations.

use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::persistence::HybridStorageRecord;
use crate::storage::cell::PrimaryCell;
use crate::storage::hybrid::{HybridStorage, PriorityPolicy};
use crate::types::Capabilities;

/// Energy interface of a device.
///
/// Methods take `&self`: a handle is shared between the world that owns the
/// device and every network that discovered it, so implementations carry
/// their own interior mutability. Amounts are primary units unless the
/// method name says otherwise. `simulate = true` must never mutate.
pub trait EnergyHandler: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    fn stored(&self) -> i64;

    /// Stored energy as an exact primary equivalent. Dual-currency devices
    /// override this so sub-unit secondary amounts are not truncated away.
    fn stored_value(&self) -> Decimal {
        Decimal::from(self.stored())
    }

    fn capacity(&self) -> i64;

    fn receive(&self, amount: i64, simulate: bool) -> i64;

    fn extract(&self, amount: i64, simulate: bool) -> i64;

    /// `Some` for dual-currency storages.
    fn hybrid_policy(&self) -> Option<PriorityPolicy> {
        None
    }

    fn receive_secondary(&self, _amount: Decimal, _simulate: bool) -> Decimal {
        Decimal::ZERO
    }

    fn extract_secondary(&self, _amount: Decimal, _simulate: bool) -> Decimal {
        Decimal::ZERO
    }

    /// Called once per completed distribution cycle with simulated time.
    fn on_cycle(&self, _now_ms: u64) {}

    /// `stored / capacity`, 0 for zero capacity.
    fn fill_ratio(&self) -> f64 {
        let cap = self.capacity();
        if cap <= 0 {
            return 0.0;
        }
        self.stored() as f64 / cap as f64
    }
}

// ---------------------------------------------------------------------------
// SharedHybridStorage
// ---------------------------------------------------------------------------

/// A [`HybridStorage`] behind a mutex, usable as an [`EnergyHandler`].
pub struct SharedHybridStorage {
    inner: Mutex<HybridStorage>,
}

impl SharedHybridStorage {
    pub fn new(storage: HybridStorage) -> Self {
        Self { inner: Mutex::new(storage) }
    }

    /// Run `f` with exclusive access to the storage.
    pub fn with<R>(&self, f: impl FnOnce(&mut HybridStorage) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> HybridStorage {
        self.inner.lock().clone()
    }

    pub fn to_record(&self) -> HybridStorageRecord {
        HybridStorageRecord::capture(&self.inner.lock())
    }

    pub fn restore(&self, record: &HybridStorageRecord) {
        record.apply(&mut self.inner.lock());
    }
}

impl EnergyHandler for SharedHybridStorage {
    fn capabilities(&self) -> Capabilities {
        Capabilities { can_receive: true, can_extract: true }
    }

    fn stored(&self) -> i64 {
        self.inner.lock().stored()
    }

    fn stored_value(&self) -> Decimal {
        self.inner.lock().stored_value()
    }

    fn capacity(&self) -> i64 {
        self.inner.lock().capacity()
    }

    fn receive(&self, amount: i64, simulate: bool) -> i64 {
        self.inner.lock().receive_energy(amount, simulate)
    }

    fn extract(&self, amount: i64, simulate: bool) -> i64 {
        self.inner.lock().extract_energy(amount, simulate)
    }

    fn hybrid_policy(&self) -> Option<PriorityPolicy> {
        Some(self.inner.lock().policy())
    }

    fn receive_secondary(&self, amount: Decimal, simulate: bool) -> Decimal {
        self.inner.lock().receive_secondary(amount, simulate)
    }

    fn extract_secondary(&self, amount: Decimal, simulate: bool) -> Decimal {
        self.inner.lock().extract_secondary(amount, simulate)
    }

    fn on_cycle(&self, now_ms: u64) {
        self.inner.lock().tune(now_ms);
    }

    fn fill_ratio(&self) -> f64 {
        self.inner.lock().fill_ratio()
    }
}

// ---------------------------------------------------------------------------
// BasicStorage
// ---------------------------------------------------------------------------

/// Single primary cell with fixed capability flags.
///
/// `per_cycle` models the device itself: a positive value is generated into
/// the cell every cycle (a generator), a negative value is consumed from it
/// (a machine drawing power).
pub struct BasicStorage {
    cell: Mutex<PrimaryCell>,
    caps: Capabilities,
    per_cycle: i64,
}

impl BasicStorage {
    pub fn new(cell: PrimaryCell, caps: Capabilities) -> Self {
        Self { cell: Mutex::new(cell), caps, per_cycle: 0 }
    }

    /// Extract-only source holding `stored`.
    pub fn producer(capacity: i64, max_extract: i64, stored: i64) -> Self {
        Self::new(
            PrimaryCell::new(capacity, 0, max_extract).with_stored(stored),
            Capabilities { can_receive: false, can_extract: true },
        )
    }

    /// Receive-only sink.
    pub fn consumer(capacity: i64, max_receive: i64) -> Self {
        Self::new(
            PrimaryCell::new(capacity, max_receive, 0),
            Capabilities { can_receive: true, can_extract: false },
        )
    }

    /// Receives and extracts.
    pub fn battery(capacity: i64, max_transfer: i64, stored: i64) -> Self {
        Self::new(
            PrimaryCell::symmetric(capacity, max_transfer).with_stored(stored),
            Capabilities { can_receive: true, can_extract: true },
        )
    }

    pub fn with_per_cycle(mut self, per_cycle: i64) -> Self {
        self.per_cycle = per_cycle;
        self
    }

    pub fn set_stored(&self, stored: i64) {
        self.cell.lock().set_stored(stored);
    }
}

impl EnergyHandler for BasicStorage {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn stored(&self) -> i64 {
        self.cell.lock().stored()
    }

    fn capacity(&self) -> i64 {
        self.cell.lock().capacity()
    }

    fn receive(&self, amount: i64, simulate: bool) -> i64 {
        self.cell.lock().receive(amount, simulate)
    }

    fn extract(&self, amount: i64, simulate: bool) -> i64 {
        self.cell.lock().extract(amount, simulate)
    }

    fn on_cycle(&self, _now_ms: u64) {
        if self.per_cycle == 0 {
            return;
        }
        let mut cell = self.cell.lock();
        let next = cell.stored().saturating_add(self.per_cycle);
        cell.set_stored(next);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::ExchangeRate;
    use crate::storage::cell::EnergyCell;
    use rust_decimal_macros::dec;

    #[test]
    fn producer_cannot_receive() {
        let p = BasicStorage::producer(1000, 100, 1000);
        assert_eq!(p.receive(50, false), 0);
        assert_eq!(p.extract(500, false), 100);
        assert_eq!(p.stored(), 900);
    }

    #[test]
    fn per_cycle_generation_is_clamped() {
        let generator = BasicStorage::producer(1000, 100, 950).with_per_cycle(200);
        generator.on_cycle(50);
        assert_eq!(generator.stored(), 1000);

        let machine = BasicStorage::consumer(1000, 100).with_per_cycle(-40);
        machine.on_cycle(50);
        assert_eq!(machine.stored(), 0);
    }

    #[test]
    fn shared_hybrid_exposes_policy_and_secondary_lane() {
        let shared = SharedHybridStorage::new(
            HybridStorage::new(
                EnergyCell::symmetric(100, 100),
                EnergyCell::symmetric(dec!(250), dec!(250)),
                ExchangeRate::default(),
            )
            .with_policy(PriorityPolicy::SecondaryFirst),
        );
        assert_eq!(shared.hybrid_policy(), Some(PriorityPolicy::SecondaryFirst));
        assert_eq!(shared.receive_secondary(dec!(100), false), dec!(100));
        assert_eq!(shared.extract_secondary(dec!(40), false), dec!(40));
        assert_eq!(shared.with(|s| s.secondary().stored()), dec!(60));
        assert_eq!(shared.capacity(), 200);
    }

    #[test]
    fn stored_value_keeps_secondary_fraction() {
        let shared = SharedHybridStorage::new(HybridStorage::new(
            EnergyCell::symmetric(100, 100),
            EnergyCell::symmetric(dec!(10), dec!(10)),
            ExchangeRate::default(),
        ));
        shared.receive_secondary(dec!(1), false);
        assert_eq!(shared.stored(), 0);
        assert_eq!(shared.stored_value(), dec!(0.4));

        let basic = BasicStorage::producer(100, 10, 70);
        assert_eq!(basic.stored_value(), dec!(70));
    }
}
