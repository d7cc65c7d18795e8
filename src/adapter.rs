//! Adapter layer: bridges the engine's f64 link math and the Decimal
//! currency types.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::currency::{ExchangeRate, Quantity};

/// Convert f64 to Decimal (lossy but sufficient for link factors).
pub fn to_decimal(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or(Decimal::ZERO)
}

/// Link efficiency as an attenuation factor, clamped to `[0, 1]`.
pub fn efficiency_factor(efficiency: f64) -> Decimal {
    if !efficiency.is_finite() {
        return Decimal::ZERO;
    }
    to_decimal(efficiency.clamp(0.0, 1.0))
}

/// Amounts that can be valued in primary units for link loads and the
/// per-cycle supply and demand budgets. Secondary amounts round up.
pub trait PrimaryValued: Quantity {
    fn to_primary_units(self, rate: &ExchangeRate) -> i64;

    fn to_decimal_amount(self) -> Decimal;
}

impl PrimaryValued for i64 {
    fn to_primary_units(self, _rate: &ExchangeRate) -> i64 {
        self
    }

    fn to_decimal_amount(self) -> Decimal {
        Decimal::from(self)
    }
}

impl PrimaryValued for Decimal {
    fn to_primary_units(self, rate: &ExchangeRate) -> i64 {
        rate.primary_ceiling(self)
    }

    fn to_decimal_amount(self) -> Decimal {
        self
    }
}
