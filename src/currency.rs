// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Currency arithmetic: the exchange rate pair and lossy conversion.
//!
//! Every conversion rounds toward zero. The round-trip invariant
//!
//! ```text
//! to_primary(to_secondary(x, e), e) <= x      for all x >= 0
//! ```
//!
//! holds for any efficiency `e` in `[0, 1]`, with equality only at `e = 1`.

use std::fmt;
use std::ops::{Add, Sub};

use num_traits::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Fractional digits kept on secondary amounts.
pub const SECONDARY_SCALE: u32 = 4;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised when an exchange rate pair is invalid.
#[derive(Debug, thiserror::Error)]
pub enum CurrencyError {
    #[error("exchange rates must be positive (got {primary_to_secondary} / {secondary_to_primary})")]
    NonPositiveRate {
        primary_to_secondary: Decimal,
        secondary_to_primary: Decimal,
    },

    #[error("rate pair amplifies value on a round trip ({product} > 1)")]
    Amplifying { product: Decimal },
}

/// Truncate a secondary amount to [`SECONDARY_SCALE`] digits, toward zero.
pub fn truncate_secondary(d: Decimal) -> Decimal {
    d.round_dp_with_strategy(SECONDARY_SCALE, RoundingStrategy::ToZero)
}

fn saturating_i64(d: Decimal) -> i64 {
    d.to_i64().unwrap_or(if d.is_sign_negative() { 0 } else { i64::MAX })
}

// ---------------------------------------------------------------------------
// Quantity
// ---------------------------------------------------------------------------

/// An amount in one currency. Implemented for `i64` (primary) and
/// `Decimal` (secondary) so cells and transfer lanes can be written once.
pub trait Quantity:
    Copy + Ord + Add<Output = Self> + Sub<Output = Self> + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    fn zero() -> Self;

    /// Scale by `factor` in `[0, 1]`, rounding toward zero.
    fn attenuate(self, factor: Decimal) -> Self;

    /// Smallest amount that attenuates to at least `self`.
    /// `None` when `factor` is zero.
    fn pre_attenuation(self, factor: Decimal) -> Option<Self>;

    fn as_f64(self) -> f64;

    fn is_positive(&self) -> bool {
        *self > Self::zero()
    }
}

impl Quantity for i64 {
    fn zero() -> Self { 0 }

    fn attenuate(self, factor: Decimal) -> Self {
        if self <= 0 || factor <= Decimal::ZERO {
            return 0;
        }
        if factor >= Decimal::ONE {
            return self;
        }
        saturating_i64((Decimal::from(self) * factor).trunc())
    }

    fn pre_attenuation(self, factor: Decimal) -> Option<Self> {
        if factor <= Decimal::ZERO {
            return None;
        }
        if self <= 0 {
            return Some(0);
        }
        let raw = Decimal::from(self).checked_div(factor)?;
        Some(saturating_i64(raw.ceil()))
    }

    fn as_f64(self) -> f64 { self as f64 }
}

impl Quantity for Decimal {
    fn zero() -> Self { Decimal::ZERO }

    fn attenuate(self, factor: Decimal) -> Self {
        if self <= Decimal::ZERO || factor <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        truncate_secondary(self * factor.min(Decimal::ONE))
    }

    fn pre_attenuation(self, factor: Decimal) -> Option<Self> {
        if factor <= Decimal::ZERO {
            return None;
        }
        if self <= Decimal::ZERO {
            return Some(Decimal::ZERO);
        }
        let raw = self.checked_div(factor)?;
        Some(raw.round_dp_with_strategy(SECONDARY_SCALE, RoundingStrategy::AwayFromZero))
    }

    fn as_f64(self) -> f64 { self.to_f64().unwrap_or(0.0) }
}

// ---------------------------------------------------------------------------
// ExchangeRate
// ---------------------------------------------------------------------------

/// Fixed conversion pair between the two currencies.
///
/// `primary_to_secondary * secondary_to_primary <= 1` is enforced at
/// construction, so a lossless round trip can never mint energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawExchangeRate")]
pub struct ExchangeRate {
    primary_to_secondary: Decimal,
    secondary_to_primary: Decimal,
}

#[derive(Deserialize)]
struct RawExchangeRate {
    primary_to_secondary: Decimal,
    secondary_to_primary: Decimal,
}

impl TryFrom<RawExchangeRate> for ExchangeRate {
    type Error = CurrencyError;

    fn try_from(raw: RawExchangeRate) -> Result<Self, Self::Error> {
        ExchangeRate::new(raw.primary_to_secondary, raw.secondary_to_primary)
    }
}

impl Default for ExchangeRate {
    /// 1 primary unit = 2.5 secondary units.
    fn default() -> Self {
        Self {
            primary_to_secondary: dec!(2.5),
            secondary_to_primary: dec!(0.4),
        }
    }
}

impl ExchangeRate {
    pub fn new(primary_to_secondary: Decimal, secondary_to_primary: Decimal) -> Result<Self, CurrencyError> {
        if primary_to_secondary <= Decimal::ZERO || secondary_to_primary <= Decimal::ZERO {
            return Err(CurrencyError::NonPositiveRate {
                primary_to_secondary,
                secondary_to_primary,
            });
        }
        let product = primary_to_secondary * secondary_to_primary;
        if product > Decimal::ONE {
            return Err(CurrencyError::Amplifying { product });
        }
        Ok(Self { primary_to_secondary, secondary_to_primary })
    }

    pub fn primary_to_secondary(&self) -> Decimal {
        self.primary_to_secondary
    }

    pub fn secondary_to_primary(&self) -> Decimal {
        self.secondary_to_primary
    }

    /// Convert primary units to secondary at `efficiency`, toward zero.
    pub fn to_secondary(&self, primary: i64, efficiency: Decimal) -> Decimal {
        if primary <= 0 {
            return Decimal::ZERO;
        }
        let factor = efficiency.clamp(Decimal::ZERO, Decimal::ONE);
        truncate_secondary(Decimal::from(primary) * self.primary_to_secondary * factor)
    }

    /// Convert secondary units to primary at `efficiency`, toward zero.
    pub fn to_primary(&self, secondary: Decimal, efficiency: Decimal) -> i64 {
        if secondary <= Decimal::ZERO || efficiency <= Decimal::ZERO {
            return 0;
        }
        let factor = efficiency.min(Decimal::ONE);
        saturating_i64((secondary * self.secondary_to_primary * factor).trunc())
    }

    /// Primary value of a secondary amount with no conversion loss.
    pub fn primary_value(&self, secondary: Decimal) -> i64 {
        self.to_primary(secondary, Decimal::ONE)
    }

    /// Primary value of a secondary amount, untruncated.
    pub fn exact_primary_value(&self, secondary: Decimal) -> Decimal {
        secondary * self.secondary_to_primary
    }

    /// Primary value of a secondary amount rounded up, so any positive
    /// amount counts for at least one unit.
    pub fn primary_ceiling(&self, secondary: Decimal) -> i64 {
        saturating_i64(self.exact_primary_value(secondary).ceil())
    }

    /// Secondary value of a primary amount with no conversion loss.
    pub fn secondary_value(&self, primary: i64) -> Decimal {
        self.to_secondary(primary, Decimal::ONE)
    }

    /// Largest primary amount whose conversion at `efficiency` fits in
    /// `secondary`.
    pub fn primary_fitting(&self, secondary: Decimal, efficiency: Decimal) -> i64 {
        let factor = self.primary_to_secondary * efficiency.min(Decimal::ONE);
        if secondary <= Decimal::ZERO || factor <= Decimal::ZERO {
            return 0;
        }
        match secondary.checked_div(factor) {
            Some(q) => {
                let mut fit = saturating_i64(q.trunc());
                // Division rounding may overshoot by one unit.
                while fit > 0 && self.to_secondary(fit, efficiency) > secondary {
                    fit -= 1;
                }
                fit
            }
            None => 0,
        }
    }

    /// Smallest secondary amount that converts to at least `primary` units
    /// at `efficiency`. `None` when efficiency is zero.
    pub fn secondary_needed(&self, primary: i64, efficiency: Decimal) -> Option<Decimal> {
        let factor = self.secondary_to_primary * efficiency.min(Decimal::ONE);
        Decimal::from(primary.max(0)).pre_attenuation(factor)
    }

    /// Primary units remaining after converting to secondary and back.
    pub fn round_trip_primary(&self, primary: i64, efficiency: Decimal) -> i64 {
        self.to_primary(self.to_secondary(primary, efficiency), efficiency)
    }

    /// Secondary units remaining after converting to primary and back.
    pub fn round_trip_secondary(&self, secondary: Decimal, efficiency: Decimal) -> Decimal {
        self.to_secondary(self.to_primary(secondary, efficiency), efficiency)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
