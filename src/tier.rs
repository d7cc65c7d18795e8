// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Transmission tiers: per-link rate, loss and overload threshold.
//!
//! The core only reports whether a link is overloaded; what happens to an
//! overloaded cable (melting, tripping) belongs to the world.

use serde::Serialize;

/// Rate and loss characteristics of one transmission tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransmissionTier {
    pub name: &'static str,
    /// Units per cycle a segment of this tier can carry.
    pub transfer_rate: i64,
    /// Fraction lost per segment, in `[0, 1)`.
    pub loss_fraction: f64,
    /// Observed rate at or above which the link faults. `None` is immune.
    pub overload_threshold: Option<i64>,
}

impl TransmissionTier {
    pub const COPPER: Self = Self {
        name: "copper",
        transfer_rate: 512,
        loss_fraction: 0.02,
        overload_threshold: Some(2048),
    };

    pub const GOLD: Self = Self {
        name: "gold",
        transfer_rate: 2048,
        loss_fraction: 0.015,
        overload_threshold: Some(8192),
    };

    pub const DIAMOND: Self = Self {
        name: "diamond",
        transfer_rate: 8192,
        loss_fraction: 0.01,
        overload_threshold: Some(32768),
    };

    pub const NETHERITE: Self = Self {
        name: "netherite",
        transfer_rate: 32768,
        loss_fraction: 0.005,
        overload_threshold: None,
    };

    pub const ALL: [Self; 4] = [Self::COPPER, Self::GOLD, Self::DIAMOND, Self::NETHERITE];

    pub fn by_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// `threshold > 0 && observed_rate >= threshold`.
    pub fn is_overloaded(&self, observed_rate: i64) -> bool {
        match self.overload_threshold {
            Some(threshold) => threshold > 0 && observed_rate >= threshold,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copper_overloads_at_threshold() {
        assert!(TransmissionTier::COPPER.is_overloaded(2048));
        assert!(!TransmissionTier::COPPER.is_overloaded(2047));
    }

    #[test]
    fn netherite_is_immune() {
        assert!(!TransmissionTier::NETHERITE.is_overloaded(2048));
        assert!(!TransmissionTier::NETHERITE.is_overloaded(i64::MAX));
    }

    #[test]
    fn zero_threshold_never_overloads() {
        let tier = TransmissionTier { overload_threshold: Some(0), ..TransmissionTier::COPPER };
        assert!(!tier.is_overloaded(1_000_000));
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(TransmissionTier::by_name("Gold"), Some(TransmissionTier::GOLD));
        assert_eq!(TransmissionTier::by_name("tin"), None);
    }
}
