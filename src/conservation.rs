// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Conservation ledger.
//!
//! Every committed transfer must satisfy the loss-only invariant:
//!
//! ```text
//! extracted >= delivered + refunded
//! ```
//!
//! The difference is line loss. A transfer that accounts for more energy than
//! it extracted means a device handler lied about what it moved. The error is
//! accumulated and a circuit breaker halts the network once the cumulative
//! error exceeds the configured threshold.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConservationError {
    #[error("circuit breaker tripped, distribution halted (cumulative error: {0})")]
    CircuitBreakerTripped(Decimal),

    #[error("transfer created energy: extracted {extracted}, accounted {accounted}")]
    EnergyCreated { extracted: Decimal, accounted: Decimal },
}

/// Per-transfer tolerance for rounding in the secondary lane.
const TRANSFER_TOLERANCE: Decimal = dec!(0.0001);

// ---------------------------------------------------------------------------
// ConservationLedger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConservationLedger {
    cumulative_error: Decimal,
    circuit_breaker_threshold: Decimal,
    circuit_breaker_tripped: bool,
    transfers_verified: u64,
    total_line_loss: Decimal,
}

impl ConservationLedger {
    pub fn new(threshold: Decimal) -> Self {
        Self {
            cumulative_error: Decimal::ZERO,
            circuit_breaker_threshold: threshold,
            circuit_breaker_tripped: false,
            transfers_verified: 0,
            total_line_loss: Decimal::ZERO,
        }
    }

    /// Check one transfer. Amounts must be in the same currency.
    pub fn verify_transfer(
        &mut self,
        extracted: Decimal,
        delivered: Decimal,
        refunded: Decimal,
    ) -> Result<(), ConservationError> {
        if self.circuit_breaker_tripped {
            return Err(ConservationError::CircuitBreakerTripped(self.cumulative_error));
        }

        let accounted = delivered + refunded;
        if accounted <= extracted + TRANSFER_TOLERANCE {
            self.transfers_verified += 1;
            self.total_line_loss += (extracted - accounted).max(Decimal::ZERO);
            return Ok(());
        }

        self.cumulative_error += accounted - extracted;
        if self.cumulative_error > self.circuit_breaker_threshold {
            self.circuit_breaker_tripped = true;
            return Err(ConservationError::CircuitBreakerTripped(self.cumulative_error));
        }
        Err(ConservationError::EnergyCreated { extracted, accounted })
    }

    /// Fails fast when the breaker is already tripped.
    pub fn ensure_open(&self) -> Result<(), ConservationError> {
        if self.circuit_breaker_tripped {
            return Err(ConservationError::CircuitBreakerTripped(self.cumulative_error));
        }
        Ok(())
    }

    pub fn is_circuit_breaker_tripped(&self) -> bool {
        self.circuit_breaker_tripped
    }

    pub fn cumulative_error(&self) -> Decimal {
        self.cumulative_error
    }

    pub fn transfers_verified(&self) -> u64 {
        self.transfers_verified
    }

    pub fn total_line_loss(&self) -> Decimal {
        self.total_line_loss
    }

    /// Operator reset after investigation: clears the breaker and the error.
    pub fn reset_circuit_breaker(&mut self) {
        self.circuit_breaker_tripped = false;
        self.cumulative_error = Decimal::ZERO;
    }
}

impl Default for ConservationLedger {
    fn default() -> Self {
        Self::new(dec!(1000))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
