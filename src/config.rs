// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Configuration for the grid: exchange rate, scan bounds, engine
//! heuristics, scheduler budget and storage self-tuning.
//!
//! Every section has a `Default`; a JSON document only needs to name the
//! fields it overrides.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::currency::ExchangeRate;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse grid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("priority bounds invalid: min {min}, default {default}, max {max}")]
    PriorityBounds { min: u8, default: u8, max: u8 },

    #[error("conversion efficiency bounds invalid: [{min}, {max}] (default {default})")]
    EfficiencyBounds { min: Decimal, max: Decimal, default: Decimal },

    #[error("{field} must be positive")]
    NonPositive { field: &'static str },

    #[error("fill thresholds must satisfy 0 <= low < high <= 1 (got {low}, {high})")]
    FillThresholds { low: f64, high: f64 },
}

// ---------------------------------------------------------------------------
// GridConfig
// ---------------------------------------------------------------------------

/// Top-level configuration shared by every network in a registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub exchange_rate: ExchangeRate,
    pub scan: ScanConfig,
    pub engine: EngineConfig,
    pub registry: RegistryConfig,
    pub storage: StorageTuning,
}

impl GridConfig {
    /// Parse from JSON and validate.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: GridConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.scan_limit == 0 {
            return Err(ConfigError::NonPositive { field: "scan.scan_limit" });
        }
        if self.scan.fan_out == 0 {
            return Err(ConfigError::NonPositive { field: "scan.fan_out" });
        }
        self.engine.validate()?;
        if self.registry.per_network_budget_ms == 0 {
            return Err(ConfigError::NonPositive { field: "registry.per_network_budget_ms" });
        }
        self.storage.validate()
    }
}

/// Topology scan bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Maximum positions visited by one breadth-first scan.
    pub scan_limit: usize,
    /// Neighbors followed from each position, taken in the order the
    /// spatial collaborator lists them.
    pub fan_out: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { scan_limit: 512, fan_out: 6 }
    }
}

/// Distribution engine heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub min_priority: u8,
    pub max_priority: u8,
    /// Priority given to freshly discovered nodes.
    pub default_priority: u8,
    /// A node accessed within this window gains priority.
    pub recency_window_ms: u64,
    /// A node untouched for longer than this loses priority.
    pub idle_threshold_ms: u64,
    /// Producers fuller than this gain priority.
    pub producer_favorable_fill: f64,
    /// Consumers emptier than this gain priority.
    pub consumer_favorable_fill: f64,
    /// Cumulative conservation error at which a network halts.
    pub conservation_breaker_threshold: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_priority: 1,
            max_priority: 10,
            default_priority: 1,
            recency_window_ms: 1_000,
            idle_threshold_ms: 30_000,
            producer_favorable_fill: 0.75,
            consumer_favorable_fill: 0.25,
            conservation_breaker_threshold: dec!(1000),
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let ok = self.min_priority >= 1
            && self.min_priority <= self.default_priority
            && self.default_priority <= self.max_priority;
        if !ok {
            return Err(ConfigError::PriorityBounds {
                min: self.min_priority,
                default: self.default_priority,
                max: self.max_priority,
            });
        }
        if self.conservation_breaker_threshold <= Decimal::ZERO {
            return Err(ConfigError::NonPositive { field: "engine.conservation_breaker_threshold" });
        }
        Ok(())
    }

    /// Clamp a priority into the configured bounds.
    pub fn clamp_priority(&self, priority: u8) -> u8 {
        priority.clamp(self.min_priority, self.max_priority)
    }
}

/// Scheduler budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Wall-clock budget granted to each network per cycle; the aggregate
    /// deadline is this times the number of networks.
    pub per_network_budget_ms: u64,
    /// Simulated time advanced by each `update_all`.
    pub cycle_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            per_network_budget_ms: 50,
            cycle_interval_ms: 50,
        }
    }
}

impl RegistryConfig {
    pub fn per_network_budget(&self) -> Duration {
        Duration::from_millis(self.per_network_budget_ms)
    }
}

/// Hybrid storage self-tuning parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageTuning {
    /// Minimum simulated time between tuning steps.
    pub interval_ms: u64,
    pub step: Decimal,
    pub min_efficiency: Decimal,
    pub max_efficiency: Decimal,
    pub default_efficiency: Decimal,
    /// Below this fill ratio energy is scarce.
    pub low_fill: f64,
    /// Above this fill ratio energy is abundant.
    pub high_fill: f64,
}

impl Default for StorageTuning {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            step: dec!(0.005),
            min_efficiency: dec!(0.90),
            max_efficiency: dec!(0.99),
            default_efficiency: dec!(0.95),
            low_fill: 0.10,
            high_fill: 0.90,
        }
    }
}

impl StorageTuning {
    fn validate(&self) -> Result<(), ConfigError> {
        let bounds_ok = self.min_efficiency > Decimal::ZERO
            && self.min_efficiency <= self.default_efficiency
            && self.default_efficiency <= self.max_efficiency
            && self.max_efficiency <= Decimal::ONE;
        if !bounds_ok {
            return Err(ConfigError::EfficiencyBounds {
                min: self.min_efficiency,
                max: self.max_efficiency,
                default: self.default_efficiency,
            });
        }
        if self.step <= Decimal::ZERO {
            return Err(ConfigError::NonPositive { field: "storage.step" });
        }
        if !(0.0..=1.0).contains(&self.low_fill)
            || !(0.0..=1.0).contains(&self.high_fill)
            || self.low_fill >= self.high_fill
        {
            return Err(ConfigError::FillThresholds { low: self.low_fill, high: self.high_fill });
        }
        Ok(())
    }

    /// Clamp an efficiency into the configured bounds.
    pub fn clamp_efficiency(&self, efficiency: Decimal) -> Decimal {
        efficiency.clamp(self.min_efficiency, self.max_efficiency)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        GridConfig::default().validate().expect("test: defaults must be valid");
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config = GridConfig::from_json_str(
            r#"{ "scan": { "scan_limit": 64 }, "registry": { "per_network_budget_ms": 10 } }"#,
        )
        .expect("test: partial config parses");
        assert_eq!(config.scan.scan_limit, 64);
        assert_eq!(config.scan.fan_out, 6);
        assert_eq!(config.registry.per_network_budget_ms, 10);
        assert_eq!(config.registry.cycle_interval_ms, 50);
        assert_eq!(config.engine.max_priority, 10);
    }

    #[test]
    fn inverted_priority_bounds_rejected() {
        let err = GridConfig::from_json_str(r#"{ "engine": { "min_priority": 5, "max_priority": 3 } }"#)
            .expect_err("test: bounds inverted");
        assert!(matches!(err, ConfigError::PriorityBounds { .. }), "got {err}");
    }

    #[test]
    fn efficiency_above_one_rejected() {
        let err = GridConfig::from_json_str(r#"{ "storage": { "max_efficiency": "1.5" } }"#)
            .expect_err("test: efficiency bound above one");
        assert!(matches!(err, ConfigError::EfficiencyBounds { .. }), "got {err}");
    }

    #[test]
    fn zero_fan_out_rejected() {
        let err = GridConfig::from_json_str(r#"{ "scan": { "fan_out": 0 } }"#)
            .expect_err("test: no neighbors followed");
        assert!(matches!(err, ConfigError::NonPositive { field: "scan.fan_out" }), "got {err}");
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = GridConfig::from_json_str("{ not json").expect_err("test: malformed");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn amplifying_exchange_rate_fails_to_parse() {
        let err = GridConfig::from_json_str(
            r#"{ "exchange_rate": { "primary_to_secondary": "10", "secondary_to_primary": "1" } }"#,
        )
        .expect_err("test: amplifying rate");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
