// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Flat save record for a hybrid storage.
//!
//! Only storage content is ever persisted. Topology is rebuilt from the
//! world on first reference after load.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::storage::hybrid::{HybridStorage, PriorityPolicy};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("malformed storage record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("negative stored amount in record (primary {primary}, secondary {secondary})")]
    NegativeAmount { primary: i64, secondary: Decimal },
}

/// The persisted state of one [`HybridStorage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridStorageRecord {
    pub primary_stored: i64,
    pub secondary_stored: Decimal,
    pub policy: PriorityPolicy,
    pub auto_conversion: bool,
    pub conversion_efficiency: Decimal,
}

impl HybridStorageRecord {
    pub fn capture(storage: &HybridStorage) -> Self {
        Self {
            primary_stored: storage.primary().stored(),
            secondary_stored: storage.secondary().stored(),
            policy: storage.policy(),
            auto_conversion: storage.auto_conversion(),
            conversion_efficiency: storage.conversion_efficiency(),
        }
    }

    /// Write this record into `storage`. Amounts are clamped to the cells'
    /// capacities and efficiency to the tuning bounds.
    pub fn apply(&self, storage: &mut HybridStorage) {
        storage.set_stored(self.primary_stored, self.secondary_stored);
        storage.set_policy(self.policy);
        storage.set_auto_conversion(self.auto_conversion);
        storage.set_conversion_efficiency(self.conversion_efficiency);
    }

    pub fn to_json(&self) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PersistenceError> {
        let record: Self = serde_json::from_str(json)?;
        if record.primary_stored < 0 || record.secondary_stored < Decimal::ZERO {
            return Err(PersistenceError::NegativeAmount {
                primary: record.primary_stored,
                secondary: record.secondary_stored,
            });
        }
        Ok(record)
    }
}
