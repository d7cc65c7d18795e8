// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Value types shared by every layer: positions, network identity, roles.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// BlockPos
// ---------------------------------------------------------------------------

/// Integer coordinate of a block in a dimension.
///
/// Ordering is lexicographic on `(x, y, z)` and is the deterministic
/// tie-break used everywhere a scan or an allocation needs one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Offset by a direction vector.
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self { x: self.x + dx, y: self.y + dy, z: self.z + dz }
    }

    /// Face-adjacent positions in a fixed order: -x, +x, -y, +y, -z, +z.
    pub fn face_neighbors(self) -> [BlockPos; 6] {
        [
            self.offset(-1, 0, 0),
            self.offset(1, 0, 0),
            self.offset(0, -1, 0),
            self.offset(0, 1, 0),
            self.offset(0, 0, -1),
            self.offset(0, 0, 1),
        ]
    }

    /// Manhattan distance between two positions.
    pub fn manhattan(self, other: BlockPos) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y) + self.z.abs_diff(other.z)
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// DimensionId / NetworkKey
// ---------------------------------------------------------------------------

/// Identifier of the world/dimension a network lives in.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DimensionId(pub String);

impl fmt::Display for DimensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DimensionId {
    fn from(s: String) -> Self { DimensionId(s) }
}

impl From<&str> for DimensionId {
    fn from(s: &str) -> Self { DimensionId(s.to_string()) }
}

/// Identity of a network: its anchor block plus the dimension it lives in.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkKey {
    pub anchor: BlockPos,
    pub dimension: DimensionId,
}

impl NetworkKey {
    pub fn new(anchor: BlockPos, dimension: impl Into<DimensionId>) -> Self {
        Self { anchor, dimension: dimension.into() }
    }
}

impl fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.dimension, self.anchor)
    }
}

// ---------------------------------------------------------------------------
// Capabilities / Role
// ---------------------------------------------------------------------------

/// Capability flags exposed by a device's energy interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_receive: bool,
    pub can_extract: bool,
}

/// Classification of a discovered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Extract-only source.
    Producer,
    /// Receive-only sink.
    Consumer,
    /// Neither flag set, but with spare capacity; only ever filled.
    Storage,
    /// Receives and extracts.
    Hybrid,
}

impl Role {
    /// Classify from capability flags. `Storage` is returned for the
    /// no-flag case; the caller decides whether it survives (spare capacity).
    pub fn classify(caps: Capabilities) -> Self {
        match (caps.can_receive, caps.can_extract) {
            (true, true) => Role::Hybrid,
            (true, false) => Role::Consumer,
            (false, true) => Role::Producer,
            (false, false) => Role::Storage,
        }
    }

    /// Whether this role may act as a source during allocation.
    pub fn supplies(&self) -> bool {
        matches!(self, Role::Producer | Role::Hybrid)
    }

    /// Whether this role may act as a sink during allocation.
    pub fn demands(&self) -> bool {
        matches!(self, Role::Consumer | Role::Hybrid | Role::Storage)
    }
}

// ---------------------------------------------------------------------------
// Currency
// ---------------------------------------------------------------------------

/// The two interoperable energy units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    /// Integer-valued unit.
    Primary,
    /// Real-valued unit.
    Secondary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_covers_all_flag_combinations() {
        let caps = |r, e| Capabilities { can_receive: r, can_extract: e };
        assert_eq!(Role::classify(caps(true, true)), Role::Hybrid);
        assert_eq!(Role::classify(caps(true, false)), Role::Consumer);
        assert_eq!(Role::classify(caps(false, true)), Role::Producer);
        assert_eq!(Role::classify(caps(false, false)), Role::Storage);
    }

    #[test]
    fn supply_and_demand_sets() {
        assert!(Role::Producer.supplies() && !Role::Producer.demands());
        assert!(Role::Hybrid.supplies() && Role::Hybrid.demands());
        assert!(!Role::Storage.supplies() && Role::Storage.demands());
        assert!(!Role::Consumer.supplies() && Role::Consumer.demands());
    }

    #[test]
    fn block_pos_orders_by_x_then_y_then_z() {
        let mut v = vec![BlockPos::new(1, 0, 0), BlockPos::new(0, 5, 0), BlockPos::new(0, 0, 9)];
        v.sort();
        assert_eq!(v, vec![BlockPos::new(0, 0, 9), BlockPos::new(0, 5, 0), BlockPos::new(1, 0, 0)]);
    }

    #[test]
    fn face_neighbors_are_unit_distance() {
        let p = BlockPos::new(3, -2, 7);
        for n in p.face_neighbors() {
            assert_eq!(p.manhattan(n), 1);
        }
    }

    #[test]
    fn network_key_display() {
        let key = NetworkKey::new(BlockPos::new(1, 2, 3), "overworld");
        assert_eq!(key.to_string(), "overworld@(1, 2, 3)");
    }
}
