// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! In-memory world of devices joined by tiered cables.
//!
//! Implements both [`SpatialWorld`] and [`PathFinder`], and backs the
//! integration tests and the bench runner. Cables expose an inert energy
//! interface (no flags, no capacity): scans walk through them, but the
//! topology builder drops them as nodes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::storage::EnergyHandler;
use crate::tier::TransmissionTier;
use crate::types::{BlockPos, Capabilities};
use crate::world::{PathFinder, SpatialWorld, WorldError};

/// Rate of a device-to-device contact with no cable in between.
pub const DIRECT_LINK_RATE: i64 = 32_768;

/// Longest path `find_path` will return.
const MAX_PATH_LEN: usize = 256;

#[derive(Clone)]
enum Block {
    Device(Arc<dyn EnergyHandler>),
    Cable(TransmissionTier),
}

struct CableInterface;

impl EnergyHandler for CableInterface {
    fn capabilities(&self) -> Capabilities {
        Capabilities { can_receive: false, can_extract: false }
    }
    fn stored(&self) -> i64 { 0 }
    fn capacity(&self) -> i64 { 0 }
    fn receive(&self, _amount: i64, _simulate: bool) -> i64 { 0 }
    fn extract(&self, _amount: i64, _simulate: bool) -> i64 { 0 }
}

pub struct GridWorld {
    blocks: RwLock<HashMap<BlockPos, Block>>,
    failing: RwLock<HashSet<BlockPos>>,
    cable_interface: Arc<dyn EnergyHandler>,
}

impl Default for GridWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl GridWorld {
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            cable_interface: Arc::new(CableInterface),
        }
    }

    pub fn place_device(&self, pos: BlockPos, handler: Arc<dyn EnergyHandler>) {
        self.blocks.write().insert(pos, Block::Device(handler));
    }

    pub fn place_cable(&self, pos: BlockPos, tier: TransmissionTier) {
        self.blocks.write().insert(pos, Block::Cable(tier));
    }

    /// Lay cable on every position strictly between `from` and `to`, which
    /// must share two coordinates. Returns the number of cables placed.
    pub fn lay_cable(&self, from: BlockPos, to: BlockPos, tier: TransmissionTier) -> usize {
        let (dx, dy, dz) = ((to.x - from.x).signum(), (to.y - from.y).signum(), (to.z - from.z).signum());
        if [dx, dy, dz].iter().filter(|d| **d != 0).count() != 1 {
            return 0;
        }
        let mut placed = 0;
        let mut cursor = from.offset(dx, dy, dz);
        while cursor != to {
            self.place_cable(cursor, tier);
            placed += 1;
            cursor = cursor.offset(dx, dy, dz);
        }
        placed
    }

    pub fn remove(&self, pos: BlockPos) -> bool {
        self.blocks.write().remove(&pos).is_some()
    }

    /// Make every capability query at `pos` fail until cleared.
    pub fn fail_queries_at(&self, pos: BlockPos) {
        self.failing.write().insert(pos);
    }

    pub fn clear_failures(&self) {
        self.failing.write().clear();
    }

    pub fn cable_tier(&self, pos: BlockPos) -> Option<TransmissionTier> {
        match self.blocks.read().get(&pos) {
            Some(Block::Cable(tier)) => Some(*tier),
            _ => None,
        }
    }

    fn is_cable(&self, pos: BlockPos) -> bool {
        matches!(self.blocks.read().get(&pos), Some(Block::Cable(_)))
    }

    fn cable_tiers(&self, path: &[BlockPos]) -> Vec<TransmissionTier> {
        let blocks = self.blocks.read();
        path.iter()
            .filter_map(|p| match blocks.get(p) {
                Some(Block::Cable(tier)) => Some(*tier),
                _ => None,
            })
            .collect()
    }
}

impl SpatialWorld for GridWorld {
    fn has_energy_interface(&self, pos: BlockPos) -> bool {
        !self.failing.read().contains(&pos) && self.blocks.read().contains_key(&pos)
    }

    fn energy_interface(&self, pos: BlockPos) -> Result<Option<Arc<dyn EnergyHandler>>, WorldError> {
        if self.failing.read().contains(&pos) {
            return Err(WorldError::Capability {
                pos,
                reason: "query failed".to_string(),
            });
        }
        Ok(match self.blocks.read().get(&pos) {
            Some(Block::Device(handler)) => Some(handler.clone()),
            Some(Block::Cable(_)) => Some(self.cable_interface.clone()),
            None => None,
        })
    }
}

impl PathFinder for GridWorld {
    /// Breadth-first search through cables only; the endpoints may be
    /// devices. Neighbor order is fixed, so the returned path is stable.
    fn find_path(&self, from: BlockPos, to: BlockPos) -> Vec<BlockPos> {
        if from == to {
            return Vec::new();
        }
        let mut parents: HashMap<BlockPos, BlockPos> = HashMap::new();
        let mut queue = VecDeque::from([(from, 1usize)]);
        let mut seen = HashSet::from([from]);

        while let Some((current, len)) = queue.pop_front() {
            if len >= MAX_PATH_LEN {
                continue;
            }
            for next in self.neighbors(current) {
                if !seen.insert(next) {
                    continue;
                }
                if next == to {
                    let mut path = vec![to, current];
                    let mut cursor = current;
                    while let Some(&parent) = parents.get(&cursor) {
                        path.push(parent);
                        cursor = parent;
                    }
                    path.reverse();
                    return path;
                }
                if self.is_cable(next) {
                    parents.insert(next, current);
                    queue.push_back((next, len + 1));
                }
            }
        }
        Vec::new()
    }

    /// Compound loss of every cable on the path.
    fn path_loss(&self, path: &[BlockPos]) -> f64 {
        let kept: f64 = self
            .cable_tiers(path)
            .iter()
            .map(|t| 1.0 - t.loss_fraction)
            .product();
        (1.0 - kept).clamp(0.0, 1.0)
    }

    fn path_rate(&self, path: &[BlockPos]) -> i64 {
        self.cable_tiers(path)
            .iter()
            .map(|t| t.transfer_rate)
            .min()
            .unwrap_or(DIRECT_LINK_RATE)
    }

    fn path_overload_threshold(&self, path: &[BlockPos]) -> Option<i64> {
        self.cable_tiers(path)
            .iter()
            .filter_map(|t| t.overload_threshold)
            .filter(|t| *t > 0)
            .min()
    }
}
