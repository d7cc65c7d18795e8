// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Collaborator interfaces the grid reads the world through.

use std::sync::Arc;

use crate::storage::EnergyHandler;
use crate::types::BlockPos;

/// Errors a world may report for a capability query. The topology builder
/// treats every one of them as "no interface at this position".
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("position {0} is not loaded")]
    Unloaded(BlockPos),

    #[error("capability query at {pos} failed: {reason}")]
    Capability { pos: BlockPos, reason: String },
}

/// Spatial adjacency and capability lookup.
pub trait SpatialWorld: Send + Sync {
    /// Fixed fan-out adjacency; the six face neighbors by default.
    fn neighbors(&self, pos: BlockPos) -> Vec<BlockPos> {
        pos.face_neighbors().to_vec()
    }

    fn has_energy_interface(&self, pos: BlockPos) -> bool;

    fn energy_interface(&self, pos: BlockPos) -> Result<Option<Arc<dyn EnergyHandler>>, WorldError>;
}

/// Path search and link characteristics between two positions.
pub trait PathFinder: Send + Sync {
    /// Ordered positions from `from` to `to`, both inclusive; empty when the
    /// two are not connected.
    fn find_path(&self, from: BlockPos, to: BlockPos) -> Vec<BlockPos>;

    /// Fraction of energy lost along `path`, in `[0, 1)`.
    fn path_loss(&self, path: &[BlockPos]) -> f64;

    /// Units per cycle `path` can carry.
    fn path_rate(&self, path: &[BlockPos]) -> i64;

    /// Lowest overload threshold along `path`; `None` when immune.
    fn path_overload_threshold(&self, _path: &[BlockPos]) -> Option<i64> {
        None
    }
}

/// Both collaborators for one dimension.
#[derive(Clone)]
pub struct WorldHandle {
    pub spatial: Arc<dyn SpatialWorld>,
    pub paths: Arc<dyn PathFinder>,
}

impl WorldHandle {
    pub fn new(spatial: Arc<dyn SpatialWorld>, paths: Arc<dyn PathFinder>) -> Self {
        Self { spatial, paths }
    }

    /// Use one value for both roles.
    pub fn shared<W>(world: Arc<W>) -> Self
    where
        W: SpatialWorld + PathFinder + 'static,
    {
        Self {
            spatial: world.clone(),
            paths: world,
        }
    }
}
