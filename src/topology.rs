// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Topology discovery: bounded breadth-first scan from a network anchor.
//!
//! The scan visits each position at most once and only expands through
//! positions that expose an energy interface. Discovered devices become
//! [`Node`]s; every connected pair gets one [`Edge`] per direction. Nodes and
//! edges are ordered by position, so two scans of an unchanged world produce
//! identical results.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};

use serde::Serialize;
use tracing::debug;

use crate::config::ScanConfig;
use crate::storage::EnergyHandler;
use crate::types::{BlockPos, Role};
use crate::world::{PathFinder, SpatialWorld};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("anchor {0} exposes no energy interface")]
    AnchorMissing(BlockPos),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A device discovered by a scan.
///
/// The handle is weak: the world owns devices, and a removed device must not
/// be kept alive by a network that has not rescanned yet.
#[derive(Clone)]
pub struct Node {
    pub pos: BlockPos,
    pub role: Role,
    pub priority: u8,
    pub last_accessed_ms: u64,
    handler: Weak<dyn EnergyHandler>,
}

impl Node {
    pub fn new(pos: BlockPos, role: Role, handler: &Arc<dyn EnergyHandler>, priority: u8, now_ms: u64) -> Self {
        Self {
            pos,
            role,
            priority,
            last_accessed_ms: now_ms,
            handler: Arc::downgrade(handler),
        }
    }

    /// `None` once the device has been dropped by its owner.
    pub fn handler(&self) -> Option<Arc<dyn EnergyHandler>> {
        self.handler.upgrade()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("pos", &self.pos)
            .field("role", &self.role)
            .field("priority", &self.priority)
            .field("last_accessed_ms", &self.last_accessed_ms)
            .field("live", &(self.handler.strong_count() > 0))
            .finish()
    }
}

/// Directed link between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub from: BlockPos,
    pub to: BlockPos,
    pub path: Vec<BlockPos>,
    /// `1 - path_loss`, in `(0, 1]`.
    pub efficiency: f64,
    /// Units per cycle.
    pub transfer_rate: i64,
    /// Lowest segment threshold along the path.
    pub overload_threshold: Option<i64>,
    /// Fraction of this cycle's rate already used, in `[0, 1]`.
    pub current_load: f64,
    /// Units moved this cycle.
    pub moved_this_cycle: i64,
}

impl Edge {
    /// Selection score: `efficiency * (1 - load)`.
    pub fn score(&self) -> f64 {
        self.efficiency * (1.0 - self.current_load)
    }

    pub fn is_saturated(&self) -> bool {
        self.current_load >= 1.0
    }

    /// Units still available this cycle, `floor(rate * (1 - load))`.
    pub fn available_rate(&self) -> i64 {
        if self.is_saturated() {
            return 0;
        }
        (self.transfer_rate as f64 * (1.0 - self.current_load)).floor() as i64
    }

    pub fn record_transfer(&mut self, moved: i64) {
        if moved <= 0 || self.transfer_rate <= 0 {
            return;
        }
        self.moved_this_cycle += moved;
        self.current_load = (self.current_load + moved as f64 / self.transfer_rate as f64).min(1.0);
    }

    pub fn reset_load(&mut self) {
        self.current_load = 0.0;
        self.moved_this_cycle = 0;
    }

    /// Path positions between the endpoints.
    pub fn interior(&self) -> &[BlockPos] {
        if self.path.len() < 2 {
            return &[];
        }
        &self.path[1..self.path.len() - 1]
    }
}

/// Result of one scan.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub nodes: BTreeMap<BlockPos, Node>,
    /// Sorted by `(from, to)`.
    pub edges: Vec<Edge>,
    /// Interface-bearing positions visited, cables included.
    pub visited: usize,
    /// The positions behind `visited`. A block change next to any of them
    /// can alter this topology.
    pub reach: BTreeSet<BlockPos>,
    /// Overload threshold of each path segment that has one, keyed by the
    /// segment's position. Edges sharing a segment share its threshold.
    pub segment_thresholds: BTreeMap<BlockPos, i64>,
    /// The scan stopped at the visit limit.
    pub truncated: bool,
}

// ---------------------------------------------------------------------------
// TopologyBuilder
// ---------------------------------------------------------------------------

pub struct TopologyBuilder<'a> {
    spatial: &'a dyn SpatialWorld,
    paths: &'a dyn PathFinder,
    scan_limit: usize,
    fan_out: usize,
    default_priority: u8,
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(
        spatial: &'a dyn SpatialWorld,
        paths: &'a dyn PathFinder,
        scan: &ScanConfig,
        default_priority: u8,
    ) -> Self {
        Self {
            spatial,
            paths,
            scan_limit: scan.scan_limit.max(1),
            fan_out: scan.fan_out.max(1),
            default_priority,
        }
    }

    /// Scan from `anchor`. Nodes present in `previous` keep their priority
    /// and last-access time; new ones start at the default priority.
    pub fn scan(
        &self,
        anchor: BlockPos,
        previous: &BTreeMap<BlockPos, Node>,
        now_ms: u64,
    ) -> Result<Topology, TopologyError> {
        let anchor_handler = self.interface_at(anchor).ok_or(TopologyError::AnchorMissing(anchor))?;

        let mut seen = HashSet::from([anchor]);
        let mut queue = VecDeque::from([(anchor, anchor_handler)]);
        let mut found = Vec::new();
        let mut visited = 1;
        let mut truncated = false;

        while let Some((pos, handler)) = queue.pop_front() {
            found.push((pos, handler));
            for next in self.spatial.neighbors(pos).into_iter().take(self.fan_out) {
                if !seen.insert(next) {
                    continue;
                }
                let Some(h) = self.interface_at(next) else {
                    continue;
                };
                if visited >= self.scan_limit {
                    truncated = true;
                    continue;
                }
                visited += 1;
                queue.push_back((next, h));
            }
        }

        let reach: BTreeSet<BlockPos> = found.iter().map(|(pos, _)| *pos).collect();
        let mut nodes = BTreeMap::new();
        for (pos, handler) in found {
            let Some(role) = classify(&handler) else {
                continue;
            };
            let node = match previous.get(&pos) {
                Some(prev) => Node {
                    role,
                    handler: Arc::downgrade(&handler),
                    ..prev.clone()
                },
                None => Node::new(pos, role, &handler, self.default_priority, now_ms),
            };
            nodes.insert(pos, node);
        }

        let edges = self.build_edges(&nodes);
        let segment_thresholds = self.segment_thresholds(&edges);
        debug!(
            anchor = %anchor,
            visited,
            nodes = nodes.len(),
            edges = edges.len(),
            truncated,
            "topology scan complete"
        );
        Ok(Topology { nodes, edges, visited, reach, segment_thresholds, truncated })
    }

    /// Capability lookup; any failure counts as no interface.
    fn interface_at(&self, pos: BlockPos) -> Option<Arc<dyn EnergyHandler>> {
        if !self.spatial.has_energy_interface(pos) {
            return None;
        }
        match self.spatial.energy_interface(pos) {
            Ok(handler) => handler,
            Err(e) => {
                debug!(pos = %pos, error = %e, "capability query failed");
                None
            }
        }
    }

    fn build_edges(&self, nodes: &BTreeMap<BlockPos, Node>) -> Vec<Edge> {
        let positions: Vec<BlockPos> = nodes.keys().copied().collect();
        let mut edges = Vec::new();

        for (i, &a) in positions.iter().enumerate() {
            for &b in &positions[i + 1..] {
                let path = self.paths.find_path(a, b);
                if path.is_empty() {
                    continue;
                }
                let rate = if path.len() < 2 {
                    self.paths.path_rate(&path)
                } else {
                    path.windows(2).map(|seg| self.paths.path_rate(seg)).min().unwrap_or(0)
                };
                if rate <= 0 {
                    continue;
                }
                let efficiency = (1.0 - self.paths.path_loss(&path)).clamp(0.0, 1.0);
                let overload_threshold = self.paths.path_overload_threshold(&path);
                let mut reversed = path.clone();
                reversed.reverse();

                edges.push(Edge {
                    from: a,
                    to: b,
                    path,
                    efficiency,
                    transfer_rate: rate,
                    overload_threshold,
                    current_load: 0.0,
                    moved_this_cycle: 0,
                });
                edges.push(Edge {
                    from: b,
                    to: a,
                    path: reversed,
                    efficiency,
                    transfer_rate: rate,
                    overload_threshold,
                    current_load: 0.0,
                    moved_this_cycle: 0,
                });
            }
        }
        edges.sort_by(|x, y| (x.from, x.to).cmp(&(y.from, y.to)));
        edges
    }

    /// Thresholds of the interior positions of every edge path.
    fn segment_thresholds(&self, edges: &[Edge]) -> BTreeMap<BlockPos, i64> {
        let mut thresholds = BTreeMap::new();
        for edge in edges {
            for pos in edge.interior() {
                if thresholds.contains_key(pos) {
                    continue;
                }
                if let Some(t) = self.paths.path_overload_threshold(std::slice::from_ref(pos)) {
                    thresholds.insert(*pos, t);
                }
            }
        }
        thresholds
    }
}

/// Role of a discovered device, or `None` when it cannot take part: a
/// flagless interface with no spare capacity (cables, full passive blocks).
fn classify(handler: &Arc<dyn EnergyHandler>) -> Option<Role> {
    let role = Role::classify(handler.capabilities());
    if role == Role::Storage && handler.capacity() - handler.stored() <= 0 {
        return None;
    }
    Some(role)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridWorld;
    use crate::storage::BasicStorage;
    use crate::tier::TransmissionTier;
    use crate::types::Capabilities;
    use crate::storage::cell::PrimaryCell;

    fn p(x: i32) -> BlockPos {
        BlockPos::new(x, 0, 0)
    }

    fn scan(world: &GridWorld, anchor: BlockPos, limit: usize) -> Topology {
        let config = ScanConfig { scan_limit: limit, ..ScanConfig::default() };
        TopologyBuilder::new(world, world, &config, 1)
            .scan(anchor, &BTreeMap::new(), 0)
            .expect("test: anchor present")
    }

    /// Producer at 0, consumer at 4, copper between; handlers returned so
    /// the weak node handles stay live.
    fn line() -> (GridWorld, Vec<Arc<dyn EnergyHandler>>) {
        let world = GridWorld::new();
        let producer: Arc<dyn EnergyHandler> = Arc::new(BasicStorage::producer(1000, 512, 1000));
        let consumer: Arc<dyn EnergyHandler> = Arc::new(BasicStorage::consumer(1000, 512));
        world.place_device(p(0), producer.clone());
        world.place_device(p(4), consumer.clone());
        world.lay_cable(p(0), p(4), TransmissionTier::COPPER);
        (world, vec![producer, consumer])
    }

    #[test]
    fn scan_finds_devices_and_drops_cables() {
        let (world, _keep) = line();
        let topo = scan(&world, p(0), 512);
        assert_eq!(topo.nodes.len(), 2);
        assert_eq!(topo.visited, 5);
        assert_eq!(topo.nodes[&p(0)].role, Role::Producer);
        assert_eq!(topo.nodes[&p(4)].role, Role::Consumer);
        assert!(!topo.truncated);
    }

    #[test]
    fn reach_covers_cables_and_dangling_runs() {
        let (world, _keep) = line();
        world.lay_cable(p(4), p(8), TransmissionTier::COPPER);
        let topo = scan(&world, p(0), 512);
        assert_eq!(topo.nodes.len(), 2);
        assert_eq!(topo.reach.len(), 8);
        assert!(topo.reach.contains(&p(2)));
        assert!(topo.reach.contains(&p(7)), "cable beyond the consumer is reached");
        assert!(!topo.reach.contains(&p(8)));
    }

    #[test]
    fn segment_thresholds_come_from_cable_tiers() {
        let (world, _keep) = line();
        let topo = scan(&world, p(0), 512);
        assert_eq!(topo.segment_thresholds.len(), 3);
        assert_eq!(topo.segment_thresholds.get(&p(2)), Some(&2048));
        assert!(!topo.segment_thresholds.contains_key(&p(0)));
        assert_eq!(topo.edges[0].interior(), &[p(1), p(2), p(3)]);
    }

    #[test]
    fn fan_out_limits_followed_neighbors() {
        let world = GridWorld::new();
        let producer: Arc<dyn EnergyHandler> = Arc::new(BasicStorage::producer(1000, 512, 1000));
        let west: Arc<dyn EnergyHandler> = Arc::new(BasicStorage::consumer(1000, 512));
        let east: Arc<dyn EnergyHandler> = Arc::new(BasicStorage::consumer(1000, 512));
        world.place_device(p(0), producer.clone());
        world.place_device(p(-1), west.clone());
        world.place_device(p(1), east.clone());

        // West is listed first among the face neighbors.
        let narrow = ScanConfig { fan_out: 1, ..ScanConfig::default() };
        let topo = TopologyBuilder::new(&world, &world, &narrow, 1)
            .scan(p(0), &BTreeMap::new(), 0)
            .expect("test: anchor present");
        assert!(topo.nodes.contains_key(&p(-1)));
        assert!(!topo.nodes.contains_key(&p(1)));

        let topo = scan(&world, p(0), 512);
        assert_eq!(topo.nodes.len(), 3);
    }

    #[test]
    fn both_directions_get_an_edge() {
        let (world, _keep) = line();
        let topo = scan(&world, p(0), 512);
        assert_eq!(topo.edges.len(), 2);
        let forward = &topo.edges[0];
        assert_eq!((forward.from, forward.to), (p(0), p(4)));
        assert_eq!(forward.transfer_rate, 512);
        assert!((forward.efficiency - 0.98_f64.powi(3)).abs() < 1e-12);
        assert_eq!(forward.overload_threshold, Some(2048));
        let back = &topo.edges[1];
        assert_eq!((back.from, back.to), (p(4), p(0)));
        assert_eq!(back.path.first(), Some(&p(4)));
    }

    #[test]
    fn rescan_is_idempotent() {
        let (world, _keep) = line();
        let first = scan(&world, p(0), 512);
        let second = scan(&world, p(0), 512);
        assert_eq!(first.edges, second.edges);
        assert_eq!(
            first.nodes.keys().collect::<Vec<_>>(),
            second.nodes.keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn rescan_preserves_priority_and_access_time() {
        let (world, _keep) = line();
        let builder = TopologyBuilder::new(&world, &world, &ScanConfig::default(), 1);
        let mut first = builder.scan(p(0), &BTreeMap::new(), 0).expect("test: first scan");
        let node = first.nodes.get_mut(&p(4)).expect("test: consumer present");
        node.priority = 7;
        node.last_accessed_ms = 400;

        let second = builder.scan(p(0), &first.nodes, 1000).expect("test: rescan");
        assert_eq!(second.nodes[&p(4)].priority, 7);
        assert_eq!(second.nodes[&p(4)].last_accessed_ms, 400);
        assert_eq!(second.nodes[&p(0)].last_accessed_ms, 0);
    }

    #[test]
    fn failing_query_is_treated_as_no_interface() {
        let (world, _keep) = line();
        world.fail_queries_at(p(2));
        let topo = scan(&world, p(0), 512);
        assert_eq!(topo.nodes.len(), 1, "consumer unreachable past the failing cable");
        assert!(topo.edges.is_empty());
    }

    #[test]
    fn scan_limit_bounds_visits() {
        let (world, _keep) = line();
        let topo = scan(&world, p(0), 3);
        assert!(topo.truncated);
        assert!(topo.visited <= 3);
        assert!(!topo.nodes.contains_key(&p(4)));
    }

    #[test]
    fn full_flagless_storage_is_dropped() {
        let world = GridWorld::new();
        let flagless = Capabilities { can_receive: false, can_extract: false };
        let full: Arc<dyn EnergyHandler> =
            Arc::new(BasicStorage::new(PrimaryCell::symmetric(100, 10).with_stored(100), flagless));
        let spare: Arc<dyn EnergyHandler> =
            Arc::new(BasicStorage::new(PrimaryCell::symmetric(100, 10).with_stored(10), flagless));
        world.place_device(p(0), full.clone());
        world.place_device(p(1), spare.clone());

        let topo = scan(&world, p(0), 512);
        assert!(!topo.nodes.contains_key(&p(0)));
        assert_eq!(topo.nodes[&p(1)].role, Role::Storage);
    }

    #[test]
    fn missing_anchor_is_an_error() {
        let world = GridWorld::new();
        let err = TopologyBuilder::new(&world, &world, &ScanConfig::default(), 1)
            .scan(p(9), &BTreeMap::new(), 0)
            .expect_err("test: empty world");
        assert!(matches!(err, TopologyError::AnchorMissing(pos) if pos == p(9)));
    }

    #[test]
    fn edge_load_caps_available_rate() {
        let (world, _keep) = line();
        let mut edge = scan(&world, p(0), 512).edges[0].clone();
        edge.record_transfer(256);
        assert_eq!(edge.available_rate(), 256);
        edge.record_transfer(256);
        assert!(edge.is_saturated());
        assert_eq!(edge.available_rate(), 0);
        edge.reset_load();
        assert_eq!(edge.available_rate(), 512);
    }
}
