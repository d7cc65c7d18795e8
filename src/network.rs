// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! One energy network: its discovered nodes, edges and running totals.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::topology::{Edge, Node, Topology};
use crate::types::{BlockPos, NetworkKey, Role};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Outcome of one distribution cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    /// Topology was rebuilt at the start of the cycle.
    pub rescanned: bool,
    pub requests: usize,
    /// Requests that moved energy.
    pub executed: usize,
    /// Requests with no usable edge or nothing to move.
    pub skipped: usize,
    /// Requests whose energy moved over the secondary lane.
    pub secondary_transfers: usize,
    /// Primary units (or primary equivalent) that left producers for good.
    pub extracted: i64,
    /// Primary units (or primary equivalent) that reached consumers.
    pub delivered: i64,
    pub lost: i64,
    /// Path segments whose summed throughput reached their threshold.
    pub overloaded_segments: usize,
    /// The cycle stopped early on cancellation; statistics were not updated.
    pub cancelled: bool,
}

/// Running totals. The whole-unit totals are the truncated exact value
/// flows, so sub-unit secondary transfers carry over instead of vanishing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkStats {
    pub total_transferred: i64,
    pub total_extracted: i64,
    pub total_lost: i64,
    /// Value producers gave up, as an exact primary equivalent. Includes
    /// conversion loss inside hybrid devices.
    pub extracted_value: Decimal,
    /// Value consumers gained, as an exact primary equivalent.
    pub delivered_value: Decimal,
    /// Mean `efficiency * (1 - load)` over edges at the last completed cycle.
    pub efficiency: f64,
    pub cycles_completed: u64,
    pub cycles_cancelled: u64,
    pub cycles_failed: u64,
    pub rescans: u64,
    pub last_cycle: CycleReport,
}

impl Default for NetworkStats {
    fn default() -> Self {
        Self {
            total_transferred: 0,
            total_extracted: 0,
            total_lost: 0,
            extracted_value: Decimal::ZERO,
            delivered_value: Decimal::ZERO,
            efficiency: 1.0,
            cycles_completed: 0,
            cycles_cancelled: 0,
            cycles_failed: 0,
            rescans: 0,
            last_cycle: CycleReport::default(),
        }
    }
}

impl NetworkStats {
    /// Add one transfer's value flow and return how far the whole-unit
    /// extracted and delivered totals advanced.
    pub(crate) fn record_flow(&mut self, extracted: Decimal, delivered: Decimal) -> (i64, i64) {
        let (extracted_before, delivered_before) = (self.total_extracted, self.total_transferred);
        self.extracted_value += extracted;
        self.delivered_value += delivered;
        self.total_extracted = whole_units(self.extracted_value);
        self.total_transferred = whole_units(self.delivered_value);
        self.total_lost = self.total_extracted - self.total_transferred;
        (self.total_extracted - extracted_before, self.total_transferred - delivered_before)
    }
}

fn whole_units(value: Decimal) -> i64 {
    value.trunc().to_i64().unwrap_or(if value.is_sign_negative() { 0 } else { i64::MAX })
}

/// A path segment whose summed throughput reached its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentLoad {
    pub pos: BlockPos,
    pub moved: i64,
    pub threshold: i64,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Read-only view of a node. `stored`/`capacity` are read when the snapshot
/// is taken and are zero for a node whose device is gone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    pub pos: BlockPos,
    pub role: Role,
    pub priority: u8,
    pub last_accessed_ms: u64,
    pub stored: i64,
    pub capacity: i64,
    pub live: bool,
}

/// Copy of a network's state handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSnapshot {
    pub key: NetworkKey,
    pub taken_at_ms: u64,
    pub dirty: bool,
    pub nodes: Vec<NodeView>,
    pub edges: Vec<Edge>,
    /// Every interface-bearing position the last scan walked.
    pub reach: BTreeSet<BlockPos>,
    pub stats: NetworkStats,
}

impl NetworkSnapshot {
    pub fn node(&self, pos: BlockPos) -> Option<&NodeView> {
        self.nodes.iter().find(|n| n.pos == pos)
    }

    /// Whether a block change at `pos` can affect this network: the anchor,
    /// a member, anything on or beside an edge path, or anything on or
    /// beside a walked position such as the open end of a cable run.
    pub fn involves(&self, pos: BlockPos) -> bool {
        pos == self.key.anchor
            || self.reach.contains(&pos)
            || pos.face_neighbors().iter().any(|n| self.reach.contains(n))
            || self.nodes.iter().any(|n| n.pos.manhattan(pos) <= 1)
            || self.edges.iter().any(|e| e.path.iter().any(|p| p.manhattan(pos) <= 1))
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Network {
    key: NetworkKey,
    nodes: BTreeMap<BlockPos, Node>,
    edges: Vec<Edge>,
    reach: BTreeSet<BlockPos>,
    segment_thresholds: BTreeMap<BlockPos, i64>,
    dirty: bool,
    scan_truncated: bool,
    stats: NetworkStats,
}

impl Network {
    /// A new network starts dirty so the first cycle scans it.
    pub fn new(key: NetworkKey) -> Self {
        Self {
            key,
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            reach: BTreeSet::new(),
            segment_thresholds: BTreeMap::new(),
            dirty: true,
            scan_truncated: false,
            stats: NetworkStats::default(),
        }
    }

    pub fn key(&self) -> &NetworkKey {
        &self.key
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn nodes(&self) -> &BTreeMap<BlockPos, Node> {
        &self.nodes
    }

    pub fn node(&self, pos: BlockPos) -> Option<&Node> {
        self.nodes.get(&pos)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn scan_truncated(&self) -> bool {
        self.scan_truncated
    }

    /// Set a node's priority. Returns false for an unknown position.
    pub fn set_priority(&mut self, pos: BlockPos, priority: u8) -> bool {
        match self.nodes.get_mut(&pos) {
            Some(node) => {
                node.priority = priority;
                true
            }
            None => false,
        }
    }

    /// Replace nodes and edges with a fresh scan and clear the dirty flag.
    pub fn apply_topology(&mut self, topology: Topology) {
        self.nodes = topology.nodes;
        self.edges = topology.edges;
        self.reach = topology.reach;
        self.segment_thresholds = topology.segment_thresholds;
        self.scan_truncated = topology.truncated;
        self.dirty = false;
        self.stats.rescans += 1;
    }

    /// Index of the best usable edge from `from` to `to`: highest
    /// `efficiency * (1 - load)` among edges with load below 1. Ties keep
    /// the first edge in `(from, to)` order.
    pub fn best_edge(&self, from: BlockPos, to: BlockPos) -> Option<usize> {
        let start = self.edges.partition_point(|e| (e.from, e.to) < (from, to));
        let mut best: Option<(usize, f64)> = None;
        for (offset, edge) in self.edges[start..].iter().enumerate() {
            if (edge.from, edge.to) != (from, to) {
                break;
            }
            if edge.is_saturated() {
                continue;
            }
            let score = edge.score();
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((start + offset, score));
            }
        }
        best.map(|(idx, _)| idx)
    }

    pub(crate) fn edge_mut(&mut self, idx: usize) -> Option<&mut Edge> {
        self.edges.get_mut(idx)
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    pub(crate) fn touch(&mut self, pos: BlockPos, now_ms: u64) {
        if let Some(node) = self.nodes.get_mut(&pos) {
            node.last_accessed_ms = now_ms;
        }
    }

    pub(crate) fn stats_mut(&mut self) -> &mut NetworkStats {
        &mut self.stats
    }

    /// Mean edge score, 1.0 for a network with no edges.
    pub fn mean_edge_efficiency(&self) -> f64 {
        if self.edges.is_empty() {
            return 1.0;
        }
        self.edges.iter().map(Edge::score).sum::<f64>() / self.edges.len() as f64
    }

    /// Segments overloaded this cycle, by position. Edges sharing a
    /// segment add up, since the same cable carries all of them.
    pub fn overloaded_segments(&self) -> Vec<SegmentLoad> {
        let mut moved: HashMap<BlockPos, i64> = HashMap::new();
        for edge in self.edges.iter().filter(|e| e.moved_this_cycle > 0) {
            for pos in edge.interior() {
                *moved.entry(*pos).or_default() += edge.moved_this_cycle;
            }
        }
        let mut overloaded: Vec<SegmentLoad> = moved
            .into_iter()
            .filter_map(|(pos, moved)| {
                let threshold = *self.segment_thresholds.get(&pos)?;
                (threshold > 0 && moved >= threshold).then_some(SegmentLoad { pos, moved, threshold })
            })
            .collect();
        overloaded.sort_by_key(|s| s.pos);
        overloaded
    }

    pub fn reset_loads(&mut self) {
        for edge in &mut self.edges {
            edge.reset_load();
        }
    }

    pub fn snapshot(&self, now_ms: u64) -> NetworkSnapshot {
        let nodes = self
            .nodes
            .values()
            .map(|node| {
                let handler = node.handler();
                NodeView {
                    pos: node.pos,
                    role: node.role,
                    priority: node.priority,
                    last_accessed_ms: node.last_accessed_ms,
                    stored: handler.as_ref().map_or(0, |h| h.stored()),
                    capacity: handler.as_ref().map_or(0, |h| h.capacity()),
                    live: handler.is_some(),
                }
            })
            .collect();
        NetworkSnapshot {
            key: self.key.clone(),
            taken_at_ms: now_ms,
            dirty: self.dirty,
            nodes,
            edges: self.edges.clone(),
            reach: self.reach.clone(),
            stats: self.stats.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: i32) -> BlockPos {
        BlockPos::new(x, 0, 0)
    }

    fn edge(from: i32, to: i32, efficiency: f64, load: f64) -> Edge {
        Edge {
            from: p(from),
            to: p(to),
            path: vec![p(from), p(to)],
            efficiency,
            transfer_rate: 512,
            overload_threshold: None,
            current_load: load,
            moved_this_cycle: 0,
        }
    }

    fn network_with(edges: Vec<Edge>) -> Network {
        let mut network = Network::new(NetworkKey::new(p(0), "overworld"));
        let mut edges = edges;
        edges.sort_by(|a, b| (a.from, a.to).cmp(&(b.from, b.to)));
        network.apply_topology(Topology { edges, ..Topology::default() });
        network
    }

    #[test]
    fn new_network_is_dirty_until_scanned() {
        let mut network = Network::new(NetworkKey::new(p(0), "overworld"));
        assert!(network.is_dirty());
        network.apply_topology(Topology::default());
        assert!(!network.is_dirty());
        assert_eq!(network.stats().rescans, 1);
    }

    #[test]
    fn best_edge_prefers_score_and_skips_saturated() {
        let network = network_with(vec![
            edge(0, 1, 0.9, 0.0),
            edge(0, 1, 0.99, 0.5),
            edge(0, 1, 1.0, 1.0),
            edge(0, 2, 1.0, 0.0),
        ]);
        let idx = network.best_edge(p(0), p(1)).expect("test: usable edge");
        assert_eq!(network.edges()[idx].efficiency, 0.9);
        assert!(network.best_edge(p(1), p(0)).is_none());
    }

    #[test]
    fn efficiency_with_no_edges_is_one() {
        let network = network_with(Vec::new());
        assert_eq!(network.mean_edge_efficiency(), 1.0);
    }

    #[test]
    fn involves_the_open_end_of_a_cable_run() {
        let mut network = Network::new(NetworkKey::new(p(0), "overworld"));
        network.apply_topology(Topology { reach: (0..4).map(p).collect(), ..Topology::default() });
        let snapshot = network.snapshot(0);
        assert!(snapshot.involves(p(3)));
        assert!(snapshot.involves(p(4)));
        assert!(snapshot.involves(BlockPos::new(3, 0, 1)));
        assert!(!snapshot.involves(p(5)));
    }

    #[test]
    fn shared_segments_sum_their_throughput() {
        let mut a = edge(0, 4, 1.0, 0.0);
        a.path = vec![p(0), p(1), p(2), p(4)];
        let mut b = edge(0, 5, 1.0, 0.0);
        b.path = vec![p(0), p(1), p(5)];
        let mut network = network_with(vec![a, b]);
        network.segment_thresholds = BTreeMap::from([(p(1), 1000), (p(2), 1000)]);
        network.edge_mut(0).expect("test: edge").record_transfer(500);
        network.edge_mut(1).expect("test: edge").record_transfer(500);

        let overloaded = network.overloaded_segments();
        assert_eq!(overloaded, vec![SegmentLoad { pos: p(1), moved: 1000, threshold: 1000 }]);
        network.reset_loads();
        assert!(network.overloaded_segments().is_empty());
    }

    #[test]
    fn sub_unit_flows_carry_into_whole_totals() {
        use rust_decimal_macros::dec;
        let mut stats = NetworkStats::default();
        assert_eq!(stats.record_flow(dec!(0.6), dec!(0.4)), (0, 0));
        assert_eq!(stats.record_flow(dec!(0.6), dec!(0.4)), (1, 0));
        assert_eq!(stats.record_flow(dec!(10), dec!(9.5)), (10, 10));
        assert_eq!(stats.total_extracted, 11);
        assert_eq!(stats.total_transferred, 10);
        assert_eq!(stats.total_lost, 1);
        assert_eq!(stats.extracted_value - stats.delivered_value, dec!(0.9));
    }

    #[test]
    fn involves_anchor_and_paths() {
        let snapshot = network_with(vec![edge(0, 3, 1.0, 0.0)]).snapshot(0);
        assert!(snapshot.involves(p(0)));
        assert!(snapshot.involves(p(4)));
        assert!(snapshot.involves(BlockPos::new(3, 1, 0)));
        assert!(!snapshot.involves(p(10)));
    }
}
