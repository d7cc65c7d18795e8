// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Distribution engine: one cycle of energy allocation over a network.
//!
//! A cycle runs `Idle -> Scanning -> Distributing -> Idle`:
//!
//! 1. Rebuild the topology if the network is dirty.
//! 2. Rank producers and consumers by priority, recency, then position.
//! 3. Queue one request per (producer, consumer) pair.
//! 4. Drain the queue in order, moving each request over the best edge.
//! 5. Adjust priorities, recompute efficiency, run device hooks.
//!
//! Edge loads are reset on every exit path. An error or a device panic
//! aborts the cycle and marks the network dirty; transfers already
//! committed stay committed.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

use crate::adapter::{efficiency_factor, PrimaryValued};
use crate::config::{EngineConfig, GridConfig, ScanConfig};
use crate::conservation::{ConservationError, ConservationLedger};
use crate::currency::{ExchangeRate, Quantity};
use crate::network::{CycleReport, Network};
use crate::storage::EnergyHandler;
use crate::topology::{TopologyBuilder, TopologyError};
use crate::types::{BlockPos, Currency, Role};
use crate::world::WorldHandle;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("node {0} no longer has a live device")]
    StaleNode(BlockPos),

    #[error("topology rebuild failed: {0}")]
    Topology(#[from] TopologyError),

    #[error("conservation check failed: {0}")]
    Conservation(#[from] ConservationError),

    #[error("device handler panicked: {0}")]
    HandlerPanic(String),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Idle,
    Scanning,
    Distributing,
}

/// One queued allocation. `amount` is in primary units even when the
/// transfer runs in the secondary currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferRequest {
    pub from: BlockPos,
    pub to: BlockPos,
    pub amount: i64,
    pub currency: Currency,
    pub priority: u8,
}

/// Cooperative cancellation shared between a cycle and its scheduler.
/// Checked between requests.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct Candidate {
    pos: BlockPos,
    amount: i64,
    priority: u8,
    last_accessed_ms: u64,
}

// ---------------------------------------------------------------------------
// Transfer lanes
// ---------------------------------------------------------------------------

/// Source/sink pair in one currency.
trait Lane {
    type Amount: PrimaryValued;

    fn extract(&self, amount: Self::Amount, simulate: bool) -> Self::Amount;
    fn receive(&self, amount: Self::Amount, simulate: bool) -> Self::Amount;
    /// Return energy to the source.
    fn refund(&self, amount: Self::Amount) -> Self::Amount;
}

struct PrimaryLane<'a> {
    source: &'a dyn EnergyHandler,
    sink: &'a dyn EnergyHandler,
}

impl Lane for PrimaryLane<'_> {
    type Amount = i64;

    fn extract(&self, amount: i64, simulate: bool) -> i64 {
        self.source.extract(amount, simulate)
    }
    fn receive(&self, amount: i64, simulate: bool) -> i64 {
        self.sink.receive(amount, simulate)
    }
    fn refund(&self, amount: i64) -> i64 {
        self.source.receive(amount, false)
    }
}

struct SecondaryLane<'a> {
    source: &'a dyn EnergyHandler,
    sink: &'a dyn EnergyHandler,
}

impl Lane for SecondaryLane<'_> {
    type Amount = Decimal;

    fn extract(&self, amount: Decimal, simulate: bool) -> Decimal {
        self.source.extract_secondary(amount, simulate)
    }
    fn receive(&self, amount: Decimal, simulate: bool) -> Decimal {
        self.sink.receive_secondary(amount, simulate)
    }
    fn refund(&self, amount: Decimal) -> Decimal {
        self.source.receive_secondary(amount, false)
    }
}

#[derive(Debug, Clone, Copy)]
struct LaneOutcome<Q> {
    extracted: Q,
    delivered: Q,
    refunded: Q,
}

impl<Q: Quantity> LaneOutcome<Q> {
    fn none() -> Self {
        Self { extracted: Q::zero(), delivered: Q::zero(), refunded: Q::zero() }
    }
}

/// Move up to `amount` over a link that keeps `factor` of what enters it.
///
/// Probes both ends first so the source only gives up what the sink can
/// take after line loss. Anything the sink then refuses on commit goes back
/// to the source.
fn execute<L: Lane>(lane: &L, amount: L::Amount, factor: Decimal) -> LaneOutcome<L::Amount> {
    let available = lane.extract(amount, true);
    if !available.is_positive() {
        return LaneOutcome::none();
    }
    let acceptable = lane.receive(available.attenuate(factor), true);
    if !acceptable.is_positive() {
        return LaneOutcome::none();
    }
    let needed = acceptable
        .pre_attenuation(factor)
        .map_or(available, |n| n.min(available));

    let extracted = lane.extract(needed, false);
    if !extracted.is_positive() {
        return LaneOutcome::none();
    }
    let delivered = lane.receive(extracted.attenuate(factor).min(acceptable), false);

    let consumed = delivered
        .pre_attenuation(factor)
        .map_or(extracted, |n| n.min(extracted));
    let surplus = extracted - consumed;
    let refunded = if surplus.is_positive() { lane.refund(surplus) } else { <L::Amount as Quantity>::zero() };

    LaneOutcome { extracted, delivered, refunded }
}

/// One committed transfer.
#[derive(Debug, Clone, Copy, Default)]
struct Settled {
    /// Lane units that left the source for good, in primary units rounded
    /// up. Charged against the link and the source's supply.
    moved: i64,
    /// Lane units the sink accepted, charged against its demand.
    accepted: i64,
    /// How far the network's whole-unit totals advanced.
    extracted: i64,
    delivered: i64,
    /// The transfer ran over the secondary lane.
    secondary: bool,
}

// ---------------------------------------------------------------------------
// DistributionEngine
// ---------------------------------------------------------------------------

pub struct DistributionEngine {
    config: EngineConfig,
    scan: ScanConfig,
    rate: ExchangeRate,
    ledger: ConservationLedger,
    state: EngineState,
}

impl DistributionEngine {
    pub fn new(config: &GridConfig) -> Self {
        Self {
            config: config.engine.clone(),
            scan: config.scan.clone(),
            rate: config.exchange_rate,
            ledger: ConservationLedger::new(config.engine.conservation_breaker_threshold),
            state: EngineState::Idle,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn ledger(&self) -> &ConservationLedger {
        &self.ledger
    }

    pub fn reset_circuit_breaker(&mut self) {
        self.ledger.reset_circuit_breaker();
    }

    /// Rescan the network from its anchor and clear the dirty flag.
    pub fn rebuild(&mut self, network: &mut Network, world: &WorldHandle, now_ms: u64) -> Result<(), EngineError> {
        let builder = TopologyBuilder::new(
            world.spatial.as_ref(),
            world.paths.as_ref(),
            &self.scan,
            self.config.default_priority,
        );
        let topology = builder.scan(network.key().anchor, network.nodes(), now_ms)?;
        if topology.truncated {
            warn!(
                network = %network.key(),
                scan_limit = self.scan.scan_limit,
                "topology scan hit the visit limit"
            );
        }
        network.apply_topology(topology);
        Ok(())
    }

    /// Run one cycle. Failures, including device panics, are returned as
    /// errors after the network has been marked dirty.
    pub fn run_cycle(
        &mut self,
        network: &mut Network,
        world: &WorldHandle,
        now_ms: u64,
        cancel: &CancelFlag,
    ) -> Result<CycleReport, EngineError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.cycle(network, world, now_ms, cancel)));
        network.reset_loads();
        self.state = EngineState::Idle;

        let result = outcome.unwrap_or_else(|payload| Err(EngineError::HandlerPanic(panic_message(payload.as_ref()))));
        match result {
            Ok(report) => {
                let stats = network.stats_mut();
                if report.cancelled {
                    stats.cycles_cancelled += 1;
                } else {
                    stats.cycles_completed += 1;
                }
                stats.last_cycle = report.clone();
                Ok(report)
            }
            Err(e) => {
                network.mark_dirty();
                network.stats_mut().cycles_failed += 1;
                warn!(network = %network.key(), error = %e, "distribution cycle aborted");
                Err(e)
            }
        }
    }

    fn cycle(
        &mut self,
        network: &mut Network,
        world: &WorldHandle,
        now_ms: u64,
        cancel: &CancelFlag,
    ) -> Result<CycleReport, EngineError> {
        self.ledger.ensure_open()?;
        let mut report = CycleReport::default();

        self.state = EngineState::Scanning;
        if network.is_dirty() {
            self.rebuild(network, world, now_ms)?;
            report.rescanned = true;
        }

        self.state = EngineState::Distributing;
        let mut handles = HashMap::new();
        let producers = rank(network, &mut handles, Role::supplies, |h| h.extract(i64::MAX, true))?;
        let consumers = rank(network, &mut handles, Role::demands, |h| h.receive(i64::MAX, true))?;

        let requests = self.plan(&producers, &consumers, &handles);
        report.requests = requests.len();

        // Probed once; later requests draw down what earlier ones used.
        let mut supply: HashMap<BlockPos, i64> = producers.iter().map(|c| (c.pos, c.amount)).collect();
        let mut demand: HashMap<BlockPos, i64> = consumers.iter().map(|c| (c.pos, c.amount)).collect();

        for request in &requests {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let budget = request
                .amount
                .min(supply.get(&request.from).copied().unwrap_or(0))
                .min(demand.get(&request.to).copied().unwrap_or(0));
            let settled = self.execute_request(network, request, budget, &handles)?;
            if let Some(left) = supply.get_mut(&request.from) {
                *left -= settled.moved.max(0);
            }
            if let Some(left) = demand.get_mut(&request.to) {
                *left -= settled.accepted.max(0);
            }
            report.extracted += settled.extracted;
            report.delivered += settled.delivered;
            report.lost += settled.extracted - settled.delivered;
            if settled.moved <= 0 {
                report.skipped += 1;
                continue;
            }
            report.executed += 1;
            if settled.secondary {
                report.secondary_transfers += 1;
            }
            if settled.accepted > 0 {
                network.touch(request.from, now_ms);
                network.touch(request.to, now_ms);
            }
        }

        for segment in network.overloaded_segments() {
            warn!(
                network = %network.key(),
                pos = %segment.pos,
                moved = segment.moved,
                threshold = segment.threshold,
                "cable segment overloaded"
            );
            report.overloaded_segments += 1;
        }

        if report.cancelled {
            debug!(network = %network.key(), executed = report.executed, "cycle cancelled before completion");
            return Ok(report);
        }

        self.adjust_priorities(network, now_ms);
        network.stats_mut().efficiency = network.mean_edge_efficiency();
        for handler in handles.values() {
            handler.on_cycle(now_ms);
        }

        debug!(
            network = %network.key(),
            requests = report.requests,
            executed = report.executed,
            delivered = report.delivered,
            lost = report.lost,
            "cycle complete"
        );
        Ok(report)
    }

    /// One request per (producer, consumer) pair, producer-major.
    fn plan(
        &self,
        producers: &[Candidate],
        consumers: &[Candidate],
        handles: &HashMap<BlockPos, Arc<dyn EnergyHandler>>,
    ) -> Vec<TransferRequest> {
        let mut requests = Vec::with_capacity(producers.len() * consumers.len());
        for producer in producers {
            for consumer in consumers {
                if producer.pos == consumer.pos {
                    continue;
                }
                let currency = match (handles.get(&producer.pos), handles.get(&consumer.pos)) {
                    (Some(src), Some(dst)) => lane_currency(src.as_ref(), dst.as_ref()),
                    _ => Currency::Primary,
                };
                requests.push(TransferRequest {
                    from: producer.pos,
                    to: consumer.pos,
                    amount: producer.amount.min(consumer.amount),
                    currency,
                    priority: producer.priority,
                });
            }
        }
        requests
    }

    fn execute_request(
        &mut self,
        network: &mut Network,
        request: &TransferRequest,
        budget: i64,
        handles: &HashMap<BlockPos, Arc<dyn EnergyHandler>>,
    ) -> Result<Settled, EngineError> {
        let Some(idx) = network.best_edge(request.from, request.to) else {
            return Ok(Settled::default());
        };
        let (cap, factor) = match network.edges().get(idx) {
            Some(edge) => (edge.available_rate(), efficiency_factor(edge.efficiency)),
            None => return Ok(Settled::default()),
        };
        let actual = budget.min(cap);
        if actual <= 0 {
            return Ok(Settled::default());
        }
        let source = handles.get(&request.from).ok_or(EngineError::StaleNode(request.from))?;
        let sink = handles.get(&request.to).ok_or(EngineError::StaleNode(request.to))?;

        let (source_before, sink_before) = (source.stored_value(), sink.stored_value());

        let mut settled = None;
        if request.currency == Currency::Secondary {
            let lane = SecondaryLane { source: source.as_ref(), sink: sink.as_ref() };
            let outcome = execute(&lane, self.rate.secondary_value(actual), factor);
            if outcome.extracted.is_positive() {
                settled = Some(self.settle(outcome, true)?);
            }
        }
        // Hybrids whose secondary lane moved nothing still trade in primary.
        let mut settled = match settled {
            Some(settled) => settled,
            None => {
                let lane = PrimaryLane { source: source.as_ref(), sink: sink.as_ref() };
                self.settle(execute(&lane, actual, factor), false)?
            }
        };
        if settled.moved > 0 {
            if let Some(edge) = network.edge_mut(idx) {
                edge.record_transfer(settled.moved);
            }
        }
        // A fully refunded transfer can still cost conversion loss.
        let extracted = (source_before - source.stored_value()).max(Decimal::ZERO);
        let delivered = (sink.stored_value() - sink_before).max(Decimal::ZERO);
        (settled.extracted, settled.delivered) = network.stats_mut().record_flow(extracted, delivered);
        Ok(settled)
    }

    /// Verify a committed transfer and charge it in primary units.
    fn settle<Q: PrimaryValued>(&mut self, outcome: LaneOutcome<Q>, secondary: bool) -> Result<Settled, EngineError> {
        if !outcome.extracted.is_positive() {
            return Ok(Settled { secondary, ..Settled::default() });
        }
        self.ledger.verify_transfer(
            outcome.extracted.to_decimal_amount(),
            outcome.delivered.to_decimal_amount(),
            outcome.refunded.to_decimal_amount(),
        )?;
        let moved = (outcome.extracted - outcome.refunded).to_primary_units(&self.rate);
        let accepted = outcome.delivered.to_primary_units(&self.rate).min(moved);
        Ok(Settled { moved, accepted, secondary, ..Settled::default() })
    }

    /// ±1 per cycle within the configured bounds: up on recent access or a
    /// favorable fill ratio, down after the idle threshold.
    fn adjust_priorities(&self, network: &mut Network, now_ms: u64) {
        let config = &self.config;
        for node in network.nodes_mut() {
            let since = now_ms.saturating_sub(node.last_accessed_ms);
            let fill = node.handler().map_or(0.0, |h| h.fill_ratio());
            let favorable = match node.role {
                Role::Producer => fill > config.producer_favorable_fill,
                Role::Consumer | Role::Storage => fill < config.consumer_favorable_fill,
                Role::Hybrid => fill > config.producer_favorable_fill || fill < config.consumer_favorable_fill,
            };
            let next = if since < config.recency_window_ms || favorable {
                node.priority.saturating_add(1)
            } else if since > config.idle_threshold_ms {
                node.priority.saturating_sub(1)
            } else {
                node.priority
            };
            node.priority = config.clamp_priority(next);
        }
    }
}

/// Live nodes matching `role_filter` with a positive probe, best first.
/// Any node whose device is gone fails the cycle.
fn rank(
    network: &Network,
    handles: &mut HashMap<BlockPos, Arc<dyn EnergyHandler>>,
    role_filter: fn(&Role) -> bool,
    probe: impl Fn(&dyn EnergyHandler) -> i64,
) -> Result<Vec<Candidate>, EngineError> {
    let mut ranked = Vec::new();
    for node in network.nodes().values() {
        if !role_filter(&node.role) {
            continue;
        }
        let handler = node.handler().ok_or(EngineError::StaleNode(node.pos))?;
        let amount = probe(handler.as_ref());
        handles.entry(node.pos).or_insert(handler);
        if amount > 0 {
            ranked.push(Candidate {
                pos: node.pos,
                amount,
                priority: node.priority,
                last_accessed_ms: node.last_accessed_ms,
            });
        }
    }
    ranked.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(b.last_accessed_ms.cmp(&a.last_accessed_ms))
            .then(a.pos.cmp(&b.pos))
    });
    Ok(ranked)
}

/// Secondary when both ends are hybrid storages and either prefers it.
fn lane_currency(source: &dyn EnergyHandler, sink: &dyn EnergyHandler) -> Currency {
    match (source.hybrid_policy(), sink.hybrid_policy()) {
        (Some(a), Some(b)) if a.favors_secondary() || b.favors_secondary() => Currency::Secondary,
        _ => Currency::Primary,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
