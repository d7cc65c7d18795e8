// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Network registry: keyed cache of networks and the per-cycle scheduler.
//!
//! Each network is one unit of work. `update_all` runs every cycle as a
//! blocking task on the tokio runtime under an aggregate deadline of
//! `per_network_budget * network_count`. When the deadline passes the shared
//! cancel flag is raised; cycles stop between requests and keep what they
//! already committed.
//!
//! Observers only ever see [`NetworkSnapshot`]s, published after each cycle.
//! No lock is held across two networks.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::GridConfig;
use crate::engine::{CancelFlag, DistributionEngine, EngineError};
use crate::network::{CycleReport, Network, NetworkSnapshot};
use crate::types::{BlockPos, DimensionId, NetworkKey};
use crate::world::WorldHandle;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no world registered for dimension {0}")]
    UnknownDimension(DimensionId),

    #[error("network {0} is not registered")]
    UnknownNetwork(NetworkKey),

    #[error("network {key}: {source}")]
    Engine {
        key: NetworkKey,
        #[source]
        source: EngineError,
    },
}

// ---------------------------------------------------------------------------
// UpdateReport
// ---------------------------------------------------------------------------

/// Outcome of one `update_all`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateReport {
    /// Simulated time of this cycle.
    pub now_ms: u64,
    pub completed: Vec<NetworkKey>,
    /// Stopped early on the deadline.
    pub cancelled: Vec<NetworkKey>,
    pub failed: Vec<(NetworkKey, String)>,
    pub elapsed: Duration,
    /// The deadline passed and cancellation was requested.
    pub degraded: bool,
}

impl UpdateReport {
    pub fn total(&self) -> usize {
        self.completed.len() + self.cancelled.len() + self.failed.len()
    }
}

// ---------------------------------------------------------------------------
// NetworkSlot
// ---------------------------------------------------------------------------

struct SlotCore {
    network: Network,
    engine: DistributionEngine,
}

struct NetworkSlot {
    core: Mutex<SlotCore>,
    snapshot: RwLock<Arc<NetworkSnapshot>>,
    /// Set by block-change events without waiting on a running cycle.
    dirty_requested: AtomicBool,
}

impl NetworkSlot {
    fn new(network: Network, engine: DistributionEngine, now_ms: u64) -> Self {
        let snapshot = Arc::new(network.snapshot(now_ms));
        Self {
            core: Mutex::new(SlotCore { network, engine }),
            snapshot: RwLock::new(snapshot),
            dirty_requested: AtomicBool::new(false),
        }
    }

    fn run_cycle(&self, world: &WorldHandle, now_ms: u64, cancel: &CancelFlag) -> Result<CycleReport, EngineError> {
        let mut core = self.core.lock();
        let SlotCore { network, engine } = &mut *core;
        if self.dirty_requested.swap(false, Ordering::AcqRel) {
            network.mark_dirty();
        }
        let result = engine.run_cycle(network, world, now_ms, cancel);
        self.publish(network, now_ms);
        result
    }

    fn publish(&self, network: &Network, now_ms: u64) {
        *self.snapshot.write() = Arc::new(network.snapshot(now_ms));
    }

    fn snapshot(&self) -> Arc<NetworkSnapshot> {
        self.snapshot.read().clone()
    }
}

// ---------------------------------------------------------------------------
// NetworkRegistry
// ---------------------------------------------------------------------------

pub struct NetworkRegistry {
    config: GridConfig,
    worlds: RwLock<HashMap<DimensionId, WorldHandle>>,
    networks: RwLock<HashMap<NetworkKey, Arc<NetworkSlot>>>,
    clock_ms: AtomicU64,
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::new(GridConfig::default())
    }
}

impl NetworkRegistry {
    pub fn new(config: GridConfig) -> Self {
        Self {
            config,
            worlds: RwLock::new(HashMap::new()),
            networks: RwLock::new(HashMap::new()),
            clock_ms: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Simulated time of the last cycle.
    pub fn now_ms(&self) -> u64 {
        self.clock_ms.load(Ordering::Acquire)
    }

    pub fn register_world(&self, dimension: impl Into<DimensionId>, world: WorldHandle) {
        self.worlds.write().insert(dimension.into(), world);
    }

    fn world(&self, dimension: &DimensionId) -> Option<WorldHandle> {
        self.worlds.read().get(dimension).cloned()
    }

    pub fn len(&self) -> usize {
        self.networks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.read().is_empty()
    }

    pub fn contains(&self, key: &NetworkKey) -> bool {
        self.networks.read().contains_key(key)
    }

    /// Registered keys in order.
    pub fn keys(&self) -> Vec<NetworkKey> {
        let mut keys: Vec<_> = self.networks.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Return the network for `key`, creating and scanning it on first
    /// reference.
    pub fn get_or_create(&self, key: &NetworkKey) -> Result<Arc<NetworkSnapshot>, RegistryError> {
        if let Some(slot) = self.networks.read().get(key) {
            return Ok(slot.snapshot());
        }
        let world = self
            .world(&key.dimension)
            .ok_or_else(|| RegistryError::UnknownDimension(key.dimension.clone()))?;

        let now_ms = self.now_ms();
        let mut network = Network::new(key.clone());
        let mut engine = DistributionEngine::new(&self.config);
        engine
            .rebuild(&mut network, &world, now_ms)
            .map_err(|source| RegistryError::Engine { key: key.clone(), source })?;
        info!(
            network = %key,
            nodes = network.nodes().len(),
            edges = network.edges().len(),
            "network created"
        );

        let slot = Arc::new(NetworkSlot::new(network, engine, now_ms));
        // Another caller may have created it while we scanned; keep theirs.
        let slot = self.networks.write().entry(key.clone()).or_insert(slot).clone();
        Ok(slot.snapshot())
    }

    /// Evict a network. Its devices are untouched.
    pub fn remove_network(&self, key: &NetworkKey) -> bool {
        let removed = self.networks.write().remove(key).is_some();
        if removed {
            info!(network = %key, "network removed");
        }
        removed
    }

    /// Force a rescan on the next cycle.
    pub fn mark_dirty(&self, key: &NetworkKey) -> Result<(), RegistryError> {
        let slot = self.slot(key)?;
        slot.dirty_requested.store(true, Ordering::Release);
        Ok(())
    }

    /// A block at `pos` in `dimension` was placed, removed or changed. Marks
    /// every network it can affect dirty and returns how many.
    pub fn on_block_changed(&self, dimension: &DimensionId, pos: BlockPos) -> usize {
        let networks = self.networks.read();
        let mut marked = 0;
        for (key, slot) in networks.iter() {
            if &key.dimension != dimension || !slot.snapshot().involves(pos) {
                continue;
            }
            slot.dirty_requested.store(true, Ordering::Release);
            marked += 1;
        }
        if marked > 0 {
            debug!(dimension = %dimension, pos = %pos, marked, "block change dirtied networks");
        }
        marked
    }

    pub fn snapshot(&self, key: &NetworkKey) -> Option<Arc<NetworkSnapshot>> {
        self.networks.read().get(key).map(|slot| slot.snapshot())
    }

    /// Set a node's priority, clamped to the configured bounds. Waits for a
    /// running cycle of that network to finish.
    pub fn set_priority(&self, key: &NetworkKey, pos: BlockPos, priority: u8) -> Result<bool, RegistryError> {
        let slot = self.slot(key)?;
        let mut core = slot.core.lock();
        let clamped = self.config.engine.clamp_priority(priority);
        let found = core.network.set_priority(pos, clamped);
        if found {
            slot.publish(&core.network, self.now_ms());
        }
        Ok(found)
    }

    /// Re-enable a network halted by its conservation breaker.
    pub fn reset_circuit_breaker(&self, key: &NetworkKey) -> Result<(), RegistryError> {
        let slot = self.slot(key)?;
        let mut core = slot.core.lock();
        core.engine.reset_circuit_breaker();
        warn!(network = %key, "conservation circuit breaker reset");
        Ok(())
    }

    fn slot(&self, key: &NetworkKey) -> Result<Arc<NetworkSlot>, RegistryError> {
        self.networks
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownNetwork(key.clone()))
    }

    /// Advance simulated time by one interval and run every network's cycle.
    ///
    /// Per-network failures never surface as errors; they are listed in the
    /// report and the network is rescanned next cycle.
    pub async fn update_all(&self) -> UpdateReport {
        let started = Instant::now();
        let interval = self.config.registry.cycle_interval_ms;
        let now_ms = self.clock_ms.fetch_add(interval, Ordering::AcqRel) + interval;

        let mut slots: Vec<(NetworkKey, Arc<NetworkSlot>)> = self
            .networks
            .read()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));

        let mut report = UpdateReport { now_ms, ..UpdateReport::default() };
        let cancel = CancelFlag::new();
        let mut tasks = JoinSet::new();
        let mut pending = HashSet::new();

        for (key, slot) in slots {
            let Some(world) = self.world(&key.dimension) else {
                let reason = RegistryError::UnknownDimension(key.dimension.clone()).to_string();
                report.failed.push((key, reason));
                continue;
            };
            let cancel = cancel.clone();
            pending.insert(key.clone());
            tasks.spawn_blocking(move || {
                let outcome = slot.run_cycle(&world, now_ms, &cancel);
                (key, outcome)
            });
        }

        let budget = self.config.registry.per_network_budget() * pending.len().max(1) as u32;
        let deadline = tokio::time::Instant::now() + budget;

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(joined)) => record(&mut report, &mut pending, joined),
                Ok(None) => break,
                Err(_) => {
                    cancel.cancel();
                    report.degraded = true;
                    warn!(
                        budget_ms = budget.as_millis() as u64,
                        remaining = pending.len(),
                        "cycle budget exceeded, cancelling remaining networks"
                    );
                    while let Some(joined) = tasks.join_next().await {
                        record(&mut report, &mut pending, joined);
                    }
                    break;
                }
            }
        }

        // Tasks that died outside the engine's panic guard.
        let mut lost: Vec<_> = pending.into_iter().collect();
        lost.sort();
        for key in lost {
            if let Some(slot) = self.networks.read().get(&key) {
                slot.dirty_requested.store(true, Ordering::Release);
            }
            report.failed.push((key, "cycle task panicked".to_string()));
        }

        report.completed.sort();
        report.cancelled.sort();
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));
        report.elapsed = started.elapsed();
        debug!(
            now_ms,
            completed = report.completed.len(),
            cancelled = report.cancelled.len(),
            failed = report.failed.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "update_all finished"
        );
        report
    }
}

type Joined = Result<(NetworkKey, Result<CycleReport, EngineError>), tokio::task::JoinError>;

fn record(report: &mut UpdateReport, pending: &mut HashSet<NetworkKey>, joined: Joined) {
    let (key, outcome) = match joined {
        Ok(done) => done,
        Err(e) => {
            warn!(error = %e, "cycle task failed to join");
            return;
        }
    };
    pending.remove(&key);
    match outcome {
        Ok(cycle) if cycle.cancelled => report.cancelled.push(key),
        Ok(_) => report.completed.push(key),
        Err(e) => report.failed.push((key, e.to_string())),
    }
}
