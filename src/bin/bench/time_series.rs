// Per-Cycle JSONL Time Series Recorder
// Outputs one JSON line per cycle for independent analysis

use serde::Serialize;
use grid_engine::{NetworkSnapshot, UpdateReport};
use std::io::Write;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct CycleSnapshot {
    pub cycle: u64,
    pub now_ms: u64,
    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub degraded: bool,
    pub elapsed_us: u128,
    pub extracted: i64,
    pub delivered: i64,
    pub lost: i64,
    pub mean_efficiency: f64,
    pub overloaded_segments: usize,
    pub rescans: usize,
    pub stored_total: i64,
}

impl CycleSnapshot {
    pub fn from_update(
        cycle: u64,
        update: &UpdateReport,
        snapshots: &[Arc<NetworkSnapshot>],
        stored_total: i64,
    ) -> Self {
        let sum = |f: fn(&NetworkSnapshot) -> i64| snapshots.iter().map(|s| f(s)).sum::<i64>();
        let mean_efficiency = if snapshots.is_empty() {
            1.0
        } else {
            snapshots.iter().map(|s| s.stats.efficiency).sum::<f64>() / snapshots.len() as f64
        };

        Self {
            cycle,
            now_ms: update.now_ms,
            completed: update.completed.len(),
            cancelled: update.cancelled.len(),
            failed: update.failed.len(),
            degraded: update.degraded,
            elapsed_us: update.elapsed.as_micros(),
            extracted: sum(|s| s.stats.last_cycle.extracted),
            delivered: sum(|s| s.stats.last_cycle.delivered),
            lost: sum(|s| s.stats.last_cycle.lost),
            mean_efficiency,
            overloaded_segments: snapshots.iter().map(|s| s.stats.last_cycle.overloaded_segments).sum(),
            rescans: snapshots.iter().filter(|s| s.stats.last_cycle.rescanned).count(),
            stored_total,
        }
    }
}

/// Time series recorder that accumulates snapshots and writes JSONL
pub struct TimeSeriesRecorder {
    snapshots: Vec<CycleSnapshot>,
}

impl TimeSeriesRecorder {
    pub fn new() -> Self {
        Self { snapshots: Vec::new() }
    }

    pub fn record(&mut self, snapshot: CycleSnapshot) {
        self.snapshots.push(snapshot);
    }

    /// Write all snapshots to a JSONL file
    pub fn write_jsonl(&self, path: &std::path::Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(path)?;
        for snapshot in &self.snapshots {
            let line = serde_json::to_string(snapshot)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }
}
