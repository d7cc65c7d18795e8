// Monte Carlo Infrastructure: N runs per scenario with statistical aggregation
// Each scenario runs N times with seeds base..base+N, computing mean ± 95% CI

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use grid_engine::*;
use tracing::warn;

use crate::report::*;
use crate::scenarios::{Scenario, DIMENSION};
use crate::time_series::{CycleSnapshot, TimeSeriesRecorder};

use std::time::Instant;

/// Run a single scenario iteration with a specific seed.
pub async fn run_single(
    scenario: &Scenario,
    seed: u64,
    time_series_dir: Option<&std::path::Path>,
) -> BenchResult {
    let start = Instant::now();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let setup = (scenario.build)(&mut rng);

    let registry = NetworkRegistry::new(setup.config.clone());
    registry.register_world(DIMENSION, WorldHandle::shared(setup.world.clone()));

    let mut keys = Vec::new();
    for anchor in &setup.anchors {
        let key = NetworkKey::new(*anchor, DIMENSION);
        if let Err(e) = registry.get_or_create(&key) {
            warn!(network = %key, error = %e, "network creation failed");
            continue;
        }
        keys.push(key);
    }

    let initial_total = setup.stored_total();
    let mut time_series = time_series_dir.map(|_| TimeSeriesRecorder::new());

    let mut cancelled_cycles = 0u64;
    let mut failed_cycles = 0u64;
    let mut degraded_updates = 0u64;
    let mut overloaded_segments = 0u64;
    let mut idle_since: Option<u64> = None;

    for cycle in 0..scenario.cycles {
        let update = registry.update_all().await;
        cancelled_cycles += update.cancelled.len() as u64;
        failed_cycles += update.failed.len() as u64;
        if update.degraded {
            degraded_updates += 1;
        }

        let snapshots: Vec<_> = keys.iter().filter_map(|k| registry.snapshot(k)).collect();
        let delivered: i64 = snapshots.iter().map(|s| s.stats.last_cycle.delivered).sum();
        overloaded_segments += snapshots
            .iter()
            .map(|s| s.stats.last_cycle.overloaded_segments as u64)
            .sum::<u64>();

        match (delivered, idle_since) {
            (0, None) => idle_since = Some(cycle),
            (d, Some(_)) if d > 0 => idle_since = None,
            _ => {}
        }

        if let Some(ts) = time_series.as_mut() {
            ts.record(CycleSnapshot::from_update(cycle, &update, &snapshots, setup.stored_total()));
        }
    }

    if let (Some(ts), Some(dir)) = (&time_series, time_series_dir) {
        let path = dir.join(format!("seed-{}.jsonl", seed));
        if let Err(e) = ts.write_jsonl(&path) {
            eprintln!("  Warning: failed to write time series: {}", e);
        }
    }

    let elapsed = start.elapsed();
    let elapsed_secs = elapsed.as_secs_f64().max(0.001);

    let snapshots: Vec<_> = keys.iter().filter_map(|k| registry.snapshot(k)).collect();
    let extracted: i64 = snapshots.iter().map(|s| s.stats.total_extracted).sum();
    let delivered: i64 = snapshots.iter().map(|s| s.stats.total_transferred).sum();
    let lost: i64 = snapshots.iter().map(|s| s.stats.total_lost).sum();
    let efficiency = if snapshots.is_empty() {
        1.0
    } else {
        snapshots.iter().map(|s| s.stats.efficiency).sum::<f64>() / snapshots.len() as f64
    };

    // Closed systems: stored energy may only fall.
    let final_total = setup.stored_total();
    let conservation_error = (final_total - initial_total).max(0) as f64;
    let accounting_error = (extracted - delivered - lost).abs() as f64;

    let loss_pct = if extracted > 0 { lost as f64 / extracted as f64 * 100.0 } else { 0.0 };
    let delivered_fraction = if setup.supply > 0 { delivered as f64 / setup.supply as f64 } else { 0.0 };

    let criteria = &scenario.criteria;
    let mut pass = conservation_error <= criteria.max_conservation_error && accounting_error == 0.0;
    if let Some(min) = criteria.min_delivered_fraction {
        if delivered_fraction < min {
            pass = false;
        }
    }
    if let Some(max) = criteria.max_loss_pct {
        if loss_pct > max {
            pass = false;
        }
    }
    if criteria.require_overload_report && overloaded_segments == 0 {
        pass = false;
    }
    if failed_cycles > criteria.max_failed_cycles {
        pass = false;
    }

    BenchResult {
        scenario: scenario.label.to_string(),
        name: scenario.name.to_string(),
        category: scenario.category.to_string(),
        seed,
        pass,
        networks: keys.len(),
        nodes: snapshots.iter().map(|s| s.nodes.len()).sum(),
        edges: snapshots.iter().map(|s| s.edges.len()).sum(),
        cycles: scenario.cycles,
        extracted,
        delivered,
        lost,
        loss_pct,
        delivered_fraction,
        efficiency,
        conservation_error,
        accounting_error,
        overloaded_segments,
        cancelled_cycles,
        failed_cycles,
        degraded_updates,
        settled_at_cycle: idle_since,
        elapsed_ms: elapsed.as_millis(),
        cycles_per_sec: scenario.cycles as f64 / elapsed_secs,
    }
}

/// Run Monte Carlo: N runs of a scenario, aggregate stats.
pub async fn run_monte_carlo(
    scenario: &Scenario,
    n_runs: usize,
    base_seed: u64,
    time_series_base: Option<&std::path::Path>,
) -> MonteCarloReport {
    let ts_dir = time_series_base.map(|base| base.join(scenario.name.to_lowercase()));

    let mut results = Vec::with_capacity(n_runs);
    for i in 0..n_runs {
        let seed = base_seed + i as u64;
        let result = run_single(scenario, seed, ts_dir.as_deref()).await;
        results.push(result);
    }

    aggregate(scenario, results)
}

/// Aggregate individual runs into a MonteCarloReport.
fn aggregate(scenario: &Scenario, results: Vec<BenchResult>) -> MonteCarloReport {
    let n = results.len();
    let passed = results.iter().filter(|r| r.pass).count();
    let pass_rate = if n > 0 { passed as f64 / n as f64 } else { 0.0 };

    let stat = |f: fn(&BenchResult) -> f64| Stats::from_samples(&results.iter().map(f).collect::<Vec<_>>());

    MonteCarloReport {
        scenario_name: scenario.name.to_string(),
        label: scenario.label.to_string(),
        category: scenario.category.to_string(),
        n_runs: n,
        pass_rate,
        conservation_error: stat(|r| r.conservation_error),
        delivered: stat(|r| r.delivered as f64),
        loss_pct: stat(|r| r.loss_pct),
        delivered_fraction: stat(|r| r.delivered_fraction),
        efficiency: stat(|r| r.efficiency),
        settled_at_cycle: stat(|r| r.settled_at_cycle.map_or(r.cycles as f64, |c| c as f64)),
        cancelled_cycles: stat(|r| r.cancelled_cycles as f64),
        elapsed_ms: stat(|r| r.elapsed_ms as f64),
        cycles_per_sec: stat(|r| r.cycles_per_sec),
        individual_runs: results,
    }
}
