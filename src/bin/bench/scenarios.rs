// Scenario Definitions: grid layouts built per seed
// Each builder lays out devices and cables in a fresh world; the runner drives
// them through the registry exactly as a host would.

use std::sync::Arc;

use grid_engine::*;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const DIMENSION: &str = "bench";

// ─── Scenario Configuration ─────────────────────────────────────────────────

pub struct Scenario {
    pub name: &'static str,
    pub label: &'static str,
    pub category: &'static str,
    pub cycles: u64,
    pub build: fn(&mut ChaCha8Rng) -> GridSetup,
    pub criteria: PassCriteria,
}

pub struct PassCriteria {
    /// Primary units a run may gain over its starting total.
    pub max_conservation_error: f64,
    /// Fraction of initial producer energy that must be delivered.
    pub min_delivered_fraction: Option<f64>,
    pub max_loss_pct: Option<f64>,
    pub require_overload_report: bool,
    pub max_failed_cycles: u64,
}

impl Default for PassCriteria {
    fn default() -> Self {
        Self {
            max_conservation_error: 0.0,
            min_delivered_fraction: None,
            max_loss_pct: None,
            require_overload_report: false,
            max_failed_cycles: 0,
        }
    }
}

/// A laid-out world plus the networks to drive over it.
pub struct GridSetup {
    pub world: Arc<GridWorld>,
    pub anchors: Vec<BlockPos>,
    /// Every device placed, for stored-energy totals.
    pub devices: Vec<Arc<dyn EnergyHandler>>,
    pub config: GridConfig,
    /// Energy held by extractable devices at the start.
    pub supply: i64,
}

impl GridSetup {
    fn new() -> Self {
        Self {
            world: Arc::new(GridWorld::new()),
            anchors: Vec::new(),
            devices: Vec::new(),
            config: GridConfig::default(),
            supply: 0,
        }
    }

    fn place(&mut self, pos: BlockPos, device: Arc<dyn EnergyHandler>) {
        if device.capabilities().can_extract {
            self.supply += device.stored();
        }
        self.world.place_device(pos, device.clone());
        self.devices.push(device);
    }

    /// Total stored energy in primary units, secondary valued losslessly.
    pub fn stored_total(&self) -> i64 {
        self.devices.iter().map(|d| d.stored()).sum()
    }
}

fn pos(x: i32, z: i32) -> BlockPos {
    BlockPos::new(x, 64, z)
}

fn random_tier(rng: &mut ChaCha8Rng) -> TransmissionTier {
    TransmissionTier::ALL[rng.gen_range(0..TransmissionTier::ALL.len())]
}

fn hybrid(policy: PriorityPolicy, primary: i64, secondary: Decimal) -> Arc<dyn EnergyHandler> {
    let mut storage = HybridStorage::new(
        EnergyCell::symmetric(10_000, 2_000),
        EnergyCell::symmetric(dec!(25000), dec!(5000)),
        ExchangeRate::default(),
    )
    .with_policy(policy);
    storage.set_stored(primary, secondary);
    Arc::new(SharedHybridStorage::new(storage))
}

// ─── Layouts ────────────────────────────────────────────────────────────────

/// Two full producers feeding one consumer over single copper segments.
fn twin_copper(_rng: &mut ChaCha8Rng) -> GridSetup {
    let mut setup = GridSetup::new();
    setup.place(pos(0, 0), Arc::new(BasicStorage::producer(1000, 1000, 1000)));
    setup.world.place_cable(pos(1, 0), TransmissionTier::COPPER);
    setup.place(pos(2, 0), Arc::new(BasicStorage::consumer(1500, 1500)));
    setup.world.place_cable(pos(3, 0), TransmissionTier::COPPER);
    setup.place(pos(4, 0), Arc::new(BasicStorage::producer(1000, 1000, 1000)));
    setup.anchors.push(pos(0, 0));
    setup
}

/// Hub consumer with random spokes of random tiers and lengths.
fn random_star(rng: &mut ChaCha8Rng) -> GridSetup {
    let mut setup = GridSetup::new();
    let hub = pos(0, 0);
    setup.place(hub, Arc::new(BasicStorage::battery(200_000, 50_000, 0)));
    setup.anchors.push(hub);

    let directions = [(1, 0), (-1, 0), (0, 1), (0, -1)];
    for (dx, dz) in directions {
        let length = rng.gen_range(2..12);
        let tier = random_tier(rng);
        let end = pos(dx * length, dz * length);
        setup.world.lay_cable(hub, end, tier);
        let stored = rng.gen_range(1_000..20_000);
        let device: Arc<dyn EnergyHandler> = if rng.gen_bool(0.75) {
            Arc::new(BasicStorage::producer(20_000, rng.gen_range(100..4_000), stored))
        } else {
            Arc::new(BasicStorage::consumer(20_000, rng.gen_range(100..4_000)))
        };
        setup.place(end, device);
    }
    setup
}

/// Pairs of hybrid banks trading in the secondary currency.
fn hybrid_banks(rng: &mut ChaCha8Rng) -> GridSetup {
    let mut setup = GridSetup::new();
    for i in 0..4 {
        let x = i * 10;
        let full = Decimal::from(rng.gen_range(5_000..25_000));
        setup.place(pos(x, 0), hybrid(PriorityPolicy::SecondaryFirst, 0, full));
        setup.world.lay_cable(pos(x, 0), pos(x + 4, 0), TransmissionTier::GOLD);
        setup.place(pos(x + 4, 0), hybrid(PriorityPolicy::Optimized, 0, Decimal::ZERO));
        setup.anchors.push(pos(x, 0));
    }
    setup
}

/// Frayed line whose overload threshold sits below its rate.
fn frayed_line(rng: &mut ChaCha8Rng) -> GridSetup {
    let frayed = TransmissionTier {
        name: "frayed",
        transfer_rate: 512,
        loss_fraction: 0.05,
        overload_threshold: Some(256),
    };
    let mut setup = GridSetup::new();
    let length = rng.gen_range(3..8);
    setup.place(pos(0, 0), Arc::new(BasicStorage::producer(50_000, 5_000, 50_000)));
    setup.world.lay_cable(pos(0, 0), pos(length, 0), frayed);
    setup.place(pos(length, 0), Arc::new(BasicStorage::consumer(50_000, 5_000)));
    setup.anchors.push(pos(0, 0));
    setup
}

/// Many independent networks to exercise the scheduler fan-out.
fn district(rng: &mut ChaCha8Rng) -> GridSetup {
    let mut setup = GridSetup::new();
    for i in 0..24 {
        let z = i * 8;
        let tier = random_tier(rng);
        setup.place(pos(0, z), Arc::new(BasicStorage::producer(10_000, 2_000, rng.gen_range(2_000..10_000))));
        setup.world.lay_cable(pos(0, z), pos(6, z), tier);
        setup.place(pos(6, z), Arc::new(BasicStorage::consumer(10_000, 2_000)));
        setup.place(pos(1, z + 1), Arc::new(BasicStorage::consumer(5_000, 500)));
        setup.anchors.push(pos(0, z));
    }
    setup.config.registry.per_network_budget_ms = 20;
    setup
}

// ─── Registry ───────────────────────────────────────────────────────────────

pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "TWIN_COPPER",
            label: "Two producers over copper",
            category: "baseline",
            cycles: 10,
            build: twin_copper,
            criteria: PassCriteria {
                min_delivered_fraction: Some(0.74),
                max_loss_pct: Some(2.5),
                ..PassCriteria::default()
            },
        },
        Scenario {
            name: "RANDOM_STAR",
            label: "Random tiered star",
            category: "topology",
            cycles: 60,
            build: random_star,
            criteria: PassCriteria {
                max_loss_pct: Some(20.0),
                ..PassCriteria::default()
            },
        },
        Scenario {
            name: "HYBRID_BANKS",
            label: "Hybrid banks, secondary lane",
            category: "currency",
            cycles: 40,
            build: hybrid_banks,
            criteria: PassCriteria {
                // Secondary amounts are valued per device, truncated.
                max_conservation_error: 8.0,
                min_delivered_fraction: Some(0.10),
                ..PassCriteria::default()
            },
        },
        Scenario {
            name: "FRAYED_LINE",
            label: "Overload reporting",
            category: "tiers",
            cycles: 20,
            build: frayed_line,
            criteria: PassCriteria {
                require_overload_report: true,
                ..PassCriteria::default()
            },
        },
        Scenario {
            name: "DISTRICT",
            label: "24 networks, scheduler fan-out",
            category: "scale",
            cycles: 30,
            build: district,
            criteria: PassCriteria::default(),
        },
    ]
}
