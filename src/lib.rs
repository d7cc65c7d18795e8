// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Grid Engine: energy distribution over block-world networks

pub mod types;
pub mod currency;
pub mod config;
pub mod storage;
pub mod persistence;
pub mod tier;
pub mod world;
pub mod grid;
pub mod topology;
pub mod conservation;
pub mod network;
pub mod engine;
pub mod registry;
pub mod adapter;

pub use config::{ConfigError, EngineConfig, GridConfig, RegistryConfig, ScanConfig, StorageTuning};
pub use currency::{CurrencyError, ExchangeRate, Quantity};
pub use engine::{CancelFlag, DistributionEngine, EngineError, EngineState, TransferRequest};
pub use grid::GridWorld;
pub use network::{CycleReport, Network, NetworkSnapshot, NetworkStats, NodeView, SegmentLoad};
pub use persistence::{HybridStorageRecord, PersistenceError};
pub use registry::{NetworkRegistry, RegistryError, UpdateReport};
pub use storage::{
    BasicStorage, EnergyCell, EnergyHandler, HybridStorage, PriorityPolicy, SharedHybridStorage,
};
pub use tier::TransmissionTier;
pub use topology::{Edge, Node, Topology, TopologyBuilder, TopologyError};
pub use types::*;
pub use world::{PathFinder, SpatialWorld, WorldError, WorldHandle};
