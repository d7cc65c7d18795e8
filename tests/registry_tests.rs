#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use grid_engine::*;

    const DIM: &str = "overworld";

    fn pos(x: i32, z: i32) -> BlockPos {
        BlockPos::new(x, 64, z)
    }

    fn registry_with(world: &Arc<GridWorld>, config: GridConfig) -> NetworkRegistry {
        let registry = NetworkRegistry::new(config);
        registry.register_world(DIM, WorldHandle::shared(world.clone()));
        registry
    }

    /// Producer at `x`, consumer two blocks east over copper.
    fn place_pair(world: &GridWorld, x: i32, z: i32) -> (Arc<BasicStorage>, Arc<BasicStorage>) {
        let producer = Arc::new(BasicStorage::producer(5_000, 1_000, 5_000));
        let consumer = Arc::new(BasicStorage::consumer(5_000, 1_000));
        world.place_device(pos(x, z), producer.clone());
        world.place_cable(pos(x + 1, z), TransmissionTier::COPPER);
        world.place_device(pos(x + 2, z), consumer.clone());
        (producer, consumer)
    }

    /// Producer whose committed extracts take wall-clock time.
    struct Sluggish {
        inner: BasicStorage,
        delay: Duration,
    }

    impl EnergyHandler for Sluggish {
        fn capabilities(&self) -> Capabilities { self.inner.capabilities() }
        fn stored(&self) -> i64 { self.inner.stored() }
        fn capacity(&self) -> i64 { self.inner.capacity() }
        fn receive(&self, amount: i64, simulate: bool) -> i64 { self.inner.receive(amount, simulate) }
        fn extract(&self, amount: i64, simulate: bool) -> i64 {
            if !simulate {
                std::thread::sleep(self.delay);
            }
            self.inner.extract(amount, simulate)
        }
    }

    struct Faulty;

    impl EnergyHandler for Faulty {
        fn capabilities(&self) -> Capabilities { Capabilities { can_receive: false, can_extract: true } }
        fn stored(&self) -> i64 { 1_000 }
        fn capacity(&self) -> i64 { 1_000 }
        fn receive(&self, _amount: i64, _simulate: bool) -> i64 { 0 }
        fn extract(&self, amount: i64, simulate: bool) -> i64 {
            if !simulate {
                panic!("capacitor burst");
            }
            amount.min(1_000)
        }
    }

    // ========== Network Lifecycle ==========

    #[tokio::test]
    async fn test_get_or_create_scans_once() {
        let world = Arc::new(GridWorld::new());
        place_pair(&world, 0, 0);
        let registry = registry_with(&world, GridConfig::default());
        let key = NetworkKey::new(pos(0, 0), DIM);

        let first = registry.get_or_create(&key).expect("test: created");
        assert_eq!(first.nodes.len(), 2);
        assert!(!first.dirty);

        let second = registry.get_or_create(&key).expect("test: cached");
        assert_eq!(registry.len(), 1);
        assert_eq!(first.nodes, second.nodes);
    }

    #[tokio::test]
    async fn test_unknown_dimension_and_missing_anchor_are_rejected() {
        let world = Arc::new(GridWorld::new());
        let registry = registry_with(&world, GridConfig::default());

        let err = registry
            .get_or_create(&NetworkKey::new(pos(0, 0), "the_end"))
            .expect_err("test: no such dimension");
        assert!(matches!(err, RegistryError::UnknownDimension(_)));

        let err = registry
            .get_or_create(&NetworkKey::new(pos(0, 0), DIM))
            .expect_err("test: nothing at anchor");
        assert!(matches!(err, RegistryError::Engine { source: EngineError::Topology(_), .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_remove_network_evicts_without_touching_devices() {
        let world = Arc::new(GridWorld::new());
        let (producer, _consumer) = place_pair(&world, 0, 0);
        let registry = registry_with(&world, GridConfig::default());
        let key = NetworkKey::new(pos(0, 0), DIM);
        registry.get_or_create(&key).expect("test: created");

        assert!(registry.remove_network(&key));
        assert!(!registry.remove_network(&key));
        assert!(registry.snapshot(&key).is_none());

        let report = registry.update_all().await;
        assert_eq!(report.total(), 0);
        assert_eq!(producer.stored(), 5_000);
    }

    // ========== Scheduling ==========

    #[tokio::test]
    async fn test_update_all_runs_every_network_and_advances_clock() {
        let world = Arc::new(GridWorld::new());
        let (_, east) = place_pair(&world, 0, 0);
        let (_, west) = place_pair(&world, 0, 10);
        let registry = registry_with(&world, GridConfig::default());
        let keys = [NetworkKey::new(pos(0, 0), DIM), NetworkKey::new(pos(0, 10), DIM)];
        for key in &keys {
            registry.get_or_create(key).expect("test: created");
        }

        let report = registry.update_all().await;
        assert_eq!(report.now_ms, 50);
        assert_eq!(report.completed.len(), 2);
        assert!(report.failed.is_empty());
        assert!(!report.degraded);
        assert_eq!(east.stored(), 501);
        assert_eq!(west.stored(), 501);

        let report = registry.update_all().await;
        assert_eq!(report.now_ms, 100);
        assert_eq!(registry.now_ms(), 100);

        let snapshot = registry.snapshot(&keys[0]).expect("test: snapshot");
        assert_eq!(snapshot.stats.cycles_completed, 2);
        assert_eq!(snapshot.stats.total_transferred, 1_002);
        assert_eq!(snapshot.taken_at_ms, 100);
    }

    #[tokio::test]
    async fn test_deadline_cancels_between_transfers() {
        let world = Arc::new(GridWorld::new());
        let producer = Arc::new(Sluggish {
            inner: BasicStorage::producer(10_000, 10_000, 10_000),
            delay: Duration::from_millis(40),
        });
        world.place_device(pos(0, 0), producer.clone());
        let consumers: Vec<_> = [(1, 0), (-1, 0), (0, 1), (0, -1)]
            .into_iter()
            .map(|(x, z)| {
                let consumer = Arc::new(BasicStorage::consumer(1_000, 100));
                world.place_device(pos(x, z), consumer.clone());
                consumer
            })
            .collect();

        let mut config = GridConfig::default();
        config.registry.per_network_budget_ms = 5;
        let registry = registry_with(&world, config);
        let key = NetworkKey::new(pos(0, 0), DIM);
        registry.get_or_create(&key).expect("test: created");

        let report = registry.update_all().await;
        assert!(report.degraded);
        assert_eq!(report.cancelled, vec![key.clone()]);

        // Whatever committed before cancellation stays committed.
        let received: i64 = consumers.iter().map(|c| c.stored()).sum();
        assert!(received < 400, "received {received}");
        assert_eq!(producer.stored(), 10_000 - received);

        let snapshot = registry.snapshot(&key).expect("test: snapshot");
        assert!(snapshot.stats.last_cycle.cancelled);
        assert_eq!(snapshot.stats.cycles_cancelled, 1);
        assert!(snapshot.edges.iter().all(|e| e.current_load == 0.0));
    }

    #[tokio::test]
    async fn test_panicking_device_fails_only_its_network() {
        let world = Arc::new(GridWorld::new());
        world.place_device(pos(0, 0), Arc::new(Faulty));
        world.place_device(pos(1, 0), Arc::new(BasicStorage::consumer(1_000, 100)));
        let (_, consumer) = place_pair(&world, 0, 10);

        let registry = registry_with(&world, GridConfig::default());
        let faulty = NetworkKey::new(pos(0, 0), DIM);
        let healthy = NetworkKey::new(pos(0, 10), DIM);
        registry.get_or_create(&faulty).expect("test: created");
        registry.get_or_create(&healthy).expect("test: created");

        let report = registry.update_all().await;
        assert_eq!(report.completed, vec![healthy.clone()]);
        assert_eq!(report.failed.len(), 1);
        let (key, reason) = &report.failed[0];
        assert_eq!(key, &faulty);
        assert!(reason.contains("capacitor burst"), "reason: {reason}");
        assert_eq!(consumer.stored(), 501);

        let snapshot = registry.snapshot(&faulty).expect("test: snapshot");
        assert!(snapshot.dirty);
        assert_eq!(snapshot.stats.cycles_failed, 1);
    }

    // ========== Change Events ==========

    #[tokio::test]
    async fn test_block_change_triggers_rescan() {
        let world = Arc::new(GridWorld::new());
        place_pair(&world, 0, 0);
        place_pair(&world, 0, 20);
        let registry = registry_with(&world, GridConfig::default());
        let key = NetworkKey::new(pos(0, 0), DIM);
        registry.get_or_create(&key).expect("test: created");
        registry.get_or_create(&NetworkKey::new(pos(0, 20), DIM)).expect("test: created");

        registry.update_all().await;
        let snapshot = registry.snapshot(&key).expect("test: snapshot");
        assert!(!snapshot.stats.last_cycle.rescanned);

        let added = pos(2, 1);
        world.place_device(added, Arc::new(BasicStorage::consumer(1_000, 100)));
        assert_eq!(registry.on_block_changed(&DimensionId::from(DIM), added), 1);
        assert_eq!(registry.on_block_changed(&DimensionId::from("the_nether"), added), 0);

        registry.update_all().await;
        let snapshot = registry.snapshot(&key).expect("test: snapshot");
        assert!(snapshot.stats.last_cycle.rescanned);
        assert!(snapshot.node(added).is_some());
    }

    #[tokio::test]
    async fn test_device_at_open_cable_end_joins_network() {
        let world = Arc::new(GridWorld::new());
        world.place_device(pos(0, 0), Arc::new(BasicStorage::producer(5_000, 1_000, 5_000)));
        world.lay_cable(pos(0, 0), pos(4, 0), TransmissionTier::COPPER);
        let registry = registry_with(&world, GridConfig::default());
        let key = NetworkKey::new(pos(0, 0), DIM);
        let created = registry.get_or_create(&key).expect("test: created");
        assert_eq!(created.nodes.len(), 1);
        assert!(created.edges.is_empty());
        assert!(created.reach.contains(&pos(3, 0)));

        let consumer = Arc::new(BasicStorage::consumer(5_000, 1_000));
        world.place_device(pos(4, 0), consumer.clone());
        assert_eq!(registry.on_block_changed(&DimensionId::from(DIM), pos(4, 0)), 1);

        registry.update_all().await;
        let snapshot = registry.snapshot(&key).expect("test: snapshot");
        assert!(snapshot.stats.last_cycle.rescanned);
        assert!(snapshot.node(pos(4, 0)).is_some());
        assert_eq!(snapshot.nodes.len(), 2);
        assert!(consumer.stored() > 0);
    }

    #[tokio::test]
    async fn test_set_priority_is_clamped() {
        let world = Arc::new(GridWorld::new());
        place_pair(&world, 0, 0);
        let registry = registry_with(&world, GridConfig::default());
        let key = NetworkKey::new(pos(0, 0), DIM);
        registry.get_or_create(&key).expect("test: created");

        assert!(registry.set_priority(&key, pos(0, 0), 200).expect("test: known network"));
        let snapshot = registry.snapshot(&key).expect("test: snapshot");
        assert_eq!(snapshot.node(pos(0, 0)).map(|n| n.priority), Some(10));

        assert!(!registry.set_priority(&key, pos(7, 7), 3).expect("test: known network"));
        let err = registry
            .set_priority(&NetworkKey::new(pos(9, 9), DIM), pos(0, 0), 3)
            .expect_err("test: unknown network");
        assert!(matches!(err, RegistryError::UnknownNetwork(_)));
    }
}
