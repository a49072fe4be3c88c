#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::Duration;

use bevy::prelude::*;
use crossbeam_channel::Receiver;
use reroll_core::{
    build_region_app, load_catalog_from_env, load_pipeline_config_from_env, run_tick,
    AgentDisconnected, ChannelStatusSink, MemoryWorld, PipelineMetrics, PlanDispatcher,
    RegionAppSetup, TrackedAgent, WorldStore,
};
use reroll_schema::{AgentId, CellTypeId, RegionKey, VerticalBounds};

static INIT: Once = Once::new();

pub const REGION_SIZE: u32 = 16;
pub const BOUNDS: VerticalBounds = VerticalBounds::new(0, 32);
/// Cells per region that the fixture terrain leaves overwritable.
pub const MUTABLE_CELLS: usize = (REGION_SIZE * REGION_SIZE) as usize * (32 - 2);

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let fixtures = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures");
        let config_path = fixtures.join("test_pipeline_config.json");
        let catalog_path = fixtures.join("test_cell_catalog.json");

        debug_assert!(
            config_path.exists(),
            "missing test pipeline config at {}",
            config_path.display()
        );
        debug_assert!(
            catalog_path.exists(),
            "missing test cell catalog at {}",
            catalog_path.display()
        );

        std::env::set_var("REROLL_PIPELINE_CONFIG_PATH", &config_path);
        std::env::set_var("REROLL_CATALOG_PATH", &catalog_path);
    });
}

pub fn cell(raw: &str) -> CellTypeId {
    raw.parse().expect("valid cell type id")
}

/// Bedrock floor, stone body, air ceiling.
pub fn seed_region(world: &mut MemoryWorld, region: RegionKey) {
    world.load_region(region, &cell("test:stone")).unwrap();
    world
        .fill_layer(region, BOUNDS.bottom, &cell("test:bedrock"))
        .unwrap();
    world
        .fill_layer(region, BOUNDS.top - 1, &cell("test:air"))
        .unwrap();
}

/// A pipeline app over a small in-memory world, with notices captured.
pub struct Harness {
    pub app: App,
    pub notices: Receiver<String>,
}

impl Harness {
    /// Fixture config and catalog; regions `[-2, 2]²` are loaded.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_loaded(
            (-2..=2)
                .flat_map(|x| (-2..=2).map(move |z| RegionKey::new(x, z)))
                .collect::<Vec<_>>()
                .as_slice(),
        )
    }

    pub fn with_loaded(regions: &[RegionKey]) -> anyhow::Result<Self> {
        ensure_test_config();
        let config = load_pipeline_config_from_env();
        let (catalog, _) = load_catalog_from_env();

        let mut world = MemoryWorld::new(config.region_size(), BOUNDS);
        for region in regions {
            seed_region(&mut world, *region);
        }

        let (sink, notices) = ChannelStatusSink::new();
        let app = build_region_app(
            RegionAppSetup::new(world)
                .with_config(config)
                .with_catalog(catalog)
                .with_sink(Arc::new(sink)),
        )?;
        Ok(Self { app, notices })
    }

    pub fn spawn_agent(&mut self, id: u64, x: f64, z: f64) -> Entity {
        self.app
            .world
            .spawn(TrackedAgent::new(AgentId(id), x, z))
            .id()
    }

    pub fn agent_mut(&mut self, entity: Entity) -> Mut<'_, TrackedAgent> {
        self.app
            .world
            .get_mut::<TrackedAgent>(entity)
            .expect("tracked agent exists")
    }

    pub fn disconnect(&mut self, entity: Entity) {
        let id = self.agent_mut(entity).id;
        self.app.world.despawn(entity);
        self.app.world.send_event(AgentDisconnected(id));
    }

    pub fn tick(&mut self) {
        run_tick(&mut self.app);
    }

    /// Wait for the planning workers to drain.
    pub fn settle(&self) {
        assert!(
            self.app
                .world
                .resource::<PlanDispatcher>()
                .wait_until_idle(Duration::from_secs(5)),
            "planning workers did not go idle"
        );
    }

    pub fn tick_and_settle(&mut self) {
        self.tick();
        self.settle();
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.app.world.resource::<PipelineMetrics>().clone()
    }

    pub fn world(&self) -> &MemoryWorld {
        self.app
            .world
            .resource::<WorldStore>()
            .downcast_ref::<MemoryWorld>()
            .expect("harness world is a MemoryWorld")
    }

    pub fn world_mut(&mut self) -> Mut<'_, WorldStore> {
        self.app.world.resource_mut::<WorldStore>()
    }

    pub fn drain_notices(&self) -> Vec<String> {
        self.notices.try_iter().collect()
    }
}
