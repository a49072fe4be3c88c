//! Region reroll pipeline.
//!
//! Tracks agents moving through a region grid, and the first time an agent
//! enters a region, plans a replacement cell type off the main loop and
//! rewrites that region on a later tick. [`run_tick`] advances the pipeline
//! by exactly one tick.

pub mod apply_queue;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
mod hashing;
pub mod log_stream;
pub mod membership;
pub mod metrics;
pub mod mutator;
pub mod planner;
pub mod status;
pub mod world;

use std::sync::Arc;

use bevy::prelude::*;

pub use apply_queue::{ApplyQueue, ApplyQueueProducer, MutationTask};
pub use catalog::{
    load_catalog_from_env, CatalogError, CatalogHandle, CellCatalog, CellClass, CellTags,
};
pub use config::{
    load_pipeline_config_from_env, PipelineConfig, PipelineConfigError, PipelineConfigHandle,
};
pub use coordinator::{AgentDisconnected, RegionTick, TrackedAgent};
pub use dispatcher::{DispatchError, DispatchStats, PlanContext, PlanDispatcher, PlanSkip};
pub use hashing::planning_seed;
pub use membership::VisitMembership;
pub use metrics::PipelineMetrics;
pub use mutator::{MutationError, MutationReport, RegionMutator};
pub use status::{
    completion_notice, processing_notice, ChannelStatusSink, StatusSink, TracingStatusSink,
};
pub use world::{CellStore, ChunkLoadView, MemoryWorld, WorldAccessError, WorldStore};

/// Collaborators handed to [`build_region_app`].
pub struct RegionAppSetup {
    pub catalog: Arc<CellCatalog>,
    pub config: Arc<PipelineConfig>,
    pub world: WorldStore,
    pub sink: Arc<dyn StatusSink>,
}

impl RegionAppSetup {
    /// Builtin catalog and config, notices go to the log.
    pub fn new(world: impl CellStore + 'static) -> Self {
        Self {
            catalog: CellCatalog::builtin(),
            config: PipelineConfig::builtin(),
            world: WorldStore::new(world),
            sink: Arc::new(TracingStatusSink),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<CellCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_config(mut self, config: Arc<PipelineConfig>) -> Self {
        self.config = config;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }
}

/// Construct a Bevy [`App`] running the region reroll pipeline.
///
/// Spawns the planning workers immediately. The world store's region size is
/// expected to match `config.region_size()`.
pub fn build_region_app(setup: RegionAppSetup) -> Result<App, DispatchError> {
    let RegionAppSetup {
        catalog,
        config,
        world,
        sink,
    } = setup;

    let queue = ApplyQueue::new();
    let dispatcher = PlanDispatcher::spawn(
        config.worker_count(),
        config.world_seed(),
        PlanContext {
            catalog: Arc::clone(&catalog),
            loaded: world.store().load_view(),
            queue: queue.producer(),
            sink: Arc::clone(&sink),
        },
    )?;
    let mutator = RegionMutator::new(config.region_size(), Arc::clone(&catalog), sink);

    let mut app = App::new();
    app.insert_resource(CatalogHandle::new(catalog))
        .insert_resource(PipelineConfigHandle::new(config))
        .insert_resource(VisitMembership::new())
        .insert_resource(dispatcher)
        .insert_resource(queue)
        .insert_resource(mutator)
        .insert_resource(world)
        .insert_resource(RegionTick::default())
        .insert_resource(PipelineMetrics::default())
        .add_plugins(MinimalPlugins)
        .add_event::<AgentDisconnected>()
        .add_systems(
            Update,
            (
                coordinator::clear_disconnected_agents,
                coordinator::apply_pending_mutation,
                coordinator::detect_region_visits,
                coordinator::advance_tick,
                metrics::collect_metrics,
            )
                .chain(),
        );

    Ok(app)
}

/// Execute a single tick.
///
/// Runs the chained systems configured in [`build_region_app`]
/// (disconnects → one apply → visit detection → tick increment → metrics).
/// The apply runs before visit detection, so a region entered on tick `n` is
/// applied no earlier than tick `n + 1`, however fast planning finishes.
pub fn run_tick(app: &mut App) {
    app.update();
}
