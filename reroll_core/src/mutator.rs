use std::sync::Arc;

use bevy::prelude::Resource;
use reroll_schema::{CellPos, CellTypeId, RegionKey};
use thiserror::Error;
use tracing::{info, warn};

use crate::apply_queue::MutationTask;
use crate::catalog::CellCatalog;
use crate::status::{completion_notice, StatusSink};
use crate::world::{CellStore, WorldAccessError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationReport {
    pub region: RegionKey,
    pub cell_type: CellTypeId,
    pub replaced: u64,
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("write failed in region {region} after {replaced} cells: {source}")]
    WriteFailed {
        region: RegionKey,
        replaced: u64,
        #[source]
        source: WorldAccessError,
    },
}

/// Applies mutation tasks to the world. Main loop only.
#[derive(Resource, Clone)]
pub struct RegionMutator {
    region_size: u32,
    catalog: Arc<CellCatalog>,
    sink: Arc<dyn StatusSink>,
}

impl RegionMutator {
    pub fn new(region_size: u32, catalog: Arc<CellCatalog>, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            region_size: region_size.max(1),
            catalog,
            sink,
        }
    }

    /// Overwrite every non-preserved cell in the task's region column.
    ///
    /// Visits `region_size² × world height` positions on every call. Cells the
    /// world reports as unloaded are skipped. The first failed write aborts
    /// the task.
    pub fn apply(
        &self,
        task: MutationTask,
        world: &mut dyn CellStore,
    ) -> Result<MutationReport, MutationError> {
        let MutationTask { region, cell_type } = task;
        let bounds = world.vertical_bounds();
        let mut replaced = 0u64;

        for x in region.min_x(self.region_size)..=region.max_x(self.region_size) {
            for z in region.min_z(self.region_size)..=region.max_z(self.region_size) {
                for y in bounds.bottom..bounds.top {
                    let pos = CellPos::new(x, y, z);
                    match world.cell(pos) {
                        Some(current) if !self.catalog.is_preserved(&current) => {}
                        _ => continue,
                    }
                    if let Err(source) = world.set_cell(pos, &cell_type) {
                        warn!(
                            target: "reroll::mutator",
                            %region,
                            %pos,
                            replaced,
                            error = %source,
                            "mutation.aborted"
                        );
                        return Err(MutationError::WriteFailed {
                            region,
                            replaced,
                            source,
                        });
                    }
                    replaced += 1;
                }
            }
        }

        info!(
            target: "reroll::mutator",
            %region,
            cell_type = %cell_type,
            replaced,
            "mutation.applied"
        );
        self.sink.emit(completion_notice(region, replaced, &cell_type));

        Ok(MutationReport {
            region,
            cell_type,
            replaced,
        })
    }
}
