//! World storage seen by the pipeline.
//!
//! The pipeline only needs per-cell reads and writes on the main loop and a
//! thread-safe "is this region loaded" query for the planning workers.
//! [`MemoryWorld`] is a self-contained implementation used by the demo
//! server, tests and benches.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use bevy::prelude::Resource;
use dashmap::DashSet;
use reroll_schema::{CellPos, CellTypeId, RegionKey, VerticalBounds};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorldAccessError {
    #[error("cell {pos} is outside the world bounds")]
    OutOfBounds { pos: CellPos },
    #[error("write to {pos} rejected: {reason}")]
    Rejected { pos: CellPos, reason: String },
}

/// Read-only loaded-state query, safe to call from any thread.
pub trait ChunkLoadView: Send + Sync {
    fn is_region_loaded(&self, region: RegionKey) -> bool;
}

/// Cell grid owned by the main loop.
pub trait CellStore: Send + Sync {
    /// Current cell type, or `None` when the position is not loaded.
    fn cell(&self, pos: CellPos) -> Option<CellTypeId>;

    fn set_cell(&mut self, pos: CellPos, cell: &CellTypeId) -> Result<(), WorldAccessError>;

    fn vertical_bounds(&self) -> VerticalBounds;

    /// Handle the planning workers use to check loaded state.
    fn load_view(&self) -> Arc<dyn ChunkLoadView>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// The world storage installed in the app.
#[derive(Resource)]
pub struct WorldStore(pub Box<dyn CellStore>);

impl WorldStore {
    pub fn new(store: impl CellStore + 'static) -> Self {
        Self(Box::new(store))
    }

    pub fn store(&self) -> &dyn CellStore {
        self.0.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn CellStore {
        self.0.as_mut()
    }

    pub fn downcast_ref<T: CellStore + 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: CellStore + 'static>(&mut self) -> Option<&mut T> {
        self.0.as_any_mut().downcast_mut::<T>()
    }
}

/// Shared set of loaded regions.
#[derive(Debug, Clone, Default)]
pub struct LoadedRegions(Arc<DashSet<RegionKey>>);

impl ChunkLoadView for LoadedRegions {
    fn is_region_loaded(&self, region: RegionKey) -> bool {
        self.0.contains(&region)
    }
}

/// In-memory cell grid stored as palette-indexed region columns.
#[derive(Debug)]
pub struct MemoryWorld {
    region_size: u32,
    bounds: VerticalBounds,
    palette: Vec<CellTypeId>,
    palette_index: HashMap<CellTypeId, u16>,
    columns: HashMap<RegionKey, Vec<u16>>,
    loaded: LoadedRegions,
}

impl MemoryWorld {
    pub fn new(region_size: u32, bounds: VerticalBounds) -> Self {
        Self {
            region_size: region_size.max(1),
            bounds,
            palette: Vec::new(),
            palette_index: HashMap::new(),
            columns: HashMap::new(),
            loaded: LoadedRegions::default(),
        }
    }

    pub fn region_size(&self) -> u32 {
        self.region_size
    }

    /// Cells in one region column.
    pub fn column_volume(&self) -> usize {
        (self.region_size * self.region_size) as usize * self.bounds.height() as usize
    }

    /// Load (or reload) a region filled entirely with `fill`.
    pub fn load_region(&mut self, region: RegionKey, fill: &CellTypeId) -> Result<(), WorldAccessError> {
        let pos = CellPos::new(
            region.min_x(self.region_size),
            self.bounds.bottom,
            region.min_z(self.region_size),
        );
        let index = self.palette_slot(fill, pos)?;
        self.columns.insert(region, vec![index; self.column_volume()]);
        self.loaded.0.insert(region);
        Ok(())
    }

    pub fn unload_region(&mut self, region: RegionKey) -> bool {
        self.loaded.0.remove(&region);
        self.columns.remove(&region).is_some()
    }

    pub fn is_loaded(&self, region: RegionKey) -> bool {
        self.loaded.is_region_loaded(region)
    }

    /// Overwrite every cell at height `y` inside a loaded region.
    pub fn fill_layer(
        &mut self,
        region: RegionKey,
        y: i32,
        cell: &CellTypeId,
    ) -> Result<(), WorldAccessError> {
        let min_x = region.min_x(self.region_size);
        let min_z = region.min_z(self.region_size);
        for x in min_x..=region.max_x(self.region_size) {
            for z in min_z..=region.max_z(self.region_size) {
                self.set_cell(CellPos::new(x, y, z), cell)?;
            }
        }
        Ok(())
    }

    /// Number of cells of type `cell` in a loaded region.
    pub fn count_in_region(&self, region: RegionKey, cell: &CellTypeId) -> usize {
        let (Some(column), Some(&index)) = (self.columns.get(&region), self.palette_index.get(cell))
        else {
            return 0;
        };
        column.iter().filter(|&&slot| slot == index).count()
    }

    /// Every cell type in a loaded region, in storage order.
    pub fn region_cells(&self, region: RegionKey) -> Option<Vec<CellTypeId>> {
        self.columns.get(&region).map(|column| {
            column
                .iter()
                .map(|&slot| self.palette[slot as usize].clone())
                .collect()
        })
    }

    fn palette_slot(&mut self, cell: &CellTypeId, pos: CellPos) -> Result<u16, WorldAccessError> {
        if let Some(&index) = self.palette_index.get(cell) {
            return Ok(index);
        }
        let index = u16::try_from(self.palette.len()).map_err(|_| WorldAccessError::Rejected {
            pos,
            reason: "cell palette is full".to_string(),
        })?;
        self.palette.push(cell.clone());
        self.palette_index.insert(cell.clone(), index);
        Ok(index)
    }

    fn locate(&self, pos: CellPos) -> Option<(RegionKey, usize)> {
        if !self.bounds.contains(pos.y) {
            return None;
        }
        let size = self.region_size as i32;
        let region = RegionKey::of_cell(pos, self.region_size);
        let local_x = pos.x.rem_euclid(size) as usize;
        let local_z = pos.z.rem_euclid(size) as usize;
        let layer = (pos.y - self.bounds.bottom) as usize;
        let size = self.region_size as usize;
        Some((region, (layer * size + local_z) * size + local_x))
    }
}

impl CellStore for MemoryWorld {
    fn cell(&self, pos: CellPos) -> Option<CellTypeId> {
        let (region, offset) = self.locate(pos)?;
        let slot = *self.columns.get(&region)?.get(offset)?;
        self.palette.get(slot as usize).cloned()
    }

    fn set_cell(&mut self, pos: CellPos, cell: &CellTypeId) -> Result<(), WorldAccessError> {
        let (region, offset) = self
            .locate(pos)
            .ok_or(WorldAccessError::OutOfBounds { pos })?;
        if !self.columns.contains_key(&region) {
            return Ok(());
        }
        let index = self.palette_slot(cell, pos)?;
        if let Some(slot) = self
            .columns
            .get_mut(&region)
            .and_then(|column| column.get_mut(offset))
        {
            *slot = index;
        }
        Ok(())
    }

    fn vertical_bounds(&self) -> VerticalBounds {
        self.bounds
    }

    fn load_view(&self) -> Arc<dyn ChunkLoadView> {
        Arc::new(self.loaded.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> CellTypeId {
        raw.parse().unwrap()
    }

    #[test]
    fn unloaded_reads_are_none_and_writes_are_ignored() {
        let mut world = MemoryWorld::new(16, VerticalBounds::new(0, 8));
        let pos = CellPos::new(3, 2, 3);
        assert_eq!(world.cell(pos), None);
        assert_eq!(world.set_cell(pos, &id("base:stone")), Ok(()));
        assert_eq!(world.cell(pos), None);
    }

    #[test]
    fn reads_back_writes_in_negative_regions() {
        let mut world = MemoryWorld::new(16, VerticalBounds::new(-4, 4));
        let region = RegionKey::new(-1, -1);
        world.load_region(region, &id("base:dirt")).unwrap();

        let pos = CellPos::new(-1, -4, -16);
        assert_eq!(world.cell(pos), Some(id("base:dirt")));
        world.set_cell(pos, &id("base:stone")).unwrap();
        assert_eq!(world.cell(pos), Some(id("base:stone")));
        assert_eq!(world.cell(CellPos::new(-2, -4, -16)), Some(id("base:dirt")));
        assert_eq!(world.count_in_region(region, &id("base:stone")), 1);
        assert_eq!(world.count_in_region(region, &id("base:dirt")), 16 * 16 * 8 - 1);
    }

    #[test]
    fn vertical_bounds_are_enforced() {
        let mut world = MemoryWorld::new(4, VerticalBounds::new(0, 4));
        world.load_region(RegionKey::new(0, 0), &id("base:dirt")).unwrap();
        assert_eq!(world.cell(CellPos::new(0, 4, 0)), None);
        assert_eq!(
            world.set_cell(CellPos::new(0, -1, 0), &id("base:stone")),
            Err(WorldAccessError::OutOfBounds {
                pos: CellPos::new(0, -1, 0)
            })
        );
    }

    #[test]
    fn load_view_tracks_load_and_unload() {
        let mut world = MemoryWorld::new(16, VerticalBounds::new(0, 2));
        let view = world.load_view();
        let region = RegionKey::new(2, 3);
        assert!(!view.is_region_loaded(region));
        world.load_region(region, &id("base:air")).unwrap();
        assert!(view.is_region_loaded(region));
        assert!(world.unload_region(region));
        assert!(!view.is_region_loaded(region));
        assert!(!world.unload_region(region));
    }

    #[test]
    fn fill_layer_covers_whole_region_slice() {
        let mut world = MemoryWorld::new(4, VerticalBounds::new(0, 3));
        let region = RegionKey::new(1, 0);
        world.load_region(region, &id("base:air")).unwrap();
        world.fill_layer(region, 0, &id("base:bedrock")).unwrap();
        assert_eq!(world.count_in_region(region, &id("base:bedrock")), 16);
        assert_eq!(world.cell(CellPos::new(7, 0, 3)), Some(id("base:bedrock")));
        assert_eq!(world.cell(CellPos::new(7, 1, 3)), Some(id("base:air")));
    }

    #[test]
    fn world_store_downcasts_to_memory_world() {
        let mut store = WorldStore::new(MemoryWorld::new(8, VerticalBounds::new(0, 1)));
        assert!(store.downcast_mut::<MemoryWorld>().is_some());
        assert_eq!(store.store().vertical_bounds(), VerticalBounds::new(0, 1));
    }
}
