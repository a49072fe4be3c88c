use rand::seq::SliceRandom;
use rand::Rng;
use reroll_schema::CellTypeId;

use crate::catalog::CellCatalog;

/// Pick the replacement cell type for a region.
///
/// Draws uniformly from the catalog's Normal types. Returns `None` when
/// every known type is Excluded or Preserved.
pub fn plan<R: Rng + ?Sized>(catalog: &CellCatalog, rng: &mut R) -> Option<CellTypeId> {
    catalog.replacement_candidates().choose(rng).cloned()
}
