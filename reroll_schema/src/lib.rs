//! Value types shared by the region reroll pipeline and its hosts.
//!
//! Everything here is plain data: cheap to clone, hashable, and
//! serializable so hosts can log or forward it without depending on the
//! runtime in `reroll_core`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Namespace assumed when a cell type id is written without one.
pub const DEFAULT_NAMESPACE: &str = "base";

/// Horizontal tile of the world spanning the full vertical extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionKey {
    pub x: i32,
    pub z: i32,
}

impl RegionKey {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Region containing a horizontal position.
    ///
    /// The position is truncated to whole cells first, then floor-divided by
    /// the region size, so `-0.5` lands in region 0 while `-1.0` lands in -1.
    pub fn containing(x: f64, z: f64, region_size: u32) -> Self {
        let size = region_span(region_size);
        Self {
            x: (x as i32).div_euclid(size),
            z: (z as i32).div_euclid(size),
        }
    }

    /// Region containing an absolute cell position.
    pub fn of_cell(pos: CellPos, region_size: u32) -> Self {
        let size = region_span(region_size);
        Self {
            x: pos.x.div_euclid(size),
            z: pos.z.div_euclid(size),
        }
    }

    /// Lowest x cell in the region, saturated to the `i32` cell range.
    pub fn min_x(&self, region_size: u32) -> i32 {
        region_edge(self.x, region_size, 0)
    }

    pub fn min_z(&self, region_size: u32) -> i32 {
        region_edge(self.z, region_size, 0)
    }

    /// Inclusive upper x bound.
    pub fn max_x(&self, region_size: u32) -> i32 {
        region_edge(self.x, region_size, region_span(region_size) - 1)
    }

    /// Inclusive upper z bound.
    pub fn max_z(&self, region_size: u32) -> i32 {
        region_edge(self.z, region_size, region_span(region_size) - 1)
    }
}

fn region_span(region_size: u32) -> i32 {
    region_size.clamp(1, i32::MAX as u32) as i32
}

/// Edge regions at the ends of the cell range are partial; their bounds are
/// clipped instead of overflowing.
fn region_edge(key: i32, region_size: u32, offset: i32) -> i32 {
    let edge = i64::from(key) * i64::from(region_span(region_size)) + i64::from(offset);
    edge.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}

/// Stable identity of a tracked agent for the lifetime of its session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Absolute cell position in world coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CellPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for CellPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Vertical extent of the world: `bottom` inclusive, `top` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerticalBounds {
    pub bottom: i32,
    pub top: i32,
}

impl VerticalBounds {
    pub const fn new(bottom: i32, top: i32) -> Self {
        Self { bottom, top }
    }

    pub fn height(&self) -> u32 {
        (self.top - self.bottom).max(0) as u32
    }

    pub fn contains(&self, y: i32) -> bool {
        y >= self.bottom && y < self.top
    }
}

/// Whether an agent currently takes part in region visit detection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipationState {
    #[default]
    Participating,
    Observer,
    Creative,
    Mounted,
}

impl ParticipationState {
    pub fn participates(self) -> bool {
        matches!(self, ParticipationState::Participating)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParticipationState::Participating => "participating",
            ParticipationState::Observer => "observer",
            ParticipationState::Creative => "creative",
            ParticipationState::Mounted => "mounted",
        }
    }
}

impl FromStr for ParticipationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "participating" => Ok(Self::Participating),
            "observer" => Ok(Self::Observer),
            "creative" => Ok(Self::Creative),
            "mounted" => Ok(Self::Mounted),
            other => Err(format!("unknown participation state `{other}`")),
        }
    }
}

/// Identifier of one kind of cell, written `namespace:path`.
///
/// Ordering is by namespace, then path, which keeps catalog iteration
/// deterministic.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellTypeId {
    namespace: Arc<str>,
    path: Arc<str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellTypeIdError(pub String);

impl fmt::Display for CellTypeIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cell type id `{}`", self.0)
    }
}

impl std::error::Error for CellTypeIdError {}

impl CellTypeId {
    pub fn new(namespace: &str, path: &str) -> Self {
        Self {
            namespace: Arc::from(namespace),
            path: Arc::from(path),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl FromStr for CellTypeId {
    type Err = CellTypeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, path) = match s.split_once(':') {
            Some((namespace, path)) => (namespace, path),
            None => (DEFAULT_NAMESPACE, s),
        };
        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_-./".contains(c))
        };
        if !valid(namespace) || !valid(path) {
            return Err(CellTypeIdError(s.to_string()));
        }
        Ok(Self::new(namespace, path))
    }
}

impl fmt::Display for CellTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

impl fmt::Debug for CellTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellTypeId({self})")
    }
}

impl Serialize for CellTypeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellTypeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_containing_truncates_then_floors() {
        assert_eq!(RegionKey::containing(0.0, 0.0, 16), RegionKey::new(0, 0));
        assert_eq!(RegionKey::containing(15.9, 31.2, 16), RegionKey::new(0, 1));
        assert_eq!(RegionKey::containing(-0.5, 16.0, 16), RegionKey::new(0, 1));
        assert_eq!(RegionKey::containing(-1.0, -17.0, 16), RegionKey::new(-1, -2));
        assert_eq!(RegionKey::containing(-16.0, -16.9, 16), RegionKey::new(-1, -1));
    }

    #[test]
    fn region_bounds_are_inclusive() {
        let key = RegionKey::new(-1, 2);
        assert_eq!(key.min_x(16), -16);
        assert_eq!(key.max_x(16), -1);
        assert_eq!(key.min_z(16), 32);
        assert_eq!(key.max_z(16), 47);
        assert_eq!(RegionKey::of_cell(CellPos::new(-1, 5, 47), 16), key);
    }

    #[test]
    fn edge_region_bounds_saturate_instead_of_overflowing() {
        let low = RegionKey::containing(-2_147_483_645.0, 0.0, 10);
        assert_eq!(low, RegionKey::new(-214_748_365, 0));
        assert_eq!(low.min_x(10), i32::MIN);
        assert_eq!(low.max_x(10), -2_147_483_641);

        let high = RegionKey::of_cell(CellPos::new(i32::MAX, 0, i32::MAX), 10);
        assert_eq!(high.min_x(10), 2_147_483_640);
        assert_eq!(high.max_x(10), i32::MAX);
        assert_eq!(high.max_z(10), i32::MAX);

        let huge = RegionKey::new(-1, 1);
        assert_eq!(huge.min_x(u32::MAX), -i32::MAX);
        assert_eq!(huge.max_z(u32::MAX), i32::MAX);
    }

    #[test]
    fn cell_type_id_parses_with_default_namespace() {
        let stone: CellTypeId = "stone".parse().unwrap();
        assert_eq!(stone.namespace(), DEFAULT_NAMESPACE);
        assert_eq!(stone.path(), "stone");

        let modded: CellTypeId = "ext:glow_moss".parse().unwrap();
        assert_eq!(modded.to_string(), "ext:glow_moss");

        assert!("Stone".parse::<CellTypeId>().is_err());
        assert!("base:".parse::<CellTypeId>().is_err());
    }

    #[test]
    fn cell_type_id_orders_by_namespace_then_path() {
        let mut ids: Vec<CellTypeId> = ["ext:a", "base:z", "base:b"]
            .iter()
            .map(|raw| raw.parse().unwrap())
            .collect();
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["base:b", "base:z", "ext:a"]);
    }

    #[test]
    fn cell_type_id_serializes_as_string() {
        let id = CellTypeId::new("base", "oak_planks");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"base:oak_planks\"");
        let back: CellTypeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn participation_round_trips_names() {
        for state in [
            ParticipationState::Participating,
            ParticipationState::Observer,
            ParticipationState::Creative,
            ParticipationState::Mounted,
        ] {
            assert_eq!(state.as_str().parse::<ParticipationState>(), Ok(state));
        }
        assert!(ParticipationState::Participating.participates());
        assert!(!ParticipationState::Mounted.participates());
    }
}
