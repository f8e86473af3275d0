use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use glam::{Affine2, IVec2, Vec2};
use crate::servers::Rid;
use super::cell_transform::CellFlags;

/// Integer grid key, ordered row-major (by `y`, then `x`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PosKey {
    pub x: i32,
    pub y: i32,
}

impl PosKey {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Key of the quadrant holding this cell (floor division).
    pub fn to_quadrant(self, quadrant_size: i32) -> PosKey {
        PosKey::new(self.x.div_euclid(quadrant_size), self.y.div_euclid(quadrant_size))
    }

    pub fn as_ivec2(self) -> IVec2 {
        IVec2::new(self.x, self.y)
    }
}

impl From<IVec2> for PosKey {
    fn from(v: IVec2) -> Self {
        PosKey::new(v.x, v.y)
    }
}

impl Ord for PosKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.y.cmp(&other.y).then(self.x.cmp(&other.x))
    }
}

impl PartialOrd for PosKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Stored cell state. Empty cells are never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub id: i32,
    pub flags: CellFlags,
    pub autotile_coord: (i16, i16),
    /// Insertion serial, used to persist cells in insertion order.
    pub(crate) serial: u64,
}

impl Cell {
    pub fn autotile_coord(&self) -> IVec2 {
        IVec2::new(i32::from(self.autotile_coord.0), i32::from(self.autotile_coord.1))
    }

    pub(crate) fn same_state(&self, other: &Cell) -> bool {
        self.id == other.id && self.flags == other.flags && self.autotile_coord == other.autotile_coord
    }
}

/// Server handle plus the local pose it was created at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PlacedHandle {
    pub rid: Rid,
    pub xform: Affine2,
}

/// A block of cells sharing one rebuild cycle and one physics body.
#[derive(Debug, Clone)]
pub struct Quadrant {
    pub(crate) pos: Vec2,
    pub(crate) cells: BTreeSet<PosKey>,
    pub(crate) body: Rid,
    pub(crate) shape_owner: Option<u32>,
    pub(crate) canvas_items: Vec<Rid>,
    pub(crate) occluders: BTreeMap<PosKey, PlacedHandle>,
    pub(crate) nav_regions: BTreeMap<PosKey, PlacedHandle>,
    pub(crate) dirty: bool,
    pub(crate) degraded: bool,
}

impl Quadrant {
    pub(crate) fn new(pos: Vec2) -> Self {
        Self {
            pos,
            cells: BTreeSet::new(),
            body: Rid::INVALID,
            shape_owner: None,
            canvas_items: Vec::new(),
            occluders: BTreeMap::new(),
            nav_regions: BTreeMap::new(),
            dirty: false,
            degraded: false,
        }
    }

    /// Local-space pivot of the quadrant.
    pub fn position(&self) -> Vec2 {
        self.pos
    }

    pub fn cells(&self) -> impl Iterator<Item = PosKey> + '_ {
        self.cells.iter().copied()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn body(&self) -> Rid {
        self.body
    }

    pub fn shape_owner(&self) -> Option<u32> {
        self.shape_owner
    }

    pub fn canvas_items(&self) -> &[Rid] {
        &self.canvas_items
    }

    pub fn occluder(&self, cell: PosKey) -> Option<Rid> {
        self.occluders.get(&cell).map(|h| h.rid)
    }

    pub fn occluder_count(&self) -> usize {
        self.occluders.len()
    }

    pub fn navigation_region(&self, cell: PosKey) -> Option<Rid> {
        self.nav_regions.get(&cell).map(|h| h.rid)
    }

    pub fn navigation_region_count(&self) -> usize {
        self.nav_regions.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Last rebuild hit a server allocation failure.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

#[cfg(test)]
#[path = "quadrant_tests.rs"]
mod tests;
