//! Tile set: the read-only catalogue a tile map draws from.

use std::collections::BTreeMap;
use std::sync::Arc;
use glam::{Affine2, IVec2, Vec2};
use rand::Rng;
use crate::error::{Error, Result};
use crate::engine_bail;
use crate::math::{Color, Rect2};
use crate::servers::Rid;
use super::autotile::{pick_weighted, BindFlags, BitmaskMode, SubtileMask};

// ===== HOOKS =====

/// `(drawn_id, neighbor_id) -> Some(bound)` overrides the id-equality rule.
pub type TileBoundHook = Arc<dyn Fn(i32, i32) -> Option<bool> + Send + Sync>;

/// `(tile_id, bitmask, cell) -> Some(coord)` overrides the bitmask pick.
pub type SubtileSelectionHook = Arc<dyn Fn(i32, BindFlags, IVec2) -> Option<IVec2> + Send + Sync>;

/// `(tile_id, cell) -> Some(coord)` overrides the atlas priority pick.
pub type AtlasSelectionHook = Arc<dyn Fn(i32, IVec2) -> Option<IVec2> + Send + Sync>;

// ===== RESOURCE REFERENCES =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileMode {
    #[default]
    SingleTile,
    AutoTile,
    AtlasTile,
}

/// Texture already registered with the rendering server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureRef {
    pub rid: Rid,
    pub size: Vec2,
}

/// Collision shape handle plus the outline used for debug drawing.
///
/// A concave shape may carry a convex decomposition; the parts are added
/// to the body instead of the shape itself.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShapeRef {
    pub rid: Rid,
    pub outline: Vec<Vec2>,
    pub decomposed: Vec<Rid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileShape {
    pub shape: ShapeRef,
    pub transform: Affine2,
    /// Sub-tile this shape belongs to (auto/atlas tiles only).
    pub autotile_coord: IVec2,
    pub one_way: bool,
    pub one_way_margin: f32,
}

impl TileShape {
    pub fn new(shape: ShapeRef) -> Self {
        Self {
            shape,
            transform: Affine2::IDENTITY,
            autotile_coord: IVec2::ZERO,
            one_way: false,
            one_way_margin: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OccluderPolygonRef {
    pub rid: Rid,
    pub polygon: Vec<Vec2>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NavigationPolygonRef {
    pub rid: Rid,
    pub vertices: Vec<Vec2>,
    pub polygons: Vec<Vec<usize>>,
}

// ===== AUTOTILE DATA =====

type Coord = (i32, i32);

fn coord_key(coord: IVec2) -> Coord {
    (coord.x, coord.y)
}

/// Per-sub-tile tables of an auto or atlas tile. Keys enumerate in
/// `(x, y)` order, which is the order candidates are considered in.
#[derive(Debug, Clone, PartialEq)]
pub struct AutotileData {
    pub bitmask_mode: BitmaskMode,
    pub size: Vec2,
    pub spacing: i32,
    pub icon_coordinate: IVec2,
    flags: BTreeMap<Coord, SubtileMask>,
    priorities: BTreeMap<Coord, u32>,
    z_indices: BTreeMap<Coord, i32>,
    occluders: BTreeMap<Coord, OccluderPolygonRef>,
    navigation: BTreeMap<Coord, NavigationPolygonRef>,
}

impl Default for AutotileData {
    fn default() -> Self {
        Self {
            bitmask_mode: BitmaskMode::TwoByTwo,
            size: Vec2::new(64.0, 64.0),
            spacing: 0,
            icon_coordinate: IVec2::ZERO,
            flags: BTreeMap::new(),
            priorities: BTreeMap::new(),
            z_indices: BTreeMap::new(),
            occluders: BTreeMap::new(),
            navigation: BTreeMap::new(),
        }
    }
}

impl AutotileData {
    pub fn set_bitmask(&mut self, coord: IVec2, mask: SubtileMask) {
        if mask.bind.is_empty() && mask.ignore.is_empty() {
            self.flags.remove(&coord_key(coord));
        } else {
            self.flags.insert(coord_key(coord), mask);
        }
    }

    pub fn bitmask(&self, coord: IVec2) -> SubtileMask {
        self.flags.get(&coord_key(coord)).copied().unwrap_or_default()
    }

    pub fn bitmasks(&self) -> impl Iterator<Item = (IVec2, SubtileMask)> + '_ {
        self.flags.iter().map(|(&(x, y), mask)| (IVec2::new(x, y), *mask))
    }

    /// Set a sub-tile's weight. Weights must be positive.
    pub fn set_priority(&mut self, coord: IVec2, priority: i32) -> Result<()> {
        if priority <= 0 {
            engine_bail!(InvalidArgument: "culling::TileSet", "Subtile priority must be positive, got {}", priority);
        }
        self.priorities.insert(coord_key(coord), priority as u32);
        Ok(())
    }

    /// Weight of a sub-tile; absent and zero weights both read as 1.
    pub fn priority(&self, coord: IVec2) -> u32 {
        match self.priorities.get(&coord_key(coord)) {
            Some(&p) if p > 0 => p,
            _ => 1,
        }
    }

    /// Raw priority table as persisted, zeros included.
    pub fn priority_map(&self) -> impl Iterator<Item = (IVec2, u32)> + '_ {
        self.priorities.iter().map(|(&(x, y), p)| (IVec2::new(x, y), *p))
    }

    /// Restore a persisted priority table without validation.
    pub fn load_priority_map(&mut self, entries: impl IntoIterator<Item = (IVec2, u32)>) {
        self.priorities = entries.into_iter().map(|(c, p)| (coord_key(c), p)).collect();
    }

    pub fn set_z_index(&mut self, coord: IVec2, z: i32) {
        self.z_indices.insert(coord_key(coord), z);
    }

    pub fn z_index(&self, coord: IVec2) -> i32 {
        self.z_indices.get(&coord_key(coord)).copied().unwrap_or(0)
    }

    pub fn set_light_occluder(&mut self, coord: IVec2, occluder: Option<OccluderPolygonRef>) {
        match occluder {
            Some(o) => self.occluders.insert(coord_key(coord), o),
            None => self.occluders.remove(&coord_key(coord)),
        };
    }

    pub fn light_occluder(&self, coord: IVec2) -> Option<&OccluderPolygonRef> {
        self.occluders.get(&coord_key(coord))
    }

    pub fn set_navigation_polygon(&mut self, coord: IVec2, navpoly: Option<NavigationPolygonRef>) {
        match navpoly {
            Some(n) => self.navigation.insert(coord_key(coord), n),
            None => self.navigation.remove(&coord_key(coord)),
        };
    }

    pub fn navigation_polygon(&self, coord: IVec2) -> Option<&NavigationPolygonRef> {
        self.navigation.get(&coord_key(coord))
    }
}

// ===== TILE =====

#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub name: String,
    pub texture: Option<TextureRef>,
    pub normal_map: Option<Rid>,
    pub texture_offset: Vec2,
    pub material: Option<Rid>,
    pub modulate: Color,
    /// Source region; an empty rect means the whole texture.
    pub region: Rect2,
    pub mode: TileMode,
    pub z_index: i32,
    pub shapes: Vec<TileShape>,
    pub occluder: Option<OccluderPolygonRef>,
    pub occluder_offset: Vec2,
    pub navigation: Option<NavigationPolygonRef>,
    pub navigation_offset: Vec2,
    pub autotile: AutotileData,
}

impl Tile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            texture: None,
            normal_map: None,
            texture_offset: Vec2::ZERO,
            material: None,
            modulate: Color::WHITE,
            region: Rect2::default(),
            mode: TileMode::SingleTile,
            z_index: 0,
            shapes: Vec::new(),
            occluder: None,
            occluder_offset: Vec2::ZERO,
            navigation: None,
            navigation_offset: Vec2::ZERO,
            autotile: AutotileData::default(),
        }
    }

    pub fn is_subtiled(&self) -> bool {
        matches!(self.mode, TileMode::AutoTile | TileMode::AtlasTile)
    }

    /// Texture region of the sub-tile at `coord` (or the whole region for
    /// single tiles).
    pub fn subtile_region(&self, coord: IVec2) -> Rect2 {
        if !self.is_subtiled() {
            return self.region;
        }
        let spacing = self.autotile.spacing as f32;
        let size = self.autotile.size;
        let position = self.region.position + (size + Vec2::splat(spacing)) * coord.as_vec2();
        Rect2::from_position_size(position, size)
    }

    /// Number of sub-tile columns and rows the region holds.
    pub fn atlas_dimensions(&self) -> IVec2 {
        let spacing = self.autotile.spacing as f32;
        let step = self.autotile.size + Vec2::splat(spacing);
        if step.x <= 0.0 || step.y <= 0.0 {
            return IVec2::ZERO;
        }
        ((self.region.size + Vec2::splat(spacing)) / step).floor().as_ivec2()
    }
}

// ===== TILE SET =====

/// Tiles keyed by id, plus the optional selection hooks.
#[derive(Clone, Default)]
pub struct TileSet {
    tiles: BTreeMap<i32, Tile>,
    pub is_tile_bound_hook: Option<TileBoundHook>,
    pub subtile_selection_hook: Option<SubtileSelectionHook>,
    pub atlas_selection_hook: Option<AtlasSelectionHook>,
}

impl TileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_tile(&mut self, id: i32, tile: Tile) -> Result<()> {
        if id < 0 {
            engine_bail!(InvalidArgument: "culling::TileSet", "Tile id must be non-negative, got {}", id);
        }
        if self.tiles.contains_key(&id) {
            engine_bail!(InvalidArgument: "culling::TileSet", "Tile {} already exists", id);
        }
        self.tiles.insert(id, tile);
        Ok(())
    }

    pub fn remove_tile(&mut self, id: i32) -> Result<Tile> {
        self.tiles
            .remove(&id)
            .ok_or_else(|| Error::InvalidResource(format!("Tile {} does not exist", id)))
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
    }

    pub fn has_tile(&self, id: i32) -> bool {
        self.tiles.contains_key(&id)
    }

    pub fn tile(&self, id: i32) -> Option<&Tile> {
        self.tiles.get(&id)
    }

    pub fn tile_mut(&mut self, id: i32) -> Option<&mut Tile> {
        self.tiles.get_mut(&id)
    }

    pub fn tile_ids(&self) -> Vec<i32> {
        self.tiles.keys().copied().collect()
    }

    pub fn find_tile_by_name(&self, name: &str) -> Option<i32> {
        self.tiles.iter().find(|(_, t)| t.name == name).map(|(id, _)| *id)
    }

    /// One past the highest id in use.
    pub fn last_unused_tile_id(&self) -> i32 {
        self.tiles.keys().next_back().map_or(0, |id| id + 1)
    }

    // ===== SELECTION =====

    /// Whether a cell holding `neighbor_id` counts as a neighbour of one
    /// holding `drawn_id`.
    pub fn is_tile_bound(&self, drawn_id: i32, neighbor_id: i32) -> bool {
        if drawn_id == neighbor_id {
            return true;
        }
        if let Some(hook) = &self.is_tile_bound_hook {
            if let Some(bound) = hook(drawn_id, neighbor_id) {
                return bound;
            }
        }
        false
    }

    /// Pick a sub-tile of an auto tile for the given neighbourhood.
    ///
    /// Falls back to the icon coordinate when nothing matches.
    pub fn autotile_subtile_for_bitmask(
        &self,
        id: i32,
        bitmask: BindFlags,
        cell: IVec2,
        rng: &mut impl Rng,
    ) -> IVec2 {
        let Some(tile) = self.tiles.get(&id) else {
            return IVec2::ZERO;
        };
        if let Some(hook) = &self.subtile_selection_hook {
            if let Some(coord) = hook(id, bitmask, cell) {
                return coord;
            }
        }

        let data = &tile.autotile;
        let candidates: Vec<(IVec2, u32)> = data
            .bitmasks()
            .filter(|(_, mask)| mask.effective(data.bitmask_mode).matches(bitmask))
            .map(|(coord, _)| (coord, data.priority(coord)))
            .collect();

        pick_weighted(&candidates, rng.gen()).unwrap_or(data.icon_coordinate)
    }

    /// Pick an atlas sub-tile weighted by priority over the whole atlas.
    pub fn atlas_subtile_by_priority(&self, id: i32, cell: IVec2, rng: &mut impl Rng) -> IVec2 {
        let Some(tile) = self.tiles.get(&id) else {
            return IVec2::ZERO;
        };
        if let Some(hook) = &self.atlas_selection_hook {
            if let Some(coord) = hook(id, cell) {
                return coord;
            }
        }

        let dims = tile.atlas_dimensions();
        let mut candidates = Vec::new();
        for x in 0..dims.x {
            for y in 0..dims.y {
                let coord = IVec2::new(x, y);
                candidates.push((coord, tile.autotile.priority(coord)));
            }
        }

        pick_weighted(&candidates, rng.gen()).unwrap_or(tile.autotile.icon_coordinate)
    }
}

#[cfg(test)]
#[path = "tile_set_tests.rs"]
mod tests;
