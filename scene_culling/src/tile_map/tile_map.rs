/// TileMap: quadrant-indexed tile grid.
///
/// Cells are grouped into square quadrants. Each quadrant owns the server
/// handles derived from its cells (canvas items, a physics body or a shape
/// owner on the parent collision object, light occluders, navigation
/// regions). Edits only mark quadrants dirty; the handles are rebuilt in
/// one pass before the next draw (see `update_dirty_quadrants`).

use std::cell::Cell as CacheCell;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use glam::{Affine2, IVec2, Vec2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use crate::dispatch::{EventSinks, SinkId};
use crate::error::{Error, Result};
use crate::math::{Color, Rect2};
use crate::servers::{lock, BodyMode, BodyParam, CollisionObjectHost, PhysicsServer, Rid, ServerSet};
use crate::{engine_bail, engine_debug, engine_err, engine_error};
use super::autotile::{neighbor_bitmask, BindFlags, SubtileMask};
use super::cell_transform::{CellFlags, Placement};
use super::grid::{GridGeometry, HalfOffset, TileMapMode, TileOrigin};
use super::quadrant::{Cell, PosKey, Quadrant};
use super::rebuild::LockedServers;
use super::tile_data::{self, CellRecord, TileDataFormat};
use super::tile_set::{TileMode, TileSet};

/// Tile id of an empty cell.
pub const INVALID_CELL: i32 = -1;

const SOURCE: &str = "culling::TileMap";

const USE_PARENT_WARNING: &str = "TileMap with Use Parent on needs a parent CollisionObject2D to give shapes to. Please use it as a child of Area2D, StaticBody2D, RigidBody2D, KinematicBody2D, etc. to give them a shape.";

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

// ===== CONFIGURATION =====

#[derive(Debug, Clone, PartialEq)]
pub struct TileMapConfig {
    pub grid: GridGeometry,
    pub quadrant_size: i32,
    /// Reproduce the historical flip/origin offsets.
    pub compatibility_mode: bool,
    pub centered_textures: bool,
    pub clip_uv: bool,
    /// Sort cells by Y; forces one cell per quadrant.
    pub y_sort: bool,
    pub light_mask: u32,
    pub occluder_light_mask: u32,
    pub self_modulate: Color,
    pub material: Option<Rid>,
    pub use_parent_material: bool,
    pub collision_layer: u32,
    pub collision_mask: u32,
    pub friction: f32,
    pub bounce: f32,
    pub use_kinematic: bool,
    /// Give shapes to the parent collision object instead of owning bodies.
    pub use_parent: bool,
    pub show_collision: bool,
    pub show_navigation: bool,
    /// Seed of the autotile/atlas sub-tile picker.
    pub random_seed: u64,
}

impl Default for TileMapConfig {
    fn default() -> Self {
        Self {
            grid: GridGeometry::default(),
            quadrant_size: 16,
            compatibility_mode: true,
            centered_textures: false,
            clip_uv: false,
            y_sort: false,
            light_mask: 1,
            occluder_light_mask: 1,
            self_modulate: Color::WHITE,
            material: None,
            use_parent_material: false,
            collision_layer: 1,
            collision_mask: 1,
            friction: 1.0,
            bounce: 0.0,
            use_kinematic: false,
            use_parent: false,
            show_collision: false,
            show_navigation: false,
            random_seed: 0,
        }
    }
}

// ===== WORLD BINDING =====

/// Navigation map the tile map registers regions with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavigationBinding {
    pub map: Rid,
    /// Global transform of the node owning the navigation map.
    pub global_transform: Affine2,
}

/// Everything the tile map needs from the scene while it is in a world.
#[derive(Clone)]
pub struct WorldBinding {
    pub canvas: Rid,
    /// The tile map's own canvas item; quadrant items are parented to it.
    pub canvas_item: Rid,
    pub space: Rid,
    pub navigation: Option<NavigationBinding>,
    /// Parent collision object, used when `use_parent` is on.
    pub collision_parent: Option<Arc<Mutex<dyn CollisionObjectHost>>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TileMapEvent {
    SettingsChanged,
    /// The bounding rect of all quadrants changed.
    ItemRectChanged(Rect2),
}

// ===== TILE MAP =====

pub struct TileMap {
    pub(super) config: TileMapConfig,
    pub(super) servers: ServerSet,
    pub(super) tile_set: Option<Arc<TileSet>>,
    /// Stored cells; the empty sentinel is never stored
    pub(super) cells: BTreeMap<PosKey, Cell>,
    pub(super) quadrants: BTreeMap<PosKey, Quadrant>,
    /// Quadrants waiting for a rebuild, in the order they went dirty
    pub(super) dirty_list: VecDeque<PosKey>,
    /// A rebuild is owed (set by the first dirty transition)
    pub(super) pending_update: bool,
    /// The owed rebuild was posted to run before the next draw
    pub(super) deferred_posted: bool,
    pub(super) quadrant_order_dirty: bool,
    pub(super) rect_cache: Rect2,
    pub(super) rect_cache_dirty: bool,
    used_rect_cache: CacheCell<Option<Rect2>>,
    dirty_bitmask: Vec<PosKey>,
    pub(super) world: Option<WorldBinding>,
    pub(super) local_transform: Affine2,
    pub(super) global_transform: Affine2,
    pub(super) visible: bool,
    pub(super) instance_id: u64,
    next_serial: u64,
    rng: StdRng,
    pub(super) events: EventSinks<TileMapEvent>,
}

impl TileMap {
    /// Create an empty tile map outside any world.
    pub fn new(config: TileMapConfig, servers: ServerSet) -> Result<Self> {
        if config.quadrant_size < 1 {
            engine_bail!(InvalidArgument: SOURCE, "Quadrant size cannot be smaller than 1.");
        }
        if config.grid.cell_size.x < 1.0 || config.grid.cell_size.y < 1.0 {
            engine_bail!(InvalidArgument: SOURCE, "Cell size cannot be smaller than 1.");
        }
        let rng = StdRng::seed_from_u64(config.random_seed);
        Ok(Self {
            config,
            servers,
            tile_set: None,
            cells: BTreeMap::new(),
            quadrants: BTreeMap::new(),
            dirty_list: VecDeque::new(),
            pending_update: false,
            deferred_posted: false,
            quadrant_order_dirty: false,
            rect_cache: Rect2::default(),
            rect_cache_dirty: true,
            used_rect_cache: CacheCell::new(None),
            dirty_bitmask: Vec::new(),
            world: None,
            local_transform: Affine2::IDENTITY,
            global_transform: Affine2::IDENTITY,
            visible: true,
            instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            next_serial: 0,
            rng,
            events: EventSinks::new(),
        })
    }

    pub fn config(&self) -> &TileMapConfig {
        &self.config
    }

    /// Object id attached to every body this map creates.
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn subscribe(&mut self, sink: impl FnMut(&TileMapEvent) + Send + 'static) -> SinkId {
        self.events.subscribe(sink)
    }

    pub fn unsubscribe(&mut self, id: SinkId) -> bool {
        self.events.unsubscribe(id)
    }

    pub(super) fn effective_quadrant_size(&self) -> i32 {
        if self.config.y_sort { 1 } else { self.config.quadrant_size }
    }

    pub(super) fn placement(&self) -> Placement {
        Placement {
            cell_size: self.config.grid.cell_size,
            tile_origin: self.config.grid.tile_origin,
            compatibility_mode: self.config.compatibility_mode,
            centered_textures: self.config.centered_textures,
        }
    }

    /// Parent collision object, when collisions are delegated and one is bound.
    pub(super) fn collision_parent(&self) -> Option<Arc<Mutex<dyn CollisionObjectHost>>> {
        if !self.config.use_parent {
            return None;
        }
        self.world.as_ref().and_then(|w| w.collision_parent.clone())
    }

    /// Relative transform from this map to its navigation map's node.
    pub(super) fn navigation_relative(&self) -> Option<(Rid, Affine2)> {
        let nav = self.world.as_ref()?.navigation?;
        Some((nav.map, nav.global_transform.inverse() * self.global_transform))
    }

    // ===== CELLS =====

    /// Set or erase (`tile_id < 0`) a cell. Setting the current state is a no-op.
    pub fn set_cell(&mut self, x: i32, y: i32, tile_id: i32, flags: CellFlags, autotile_coord: IVec2) {
        let key = PosKey::new(x, y);
        let quadrant_key = key.to_quadrant(self.effective_quadrant_size());

        if tile_id < 0 {
            if self.cells.remove(&key).is_none() {
                return;
            }
            let emptied = match self.quadrants.get_mut(&quadrant_key) {
                Some(q) => {
                    q.cells.remove(&key);
                    q.cells.is_empty()
                }
                None => return,
            };
            if emptied {
                self.erase_quadrant(quadrant_key);
            } else {
                self.make_quadrant_dirty(quadrant_key, true);
            }
            self.used_rect_cache.set(None);
            return;
        }

        let Ok(autotile_coord) = narrow_autotile_coord(autotile_coord) else {
            return;
        };
        let new_cell = Cell {
            id: tile_id,
            flags,
            autotile_coord,
            serial: self.next_serial,
        };

        match self.cells.get_mut(&key) {
            Some(existing) => {
                if existing.same_state(&new_cell) {
                    return;
                }
                *existing = Cell { serial: existing.serial, ..new_cell };
            }
            None => {
                self.next_serial += 1;
                self.cells.insert(key, new_cell);
                if !self.quadrants.contains_key(&quadrant_key) {
                    self.create_quadrant(quadrant_key);
                }
                if let Some(q) = self.quadrants.get_mut(&quadrant_key) {
                    q.cells.insert(key);
                }
            }
        }

        self.make_quadrant_dirty(quadrant_key, true);
        self.used_rect_cache.set(None);
    }

    pub fn set_cellv(&mut self, position: IVec2, tile_id: i32, flags: CellFlags) {
        self.set_cell(position.x, position.y, tile_id, flags, IVec2::ZERO);
    }

    /// Change only the sub-tile pick of an existing cell.
    pub fn set_cell_autotile_coord(&mut self, x: i32, y: i32, coord: IVec2) {
        let key = PosKey::new(x, y);
        let Some(cell) = self.cells.get_mut(&key) else {
            return;
        };
        let Ok(coord) = narrow_autotile_coord(coord) else {
            return;
        };
        cell.autotile_coord = coord;
        let quadrant_key = key.to_quadrant(self.effective_quadrant_size());
        self.make_quadrant_dirty(quadrant_key, true);
    }

    /// Tile id at `(x, y)`, or `INVALID_CELL`.
    pub fn get_cell(&self, x: i32, y: i32) -> i32 {
        self.cells.get(&PosKey::new(x, y)).map_or(INVALID_CELL, |c| c.id)
    }

    pub fn get_cellv(&self, position: IVec2) -> i32 {
        self.get_cell(position.x, position.y)
    }

    pub fn cell(&self, x: i32, y: i32) -> Option<&Cell> {
        self.cells.get(&PosKey::new(x, y))
    }

    pub fn is_cell_x_flipped(&self, x: i32, y: i32) -> bool {
        self.cell(x, y).is_some_and(|c| c.flags.flip_h)
    }

    pub fn is_cell_y_flipped(&self, x: i32, y: i32) -> bool {
        self.cell(x, y).is_some_and(|c| c.flags.flip_v)
    }

    pub fn is_cell_transposed(&self, x: i32, y: i32) -> bool {
        self.cell(x, y).is_some_and(|c| c.flags.transpose)
    }

    pub fn get_cell_autotile_coord(&self, x: i32, y: i32) -> IVec2 {
        self.cell(x, y).map_or(IVec2::ZERO, |c| c.autotile_coord())
    }

    /// Remove every cell and quadrant, releasing all server handles.
    pub fn clear(&mut self) {
        self.clear_quadrants();
        self.cells.clear();
        self.used_rect_cache.set(None);
    }

    /// Erase cells whose tile id no longer exists in the tile set.
    pub fn fix_invalid_tiles(&mut self) -> Result<()> {
        let tile_set = self.require_tile_set("Cannot fix invalid tiles if Tileset is not open.")?;
        let snapshot: Vec<(PosKey, i32)> = self.cells.iter().map(|(k, c)| (*k, c.id)).collect();
        for (key, id) in snapshot {
            if !tile_set.has_tile(id) {
                self.set_cell(key.x, key.y, INVALID_CELL, CellFlags::default(), IVec2::ZERO);
            }
        }
        Ok(())
    }

    pub fn get_used_cells(&self) -> Vec<IVec2> {
        self.cells.keys().map(|k| k.as_ivec2()).collect()
    }

    pub fn get_used_cells_by_id(&self, id: i32) -> Vec<IVec2> {
        self.cells
            .iter()
            .filter(|(_, c)| c.id == id)
            .map(|(k, _)| k.as_ivec2())
            .collect()
    }

    /// Bounding rect of used cells in cell units (cached until the next edit).
    pub fn get_used_rect(&self) -> Rect2 {
        if let Some(rect) = self.used_rect_cache.get() {
            return rect;
        }
        let mut keys = self.cells.keys();
        let rect = match keys.next() {
            Some(first) => {
                let mut rect = Rect2::from_position_size(first.as_ivec2().as_vec2(), Vec2::ZERO);
                for key in keys {
                    rect.expand_to(key.as_ivec2().as_vec2());
                }
                rect.size += Vec2::ONE;
                rect
            }
            None => Rect2::default(),
        };
        self.used_rect_cache.set(Some(rect));
        rect
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    // ===== COORDINATES =====

    pub fn map_to_world(&self, cell: IVec2, ignore_half_offset: bool) -> Vec2 {
        self.config.grid.map_to_world(cell, ignore_half_offset)
    }

    pub fn world_to_map(&self, position: Vec2) -> IVec2 {
        self.config.grid.world_to_map(position)
    }

    pub fn cell_transform(&self) -> Affine2 {
        self.config.grid.cell_transform()
    }

    pub fn cell_draw_offset(&self) -> Vec2 {
        self.config.grid.cell_draw_offset()
    }

    // ===== AUTOTILE BITMASKS =====

    fn require_tile_set(&self, message: &str) -> Result<Arc<TileSet>> {
        self.tile_set
            .clone()
            .ok_or_else(|| engine_err!(MissingDependency: SOURCE, "{}", message))
    }

    /// Recompute the sub-tile pick of one cell from its neighbourhood.
    pub fn update_cell_bitmask(&mut self, x: i32, y: i32) -> Result<()> {
        let tile_set = self.require_tile_set("Cannot update cell bitmask if Tileset is not open.")?;
        let key = PosKey::new(x, y);
        let Some(cell) = self.cells.get(&key).copied() else {
            return Ok(());
        };
        let Some(tile) = tile_set.tile(cell.id) else {
            return Ok(());
        };
        let position = key.as_ivec2();

        let coord = match tile.mode {
            TileMode::AutoTile => {
                let mask = neighbor_bitmask(tile.autotile.bitmask_mode, |offset| {
                    tile_set.is_tile_bound(cell.id, self.get_cellv(position + offset))
                });
                tile_set.autotile_subtile_for_bitmask(cell.id, mask, position, &mut self.rng)
            }
            TileMode::SingleTile => IVec2::ZERO,
            TileMode::AtlasTile => {
                if tile.autotile.bitmask(position) != SubtileMask::bind(BindFlags::CENTER) {
                    return Ok(());
                }
                tile_set.atlas_subtile_by_priority(cell.id, position, &mut self.rng)
            }
        };

        let coord = narrow_autotile_coord(coord)?;
        if let Some(stored) = self.cells.get_mut(&key) {
            stored.autotile_coord = coord;
        }
        let quadrant_key = key.to_quadrant(self.effective_quadrant_size());
        self.make_quadrant_dirty(quadrant_key, true);
        Ok(())
    }

    /// Update the 3×3 block of cells centered on `position`.
    pub fn update_bitmask_area(&mut self, position: IVec2) -> Result<()> {
        for x in position.x - 1..=position.x + 1 {
            for y in position.y - 1..=position.y + 1 {
                self.update_cell_bitmask(x, y)?;
            }
        }
        Ok(())
    }

    /// Update every cell in `start..=end` plus a one-cell border. Empty or
    /// inverted bounds update every used cell.
    pub fn update_bitmask_region(&mut self, start: IVec2, end: IVec2) -> Result<()> {
        if end.x < start.x || end.y < start.y || end == start {
            for cell in self.get_used_cells() {
                self.update_cell_bitmask(cell.x, cell.y)?;
            }
            return Ok(());
        }
        for x in start.x - 1..=end.x + 1 {
            for y in start.y - 1..=end.y + 1 {
                self.update_cell_bitmask(x, y)?;
            }
        }
        Ok(())
    }

    /// Queue the 3×3 block around `position` for `update_dirty_bitmask`.
    pub fn make_bitmask_area_dirty(&mut self, position: IVec2) {
        for x in position.x - 1..=position.x + 1 {
            for y in position.y - 1..=position.y + 1 {
                let key = PosKey::new(x, y);
                if !self.dirty_bitmask.contains(&key) {
                    self.dirty_bitmask.push(key);
                }
            }
        }
    }

    pub fn update_dirty_bitmask(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.dirty_bitmask);
        for key in pending {
            self.update_cell_bitmask(key.x, key.y)?;
        }
        Ok(())
    }

    // ===== PERSISTENCE =====

    /// Encode every cell in insertion order (`Format2`).
    pub fn tile_data(&self) -> Vec<i32> {
        let mut cells: Vec<(&PosKey, &Cell)> = self.cells.iter().collect();
        cells.sort_by_key(|(_, c)| c.serial);
        let records: Vec<CellRecord> = cells
            .into_iter()
            .map(|(key, cell)| CellRecord {
                position: *key,
                tile_id: cell.id,
                flags: cell.flags,
                autotile_coord: cell.autotile_coord,
            })
            .collect();
        tile_data::encode(&records)
    }

    /// Replace all cells with decoded tile data. Corrupted data leaves the
    /// map untouched.
    pub fn set_tile_data(&mut self, data: &[i32], format: TileDataFormat) -> Result<()> {
        let records = tile_data::decode(data, format).inspect_err(|e| {
            engine_error!(SOURCE, "{}", e);
        })?;
        self.clear();
        for record in records {
            let coord = IVec2::new(i32::from(record.autotile_coord.0), i32::from(record.autotile_coord.1));
            self.set_cell(record.position.x, record.position.y, record.tile_id, record.flags, coord);
        }
        Ok(())
    }

    // ===== QUADRANTS =====

    pub fn quadrant(&self, key: PosKey) -> Option<&Quadrant> {
        self.quadrants.get(&key)
    }

    pub fn quadrants(&self) -> impl Iterator<Item = (PosKey, &Quadrant)> + '_ {
        self.quadrants.iter().map(|(k, q)| (*k, q))
    }

    pub fn quadrant_count(&self) -> usize {
        self.quadrants.len()
    }

    /// Quadrants waiting for a rebuild, in queue order.
    pub fn dirty_quadrants(&self) -> Vec<PosKey> {
        self.dirty_list.iter().copied().collect()
    }

    /// A rebuild is owed.
    pub fn is_update_pending(&self) -> bool {
        self.pending_update
    }

    /// A rebuild was posted to run before the next draw.
    pub fn has_deferred_update(&self) -> bool {
        self.deferred_posted
    }

    /// Run the posted rebuild, if any. Call once per frame before drawing.
    pub fn pre_draw(&mut self) {
        if self.deferred_posted {
            self.update_dirty_quadrants();
        }
    }

    /// World-space bounds of all quadrants as of the last rebuild.
    pub fn item_rect(&self) -> Rect2 {
        self.rect_cache
    }

    pub(super) fn make_quadrant_dirty(&mut self, key: PosKey, post_update: bool) {
        let Some(q) = self.quadrants.get_mut(&key) else {
            return;
        };
        if !q.dirty {
            q.dirty = true;
            self.dirty_list.push_back(key);
        }
        if self.pending_update {
            return;
        }
        self.pending_update = true;
        if self.world.is_none() {
            return;
        }
        if post_update {
            self.deferred_posted = true;
        }
    }

    /// Create a quadrant with its body (or parent shape owner).
    fn create_quadrant(&mut self, key: PosKey) {
        let size = self.effective_quadrant_size();
        let pos = self.config.grid.quadrant_origin(key.as_ivec2(), size);
        let mut quadrant = Quadrant::new(pos);

        if !self.config.use_parent {
            match lock(&self.servers.physics, "physics") {
                Ok(mut ps) => {
                    quadrant.body = self.create_body(&mut *ps, pos);
                }
                Err(e) => {
                    engine_error!(SOURCE, "Quadrant {:?}: {}", key, e);
                }
            }
            if !quadrant.body.is_valid() {
                engine_error!(SOURCE, "Quadrant {:?}: physics body allocation failed", key);
                quadrant.degraded = true;
            }
        } else if let Some(parent) = self.collision_parent() {
            match lock(&*parent, "collision parent") {
                Ok(mut parent) => quadrant.shape_owner = Some(parent.create_shape_owner(self.instance_id)),
                Err(e) => {
                    engine_error!(SOURCE, "Quadrant {:?}: {}", key, e);
                }
            }
        }

        self.quadrants.insert(key, quadrant);
        self.rect_cache_dirty = true;
        self.quadrant_order_dirty = true;
    }

    /// Allocate and configure a quadrant body at local position `pos`.
    pub(super) fn create_body(&self, ps: &mut dyn PhysicsServer, pos: Vec2) -> Rid {
        let body = ps.body_create();
        if !body.is_valid() {
            return body;
        }
        let mode = if self.config.use_kinematic { BodyMode::Kinematic } else { BodyMode::Static };
        ps.body_set_mode(body, mode);
        ps.body_attach_object_instance_id(body, self.instance_id);
        ps.body_set_collision_layer(body, self.config.collision_layer);
        ps.body_set_collision_mask(body, self.config.collision_mask);
        ps.body_set_param(body, BodyParam::Friction, self.config.friction);
        ps.body_set_param(body, BodyParam::Bounce, self.config.bounce);

        let mut xform = Affine2::from_translation(pos);
        if let Some(world) = &self.world {
            xform = self.global_transform * xform;
            ps.body_set_space(body, world.space);
        }
        ps.body_set_state_transform(body, xform);
        body
    }

    fn erase_quadrant(&mut self, key: PosKey) {
        let Some(mut quadrant) = self.quadrants.remove(&key) else {
            return;
        };
        if quadrant.dirty {
            self.dirty_list.retain(|k| *k != key);
        }
        if let Err(e) = self.release_quadrant(&mut quadrant) {
            engine_error!(SOURCE, "Quadrant {:?}: {}", key, e);
        }
        self.rect_cache_dirty = true;
    }

    /// Free every handle a quadrant owns, body included.
    fn release_quadrant(&self, quadrant: &mut Quadrant) -> Result<()> {
        {
            let mut rs = lock(&self.servers.rendering, "rendering")?;
            for item in quadrant.canvas_items.drain(..) {
                rs.free_rid(item);
            }
            for (_, occluder) in std::mem::take(&mut quadrant.occluders) {
                rs.free_rid(occluder.rid);
            }
        }
        {
            let mut ns = lock(&self.servers.navigation, "navigation")?;
            for (_, region) in std::mem::take(&mut quadrant.nav_regions) {
                ns.free_rid(region.rid);
            }
        }
        if quadrant.body.is_valid() {
            let mut ps = lock(&self.servers.physics, "physics")?;
            ps.free_rid(quadrant.body);
            quadrant.body = Rid::INVALID;
        }
        if let (Some(owner), Some(parent)) = (quadrant.shape_owner.take(), self.collision_parent()) {
            lock(&*parent, "collision parent")?.remove_shape_owner(owner);
        }
        Ok(())
    }

    fn clear_quadrants(&mut self) {
        while let Some(key) = self.quadrants.keys().next().copied() {
            self.erase_quadrant(key);
        }
    }

    /// Destroy every quadrant and rebuild them from the cell map.
    pub(super) fn recreate_quadrants(&mut self) {
        self.clear_quadrants();
        let size = self.effective_quadrant_size();
        let keys: Vec<PosKey> = self.cells.keys().copied().collect();
        for key in keys {
            let quadrant_key = key.to_quadrant(size);
            if !self.quadrants.contains_key(&quadrant_key) {
                self.create_quadrant(quadrant_key);
            }
            if let Some(q) = self.quadrants.get_mut(&quadrant_key) {
                q.cells.insert(key);
            }
            self.make_quadrant_dirty(quadrant_key, false);
        }
        engine_debug!(SOURCE, "Recreated {} quadrants", self.quadrants.len());
        self.update_dirty_quadrants();
    }

    // ===== TILE SET =====

    pub fn tileset(&self) -> Option<&Arc<TileSet>> {
        self.tile_set.as_ref()
    }

    /// Replace the tile set. Removing it also removes every cell.
    pub fn set_tileset(&mut self, tile_set: Option<Arc<TileSet>>) {
        self.clear_quadrants();
        self.tile_set = tile_set;
        if self.tile_set.is_none() {
            self.clear();
        }
        self.recreate_quadrants();
        self.emit_settings_changed();
    }

    /// The tile set's contents changed: every quadrant needs a rebuild.
    pub fn tileset_changed(&mut self) {
        let keys: Vec<PosKey> = self.quadrants.keys().copied().collect();
        for key in keys {
            self.make_quadrant_dirty(key, true);
        }
    }

    // ===== GEOMETRY SETTINGS =====

    fn emit_settings_changed(&mut self) {
        self.events.emit(&TileMapEvent::SettingsChanged);
    }

    /// Apply a setting that invalidates every quadrant.
    fn rebuild_with(&mut self, apply: impl FnOnce(&mut TileMapConfig)) {
        self.clear_quadrants();
        apply(&mut self.config);
        self.recreate_quadrants();
        self.emit_settings_changed();
    }

    pub fn set_cell_size(&mut self, size: Vec2) -> Result<()> {
        if size.x < 1.0 || size.y < 1.0 {
            engine_bail!(InvalidArgument: SOURCE, "Cell size cannot be smaller than 1.");
        }
        self.rebuild_with(|c| c.grid.cell_size = size);
        Ok(())
    }

    pub fn set_quadrant_size(&mut self, size: i32) -> Result<()> {
        if size < 1 {
            engine_bail!(InvalidArgument: SOURCE, "Quadrant size cannot be smaller than 1.");
        }
        self.rebuild_with(|c| c.quadrant_size = size);
        Ok(())
    }

    pub fn set_mode(&mut self, mode: TileMapMode) {
        self.rebuild_with(|c| c.grid.mode = mode);
    }

    pub fn set_half_offset(&mut self, half_offset: HalfOffset) {
        self.rebuild_with(|c| c.grid.half_offset = half_offset);
    }

    pub fn set_tile_origin(&mut self, tile_origin: TileOrigin) {
        self.rebuild_with(|c| c.grid.tile_origin = tile_origin);
    }

    pub fn set_custom_transform(&mut self, xform: Affine2) {
        self.rebuild_with(|c| c.grid.custom_transform = xform);
    }

    pub fn set_y_sort_mode(&mut self, enable: bool) {
        self.clear_quadrants();
        self.config.y_sort = enable;
        if let Some(world) = &self.world {
            match lock(&self.servers.rendering, "rendering") {
                Ok(mut rs) => rs.canvas_item_set_sort_children_by_y(world.canvas_item, enable),
                Err(e) => {
                    engine_error!(SOURCE, "{}", e);
                }
            }
        }
        self.recreate_quadrants();
        self.emit_settings_changed();
    }

    pub fn set_compatibility_mode(&mut self, enable: bool) {
        self.rebuild_with(|c| c.compatibility_mode = enable);
    }

    pub fn set_centered_textures(&mut self, enable: bool) {
        self.rebuild_with(|c| c.centered_textures = enable);
    }

    pub fn set_clip_uv(&mut self, enable: bool) {
        if self.config.clip_uv == enable {
            return;
        }
        self.rebuild_with(|c| c.clip_uv = enable);
    }

    pub fn set_self_modulate(&mut self, modulate: Color) {
        self.rebuild_with(|c| c.self_modulate = modulate);
    }

    pub fn set_show_collision(&mut self, enable: bool) {
        self.rebuild_with(|c| c.show_collision = enable);
    }

    pub fn set_show_navigation(&mut self, enable: bool) {
        self.rebuild_with(|c| c.show_navigation = enable);
    }

    // ===== COLLISION SETTINGS =====

    fn for_each_body(&self, mut apply: impl FnMut(&mut dyn PhysicsServer, Rid)) {
        if self.config.use_parent {
            return;
        }
        match lock(&self.servers.physics, "physics") {
            Ok(mut ps) => {
                for q in self.quadrants.values().filter(|q| q.body.is_valid()) {
                    apply(&mut *ps, q.body);
                }
            }
            Err(e) => {
                engine_error!(SOURCE, "{}", e);
            }
        }
    }

    pub fn set_collision_layer(&mut self, layer: u32) {
        self.config.collision_layer = layer;
        self.for_each_body(|ps, body| ps.body_set_collision_layer(body, layer));
        self.emit_settings_changed();
    }

    pub fn set_collision_mask(&mut self, mask: u32) {
        self.config.collision_mask = mask;
        self.for_each_body(|ps, body| ps.body_set_collision_mask(body, mask));
        self.emit_settings_changed();
    }

    pub fn set_collision_layer_bit(&mut self, bit: u32, value: bool) -> Result<()> {
        if bit > 31 {
            engine_bail!(InvalidArgument: SOURCE, "Collision layer bit must be between 0 and 31 inclusive.");
        }
        let layer = set_bit(self.config.collision_layer, bit, value);
        self.set_collision_layer(layer);
        Ok(())
    }

    pub fn collision_layer_bit(&self, bit: u32) -> Result<bool> {
        if bit > 31 {
            engine_bail!(InvalidArgument: SOURCE, "Collision layer bit must be between 0 and 31 inclusive.");
        }
        Ok(self.config.collision_layer & (1 << bit) != 0)
    }

    pub fn set_collision_mask_bit(&mut self, bit: u32, value: bool) -> Result<()> {
        if bit > 31 {
            engine_bail!(InvalidArgument: SOURCE, "Collision mask bit must be between 0 and 31 inclusive.");
        }
        let mask = set_bit(self.config.collision_mask, bit, value);
        self.set_collision_mask(mask);
        Ok(())
    }

    pub fn collision_mask_bit(&self, bit: u32) -> Result<bool> {
        if bit > 31 {
            engine_bail!(InvalidArgument: SOURCE, "Collision mask bit must be between 0 and 31 inclusive.");
        }
        Ok(self.config.collision_mask & (1 << bit) != 0)
    }

    pub fn set_friction(&mut self, friction: f32) {
        self.config.friction = friction;
        self.for_each_body(|ps, body| ps.body_set_param(body, BodyParam::Friction, friction));
        self.emit_settings_changed();
    }

    pub fn set_bounce(&mut self, bounce: f32) {
        self.config.bounce = bounce;
        self.for_each_body(|ps, body| ps.body_set_param(body, BodyParam::Bounce, bounce));
        self.emit_settings_changed();
    }

    pub fn set_collision_use_kinematic(&mut self, enable: bool) {
        self.rebuild_with(|c| c.use_kinematic = enable);
    }

    pub fn set_collision_use_parent(&mut self, enable: bool) {
        if self.config.use_parent == enable {
            return;
        }
        self.rebuild_with(|c| c.use_parent = enable);
    }

    // ===== CANVAS ITEM SETTINGS =====

    pub fn set_light_mask(&mut self, mask: u32) {
        self.config.light_mask = mask;
        match lock(&self.servers.rendering, "rendering") {
            Ok(mut rs) => {
                for item in self.quadrants.values().flat_map(|q| q.canvas_items.iter()) {
                    rs.canvas_item_set_light_mask(*item, mask);
                }
            }
            Err(e) => {
                engine_error!(SOURCE, "{}", e);
            }
        }
        self.emit_settings_changed();
    }

    pub fn set_occluder_light_mask(&mut self, mask: u32) {
        self.config.occluder_light_mask = mask;
        match lock(&self.servers.rendering, "rendering") {
            Ok(mut rs) => {
                for occluder in self.quadrants.values().flat_map(|q| q.occluders.values()) {
                    rs.canvas_light_occluder_set_light_mask(occluder.rid, mask);
                }
            }
            Err(e) => {
                engine_error!(SOURCE, "{}", e);
            }
        }
        self.emit_settings_changed();
    }

    pub(super) fn uses_parent_material(&self) -> bool {
        self.config.use_parent_material || self.config.material.is_some()
    }

    fn update_all_items_material_state(&self) {
        let state = self.uses_parent_material();
        match lock(&self.servers.rendering, "rendering") {
            Ok(mut rs) => {
                for item in self.quadrants.values().flat_map(|q| q.canvas_items.iter()) {
                    rs.canvas_item_set_use_parent_material(*item, state);
                }
            }
            Err(e) => {
                engine_error!(SOURCE, "{}", e);
            }
        }
    }

    pub fn set_material(&mut self, material: Option<Rid>) {
        self.config.material = material;
        self.update_all_items_material_state();
        self.emit_settings_changed();
    }

    pub fn set_use_parent_material(&mut self, enable: bool) {
        self.config.use_parent_material = enable;
        self.update_all_items_material_state();
        self.emit_settings_changed();
    }

    // ===== WORLD =====

    pub fn is_in_world(&self) -> bool {
        self.world.is_some()
    }

    /// Attach to a canvas, physics space and optional navigation map, then
    /// rebuild every quadrant.
    pub fn enter_world(&mut self, binding: WorldBinding) {
        if self.config.use_parent {
            self.clear_quadrants();
        }
        let space = binding.space;
        if let Ok(mut rs) = lock(&self.servers.rendering, "rendering") {
            rs.canvas_item_set_sort_children_by_y(binding.canvas_item, self.config.y_sort);
        }
        self.world = Some(binding);
        self.pending_update = true;
        self.recreate_quadrants();
        self.update_dirty_quadrants();
        self.update_quadrant_transform();
        self.update_quadrant_space(space);
    }

    /// Detach from the world, dropping everything tied to it.
    pub fn exit_world(&mut self) {
        let Some(world) = self.world.clone() else {
            return;
        };
        self.update_quadrant_space(Rid::INVALID);
        let parent = self.collision_parent();

        if let Err(e) = self.release_world_handles(world.navigation.is_some(), parent.as_ref()) {
            engine_error!(SOURCE, "Leaving world: {}", e);
        }
        self.world = None;
        self.deferred_posted = false;
    }

    fn release_world_handles(
        &mut self,
        has_navigation: bool,
        parent: Option<&Arc<Mutex<dyn CollisionObjectHost>>>,
    ) -> Result<()> {
        let mut locked = LockedServers::acquire(&self.servers, parent)?;
        for q in self.quadrants.values_mut() {
            if has_navigation {
                for (_, region) in std::mem::take(&mut q.nav_regions) {
                    locked.navigation.free_rid(region.rid);
                }
            }
            if let (Some(parent), Some(owner)) = (locked.parent.as_mut(), q.shape_owner.take()) {
                parent.remove_shape_owner(owner);
            }
            for (_, occluder) in std::mem::take(&mut q.occluders) {
                locked.rendering.free_rid(occluder.rid);
            }
        }
        Ok(())
    }

    fn update_quadrant_space(&self, space: Rid) {
        self.for_each_body(|ps, body| ps.body_set_space(body, space));
    }

    fn update_quadrant_transform(&self) {
        if self.world.is_none() {
            return;
        }
        if let Err(e) = self.push_quadrant_transforms() {
            engine_error!(SOURCE, "Transform update: {}", e);
        }
    }

    /// Push the current global transform to bodies, regions and occluders.
    fn push_quadrant_transforms(&self) -> Result<()> {
        let mut locked = LockedServers::acquire(&self.servers, None)?;
        let nav_rel = self.navigation_relative().map(|(_, rel)| rel);
        for q in self.quadrants.values() {
            if !self.config.use_parent && q.body.is_valid() {
                let xform = self.global_transform * Affine2::from_translation(q.pos);
                locked.physics.body_set_state_transform(q.body, xform);
            }
            if let Some(nav_rel) = nav_rel {
                for region in q.nav_regions.values() {
                    locked.navigation.region_set_transform(region.rid, nav_rel * region.xform);
                }
            }
            for occluder in q.occluders.values() {
                let xform = self.global_transform * occluder.xform;
                locked.rendering.canvas_light_occluder_set_transform(occluder.rid, xform);
            }
        }
        Ok(())
    }

    pub fn global_transform(&self) -> Affine2 {
        self.global_transform
    }

    pub fn set_global_transform(&mut self, xform: Affine2) {
        self.global_transform = xform;
        self.update_quadrant_transform();
    }

    /// Transform relative to the parent; parent-owned shapes are placed with it.
    pub fn set_local_transform(&mut self, xform: Affine2) {
        self.local_transform = xform;
        if self.config.use_parent {
            self.recreate_quadrants();
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        match lock(&self.servers.rendering, "rendering") {
            Ok(mut rs) => {
                for occluder in self.quadrants.values().flat_map(|q| q.occluders.values()) {
                    rs.canvas_light_occluder_set_enabled(occluder.rid, visible);
                }
            }
            Err(e) => {
                engine_error!(SOURCE, "{}", e);
            }
        }
    }

    /// Advisory messages for the editor.
    pub fn configuration_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.config.use_parent && self.collision_parent().is_none() {
            warnings.push(USE_PARENT_WARNING.to_string());
        }
        warnings
    }
}

impl Drop for TileMap {
    fn drop(&mut self) {
        self.clear_quadrants();
    }
}

fn set_bit(bits: u32, bit: u32, value: bool) -> u32 {
    if value { bits | (1 << bit) } else { bits & !(1 << bit) }
}

/// Narrow a sub-tile coordinate to the 16 bits stored per axis.
fn narrow_autotile_coord(coord: IVec2) -> Result<(i16, i16)> {
    match (i16::try_from(coord.x), i16::try_from(coord.y)) {
        (Ok(x), Ok(y)) => Ok((x, y)),
        _ => Err(engine_err!(InvalidArgument: SOURCE, "Autotile coordinate {} is out of range.", coord)),
    }
}

/// Error returned when a rebuild hits an invalid handle.
pub(super) fn allocation_failed(what: &str) -> Error {
    Error::BackendError(format!("{} allocation failed", what))
}

#[cfg(test)]
#[path = "tile_map_tests.rs"]
mod tests;
