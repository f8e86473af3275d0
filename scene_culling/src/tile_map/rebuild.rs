/// Quadrant rebuild pass.
///
/// Every dirty quadrant drops the handles it owns and recreates them from
/// its cells: one canvas item per (material, z) bucket, body shapes (or
/// parent shape-owner shapes), navigation regions and light occluders.

use std::sync::{Arc, Mutex, MutexGuard};
use glam::{Affine2, IVec2, Vec2};
use crate::error::Result;
use crate::math::{untranslated, Color, Rect2};
use crate::servers::{
    lock, CollisionObjectHost, NavigationServer, PhysicsServer, RenderingServer, Rid, ServerSet,
    TextureRect,
};
use crate::{engine_debug, engine_error};
use super::cell_transform::CellFlags;
use super::quadrant::{PlacedHandle, PosKey, Quadrant};
use super::tile_map::{allocation_failed, TileMap, TileMapEvent, WorldBinding};
use super::tile_set::{Tile, TileSet, TileShape};

const SOURCE: &str = "culling::TileMap";

const CANVAS_ITEM_Z_MAX: i32 = 4096;
const DEBUG_COLLISION_COLOR: Color = Color::new(0.0, 0.6, 0.7, 0.42);
const DEBUG_NAVIGATION_COLOR: Color = Color::new(0.1, 1.0, 0.7, 0.4);

// ===== LOCKED SERVERS =====

/// Server guards locked in this field order. Every path holding more than
/// one server at a time goes through here.
pub(super) struct LockedServers<'a> {
    pub(super) rendering: MutexGuard<'a, dyn RenderingServer + 'static>,
    pub(super) physics: MutexGuard<'a, dyn PhysicsServer + 'static>,
    pub(super) navigation: MutexGuard<'a, dyn NavigationServer + 'static>,
    pub(super) parent: Option<MutexGuard<'a, dyn CollisionObjectHost + 'static>>,
}

impl<'a> LockedServers<'a> {
    pub(super) fn acquire(
        servers: &'a ServerSet,
        parent: Option<&'a Arc<Mutex<dyn CollisionObjectHost>>>,
    ) -> Result<Self> {
        let rendering = lock(&servers.rendering, "rendering")?;
        let physics = lock(&servers.physics, "physics")?;
        let navigation = lock(&servers.navigation, "navigation")?;
        let parent = match parent {
            Some(p) => Some(lock(&**p, "collision parent")?),
            None => None,
        };
        Ok(Self { rendering, physics, navigation, parent })
    }
}

/// Free the derived handles of a quadrant. The body and shape owner survive
/// with their shapes cleared.
fn release_contents(q: &mut Quadrant, locked: &mut LockedServers<'_>, use_parent: bool) {
    for item in q.canvas_items.drain(..) {
        locked.rendering.free_rid(item);
    }
    if !use_parent {
        if q.body.is_valid() {
            locked.physics.body_clear_shapes(q.body);
        }
    } else if let (Some(parent), Some(owner)) = (locked.parent.as_mut(), q.shape_owner) {
        parent.shape_owner_clear_shapes(owner);
    }
    for (_, region) in std::mem::take(&mut q.nav_regions) {
        locked.navigation.free_rid(region.rid);
    }
    for (_, occluder) in std::mem::take(&mut q.occluders) {
        locked.rendering.free_rid(occluder.rid);
    }
}

/// One stored cell resolved against the tile set.
struct DrawEntry<'t> {
    key: PosKey,
    flags: CellFlags,
    coord: IVec2,
    tile: &'t Tile,
    z: i32,
}

impl TileMap {
    /// Rebuild every dirty quadrant in queue order.
    ///
    /// Does nothing while outside a world or without a tile set; the dirty
    /// list is kept for the next pass. A quadrant whose rebuild hits an
    /// invalid handle releases what it created, is marked degraded and is
    /// queued again.
    pub fn update_dirty_quadrants(&mut self) {
        if !self.pending_update {
            return;
        }
        self.deferred_posted = false;
        let (Some(world), Some(tile_set)) = (self.world.clone(), self.tile_set.clone()) else {
            self.pending_update = false;
            return;
        };

        let servers = self.servers.clone();
        let parent = self.collision_parent();
        let mut locked = match LockedServers::acquire(&servers, parent.as_ref()) {
            Ok(locked) => locked,
            Err(e) => {
                engine_error!(SOURCE, "Rebuild skipped: {}", e);
                return;
            }
        };

        let dirty = std::mem::take(&mut self.dirty_list);
        let mut retry = Vec::new();
        for key in dirty {
            let Some(mut q) = self.quadrants.remove(&key) else {
                continue;
            };
            q.dirty = false;
            match self.rebuild_quadrant(&mut q, key, &world, &tile_set, &mut locked) {
                Ok(()) => q.degraded = false,
                Err(e) => {
                    engine_error!(SOURCE, "Quadrant {:?} rebuild aborted: {}", key, e);
                    release_contents(&mut q, &mut locked, self.config.use_parent);
                    q.degraded = true;
                    retry.push(key);
                }
            }
            self.quadrants.insert(key, q);
            self.quadrant_order_dirty = true;
        }

        if self.quadrant_order_dirty {
            let mut index = i32::MIN;
            for item in self.quadrants.values().flat_map(|q| q.canvas_items.iter()) {
                locked.rendering.canvas_item_set_draw_index(*item, index);
                index = index.wrapping_add(1);
            }
            self.quadrant_order_dirty = false;
        }
        drop(locked);

        self.pending_update = false;
        if !retry.is_empty() {
            for key in &retry {
                if let Some(q) = self.quadrants.get_mut(key) {
                    q.dirty = true;
                    self.dirty_list.push_back(*key);
                }
            }
            self.pending_update = true;
            self.deferred_posted = true;
            engine_debug!(SOURCE, "{} quadrants queued for retry", retry.len());
        }

        self.recompute_rect_cache();
    }

    fn rebuild_quadrant(
        &self,
        q: &mut Quadrant,
        key: PosKey,
        world: &WorldBinding,
        tile_set: &TileSet,
        locked: &mut LockedServers<'_>,
    ) -> Result<()> {
        let use_parent = self.config.use_parent;
        release_contents(q, locked, use_parent);

        if !use_parent && !q.body.is_valid() {
            q.body = self.create_body(&mut *locked.physics, q.pos);
            if !q.body.is_valid() {
                return Err(allocation_failed("physics body"));
            }
        }

        let mut entries: Vec<DrawEntry<'_>> = q
            .cells
            .iter()
            .filter_map(|cell_key| {
                let cell = self.cells.get(cell_key)?;
                let tile = tile_set.tile(cell.id)?;
                let coord = cell.autotile_coord();
                let mut z = tile.z_index;
                if tile.is_subtiled() {
                    z += tile.autotile.z_index(coord);
                }
                Some(DrawEntry { key: *cell_key, flags: cell.flags, coord, tile, z })
            })
            .collect();
        entries.sort_by(|a, b| {
            a.z.cmp(&b.z)
                .then(a.tile.material.cmp(&b.tile.material))
                .then(a.key.cmp(&b.key))
        });

        let placement = self.placement();
        let draw_offset = self.config.grid.cell_draw_offset();
        let navigation = self.navigation_relative();

        let mut bucket: Option<(Option<Rid>, i32)> = None;
        let mut canvas_item = Rid::INVALID;
        let mut debug_item = Rid::INVALID;
        let mut shape_index = 0usize;

        for entry in entries {
            let tile = entry.tile;
            // Cells without a texture contribute nothing
            let Some(texture) = tile.texture else {
                continue;
            };
            if bucket != Some((tile.material, entry.z)) {
                canvas_item = self.open_canvas_item(q, world, tile.material, entry.z, locked)?;
                debug_item = if self.config.show_collision {
                    open_debug_item(q, canvas_item, CANVAS_ITEM_Z_MAX - 1, locked)?
                } else {
                    Rid::INVALID
                };
                bucket = Some((tile.material, entry.z));
            }

            let offset = self.config.grid.map_to_world(entry.key.as_ivec2(), false) - q.pos + draw_offset;
            let region = tile.subtile_region(entry.coord);
            let size = if region != Rect2::default() {
                region.size
            } else {
                texture.size
            };

            // ----- texture -----
            let rect = placement.tile_rect(offset, size, tile.texture_offset, entry.flags);
            locked.rendering.canvas_item_add_texture_rect(canvas_item, &TextureRect {
                rect,
                texture: texture.rid,
                source: (region != Rect2::default()).then_some(region),
                modulate: tile.modulate * self.config.self_modulate,
                transpose: entry.flags.transpose,
                normal_map: tile.normal_map,
                clip_uv: self.config.clip_uv,
            });

            // ----- collision shapes -----
            let single = !tile.is_subtiled();
            for shape in tile.shapes.iter().filter(|s| single || s.autotile_coord == entry.coord) {
                let mut xform = Affine2::from_translation(offset.floor());
                placement.fix_cell_transform(&mut xform, entry.flags, shape.transform.translation, size);
                xform = xform * untranslated(&shape.transform);

                if debug_item.is_valid() && !shape.shape.outline.is_empty() {
                    let outline: Vec<Vec2> =
                        shape.shape.outline.iter().map(|p| xform.transform_point2(*p)).collect();
                    locked.rendering.canvas_item_add_polygon(debug_item, &outline, DEBUG_COLLISION_COLOR);
                }

                if shape.shape.decomposed.is_empty() {
                    self.add_shape(q, entry.key, shape.shape.rid, shape, xform, &mut shape_index, locked);
                } else {
                    for part in &shape.shape.decomposed {
                        self.add_shape(q, entry.key, *part, shape, xform, &mut shape_index, locked);
                    }
                }
            }

            // ----- navigation -----
            if let Some((map, nav_rel)) = navigation {
                let (navpoly, navpoly_offset) = if tile.is_subtiled() {
                    (tile.autotile.navigation_polygon(entry.coord), Vec2::ZERO)
                } else {
                    (tile.navigation.as_ref(), tile.navigation_offset)
                };
                if let Some(navpoly) = navpoly {
                    let mut xform = Affine2::from_translation(offset.floor() + q.pos);
                    placement.fix_cell_transform(&mut xform, entry.flags, navpoly_offset, size);

                    let region = locked.navigation.region_create();
                    if !region.is_valid() {
                        return Err(allocation_failed("navigation region"));
                    }
                    locked.navigation.region_set_map(region, map);
                    locked.navigation.region_set_transform(region, nav_rel * xform);
                    locked.navigation.region_set_navpoly(region, navpoly.rid);
                    q.nav_regions.insert(entry.key, PlacedHandle { rid: region, xform });

                    if self.config.show_navigation {
                        let item = open_debug_item(q, canvas_item, CANVAS_ITEM_Z_MAX - 2, locked)?;
                        for polygon in &navpoly.polygons {
                            let points: Vec<Vec2> = polygon
                                .iter()
                                .filter_map(|i| navpoly.vertices.get(*i).copied())
                                .collect();
                            locked.rendering.canvas_item_add_polygon(item, &points, DEBUG_NAVIGATION_COLOR);
                        }
                        let mut debug_xform = Affine2::from_translation(offset.floor());
                        placement.fix_cell_transform(&mut debug_xform, entry.flags, navpoly_offset, size);
                        locked.rendering.canvas_item_set_transform(item, debug_xform);
                    }
                }
            }

            // ----- light occluder -----
            let occluder = if tile.is_subtiled() {
                tile.autotile.light_occluder(entry.coord)
            } else {
                tile.occluder.as_ref()
            };
            if let Some(occluder) = occluder {
                let mut xform = Affine2::from_translation(offset.floor() + q.pos);
                placement.fix_cell_transform(&mut xform, entry.flags, tile.occluder_offset, size);

                let rid = locked.rendering.canvas_light_occluder_create();
                if !rid.is_valid() {
                    return Err(allocation_failed("light occluder"));
                }
                locked.rendering.canvas_light_occluder_set_transform(rid, self.global_transform * xform);
                locked.rendering.canvas_light_occluder_set_polygon(rid, occluder.rid);
                locked.rendering.canvas_light_occluder_attach_to_canvas(rid, world.canvas);
                locked.rendering.canvas_light_occluder_set_light_mask(rid, self.config.occluder_light_mask);
                locked.rendering.canvas_light_occluder_set_enabled(rid, self.visible);
                q.occluders.insert(entry.key, PlacedHandle { rid, xform });
            }
        }

        Ok(())
    }

    /// Start a new (material, z) bucket.
    fn open_canvas_item(
        &self,
        q: &mut Quadrant,
        world: &WorldBinding,
        material: Option<Rid>,
        z: i32,
        locked: &mut LockedServers<'_>,
    ) -> Result<Rid> {
        let rs = &mut locked.rendering;
        let item = rs.canvas_item_create();
        if !item.is_valid() {
            return Err(allocation_failed("canvas item"));
        }
        if material.is_some() {
            rs.canvas_item_set_material(item, material);
        }
        rs.canvas_item_set_parent(item, world.canvas_item);
        rs.canvas_item_set_use_parent_material(item, self.uses_parent_material());
        rs.canvas_item_set_transform(item, Affine2::from_translation(q.pos));
        rs.canvas_item_set_light_mask(item, self.config.light_mask);
        rs.canvas_item_set_z_index(item, z);
        q.canvas_items.push(item);
        Ok(item)
    }

    /// Add one collision shape for the cell at `cell`, either to the
    /// quadrant body or to the parent's shape owner.
    #[allow(clippy::too_many_arguments)]
    fn add_shape(
        &self,
        q: &Quadrant,
        cell: PosKey,
        shape_rid: Rid,
        shape: &TileShape,
        xform: Affine2,
        shape_index: &mut usize,
        locked: &mut LockedServers<'_>,
    ) {
        let metadata = cell.as_ivec2();
        if !self.config.use_parent {
            let ps = &mut locked.physics;
            ps.body_add_shape(q.body, shape_rid, xform);
            ps.body_set_shape_metadata(q.body, *shape_index, metadata);
            ps.body_set_shape_as_one_way_collision(q.body, *shape_index, shape.one_way, shape.one_way_margin);
        } else if let (Some(parent), Some(owner)) = (locked.parent.as_mut(), q.shape_owner) {
            let mut xform = xform;
            xform.translation += q.pos;
            let xform = self.local_transform * xform;

            parent.shape_owner_add_shape(owner, shape_rid);
            let real_index = parent.shape_owner_get_shape_index(owner, *shape_index);
            let parent_rid = parent.rid();
            let ps = &mut locked.physics;
            if parent.is_area() {
                ps.area_set_shape_transform(parent_rid, real_index, xform);
            } else {
                ps.body_set_shape_transform(parent_rid, real_index, xform);
                ps.body_set_shape_metadata(parent_rid, real_index, metadata);
                ps.body_set_shape_as_one_way_collision(parent_rid, real_index, shape.one_way, shape.one_way_margin);
            }
        }
        *shape_index += 1;
    }

    /// Recompute the union of quadrant bounds and announce it.
    pub(super) fn recompute_rect_cache(&mut self) {
        if !self.rect_cache_dirty {
            return;
        }
        let size = self.effective_quadrant_size();
        let mut merged: Option<Rect2> = None;
        for key in self.quadrants.keys() {
            let base = key.as_ivec2() * size;
            let mut rect = Rect2::from_position_size(self.map_to_world(base, true), Vec2::ZERO);
            rect.expand_to(self.map_to_world(base + IVec2::new(size, 0), true));
            rect.expand_to(self.map_to_world(base + IVec2::new(size, size), true));
            rect.expand_to(self.map_to_world(base + IVec2::new(0, size), true));
            merged = Some(match merged {
                Some(m) => m.merge(&rect),
                None => rect,
            });
        }
        self.rect_cache = merged.unwrap_or_default();
        self.rect_cache_dirty = false;
        let rect = self.rect_cache;
        self.events.emit(&TileMapEvent::ItemRectChanged(rect));
    }
}

/// Child item for debug drawing, drawn above everything else.
fn open_debug_item(q: &mut Quadrant, parent: Rid, z: i32, locked: &mut LockedServers<'_>) -> Result<Rid> {
    let rs = &mut locked.rendering;
    let item = rs.canvas_item_create();
    if !item.is_valid() {
        return Err(allocation_failed("debug canvas item"));
    }
    rs.canvas_item_set_parent(item, parent);
    rs.canvas_item_set_z_as_relative_to_parent(item, false);
    rs.canvas_item_set_z_index(item, z);
    q.canvas_items.push(item);
    Ok(item)
}
