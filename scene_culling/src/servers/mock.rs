//! Recording server mocks (no backend required)
//!
//! Every command is appended to `commands` as a string, live handles are
//! tracked so tests can check for leaks, and allocations can be told to
//! fail to exercise the degraded paths.

use glam::{Affine2, IVec2, Vec2};
use image::RgbaImage;
use rustc_hash::{FxHashMap, FxHashSet};
use crate::math::{Color, Rect2};
use super::{
    BodyMode, BodyParam, CollisionObjectHost, NavigationServer, PhysicsServer, RenderingServer,
    Rid, TextureRect,
};

// ============================================================================
// Handle allocator
// ============================================================================

#[derive(Debug)]
struct HandleAllocator {
    next: u64,
    live: FxHashSet<Rid>,
    fail_allocations: bool,
}

impl HandleAllocator {
    fn new(base: u64) -> Self {
        Self { next: base, live: FxHashSet::default(), fail_allocations: false }
    }

    fn allocate(&mut self) -> Rid {
        if self.fail_allocations {
            return Rid::INVALID;
        }
        self.next += 1;
        let rid = Rid::from_raw(self.next);
        self.live.insert(rid);
        rid
    }

    fn free(&mut self, rid: Rid) -> bool {
        self.live.remove(&rid)
    }
}

// ============================================================================
// Mock rendering server
// ============================================================================

/// State recorded for one canvas item.
#[derive(Debug, Clone, Default)]
pub struct MockCanvasItem {
    pub parent: Rid,
    pub material: Option<Rid>,
    pub use_parent_material: bool,
    pub transform: Affine2,
    pub light_mask: u32,
    pub z_index: i32,
    pub z_relative: bool,
    pub sort_children_by_y: bool,
    pub draw_index: i32,
    pub rects: Vec<TextureRect>,
    pub polygons: Vec<(Vec<Vec2>, Color)>,
}

/// State recorded for one light occluder.
#[derive(Debug, Clone, Default)]
pub struct MockOccluder {
    pub canvas: Rid,
    pub polygon: Rid,
    pub transform: Affine2,
    pub enabled: bool,
    pub light_mask: u32,
}

#[derive(Debug)]
pub struct MockRenderingServer {
    pub commands: Vec<String>,
    pub canvas_items: FxHashMap<Rid, MockCanvasItem>,
    pub occluders: FxHashMap<Rid, MockOccluder>,
    pub textures: FxHashMap<Rid, (u32, u32)>,
    pub sync_count: usize,
    handles: HandleAllocator,
}

impl MockRenderingServer {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            canvas_items: FxHashMap::default(),
            occluders: FxHashMap::default(),
            textures: FxHashMap::default(),
            sync_count: 0,
            handles: HandleAllocator::new(0),
        }
    }

    /// Make every following allocation return `Rid::INVALID`.
    pub fn set_fail_allocations(&mut self, fail: bool) {
        self.handles.fail_allocations = fail;
    }

    pub fn live_handle_count(&self) -> usize {
        self.handles.live.len()
    }

    pub fn is_live(&self, rid: Rid) -> bool {
        self.handles.live.contains(&rid)
    }

    /// Handle-independent dump of every canvas item parented to `parent`,
    /// in draw-index order. Two equal snapshots draw the same picture.
    pub fn render_snapshot(&self, parent: Rid) -> Vec<String> {
        let mut items: Vec<&MockCanvasItem> = self
            .canvas_items
            .values()
            .filter(|item| item.parent == parent)
            .collect();
        items.sort_by_key(|item| item.draw_index);
        items
            .iter()
            .map(|item| {
                let rects: Vec<String> = item
                    .rects
                    .iter()
                    .map(|r| format!(
                        "{:?}+{:?} src={:?} t={} uv={}",
                        r.rect.position, r.rect.size, r.source, r.transpose, r.clip_uv
                    ))
                    .collect();
                format!(
                    "z={} mat={:?} origin={:?} [{}]",
                    item.z_index,
                    item.material.map(|m| m.raw()),
                    item.transform.translation,
                    rects.join("; ")
                )
            })
            .collect()
    }

    fn item_mut(&mut self, item: Rid) -> Option<&mut MockCanvasItem> {
        self.canvas_items.get_mut(&item)
    }
}

impl Default for MockRenderingServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderingServer for MockRenderingServer {
    fn canvas_item_create(&mut self) -> Rid {
        let rid = self.handles.allocate();
        self.commands.push(format!("canvas_item_create -> {}", rid.raw()));
        if rid.is_valid() {
            self.canvas_items.insert(rid, MockCanvasItem::default());
        }
        rid
    }

    fn canvas_item_set_parent(&mut self, item: Rid, parent: Rid) {
        self.commands.push(format!("canvas_item_set_parent {} {}", item.raw(), parent.raw()));
        if let Some(i) = self.item_mut(item) {
            i.parent = parent;
        }
    }

    fn canvas_item_set_material(&mut self, item: Rid, material: Option<Rid>) {
        self.commands.push(format!("canvas_item_set_material {}", item.raw()));
        if let Some(i) = self.item_mut(item) {
            i.material = material;
        }
    }

    fn canvas_item_set_use_parent_material(&mut self, item: Rid, enable: bool) {
        self.commands.push(format!("canvas_item_set_use_parent_material {} {}", item.raw(), enable));
        if let Some(i) = self.item_mut(item) {
            i.use_parent_material = enable;
        }
    }

    fn canvas_item_set_transform(&mut self, item: Rid, transform: Affine2) {
        self.commands.push(format!("canvas_item_set_transform {}", item.raw()));
        if let Some(i) = self.item_mut(item) {
            i.transform = transform;
        }
    }

    fn canvas_item_set_light_mask(&mut self, item: Rid, mask: u32) {
        self.commands.push(format!("canvas_item_set_light_mask {} {}", item.raw(), mask));
        if let Some(i) = self.item_mut(item) {
            i.light_mask = mask;
        }
    }

    fn canvas_item_set_z_index(&mut self, item: Rid, z: i32) {
        self.commands.push(format!("canvas_item_set_z_index {} {}", item.raw(), z));
        if let Some(i) = self.item_mut(item) {
            i.z_index = z;
        }
    }

    fn canvas_item_set_z_as_relative_to_parent(&mut self, item: Rid, relative: bool) {
        self.commands.push(format!("canvas_item_set_z_as_relative_to_parent {} {}", item.raw(), relative));
        if let Some(i) = self.item_mut(item) {
            i.z_relative = relative;
        }
    }

    fn canvas_item_set_sort_children_by_y(&mut self, item: Rid, enable: bool) {
        self.commands.push(format!("canvas_item_set_sort_children_by_y {} {}", item.raw(), enable));
        if let Some(i) = self.item_mut(item) {
            i.sort_children_by_y = enable;
        }
    }

    fn canvas_item_set_draw_index(&mut self, item: Rid, index: i32) {
        self.commands.push(format!("canvas_item_set_draw_index {} {}", item.raw(), index));
        if let Some(i) = self.item_mut(item) {
            i.draw_index = index;
        }
    }

    fn canvas_item_add_texture_rect(&mut self, item: Rid, rect: &TextureRect) {
        self.commands.push(format!("canvas_item_add_texture_rect {}", item.raw()));
        if let Some(i) = self.item_mut(item) {
            i.rects.push(rect.clone());
        }
    }

    fn canvas_item_add_polygon(&mut self, item: Rid, points: &[Vec2], color: Color) {
        self.commands.push(format!("canvas_item_add_polygon {} {}", item.raw(), points.len()));
        if let Some(i) = self.item_mut(item) {
            i.polygons.push((points.to_vec(), color));
        }
    }

    fn canvas_item_clear(&mut self, item: Rid) {
        self.commands.push(format!("canvas_item_clear {}", item.raw()));
        if let Some(i) = self.item_mut(item) {
            i.rects.clear();
            i.polygons.clear();
        }
    }

    fn canvas_light_occluder_create(&mut self) -> Rid {
        let rid = self.handles.allocate();
        self.commands.push(format!("canvas_light_occluder_create -> {}", rid.raw()));
        if rid.is_valid() {
            self.occluders.insert(rid, MockOccluder::default());
        }
        rid
    }

    fn canvas_light_occluder_attach_to_canvas(&mut self, occluder: Rid, canvas: Rid) {
        self.commands.push(format!("canvas_light_occluder_attach_to_canvas {} {}", occluder.raw(), canvas.raw()));
        if let Some(o) = self.occluders.get_mut(&occluder) {
            o.canvas = canvas;
        }
    }

    fn canvas_light_occluder_set_polygon(&mut self, occluder: Rid, polygon: Rid) {
        self.commands.push(format!("canvas_light_occluder_set_polygon {} {}", occluder.raw(), polygon.raw()));
        if let Some(o) = self.occluders.get_mut(&occluder) {
            o.polygon = polygon;
        }
    }

    fn canvas_light_occluder_set_transform(&mut self, occluder: Rid, transform: Affine2) {
        self.commands.push(format!("canvas_light_occluder_set_transform {}", occluder.raw()));
        if let Some(o) = self.occluders.get_mut(&occluder) {
            o.transform = transform;
        }
    }

    fn canvas_light_occluder_set_enabled(&mut self, occluder: Rid, enabled: bool) {
        self.commands.push(format!("canvas_light_occluder_set_enabled {} {}", occluder.raw(), enabled));
        if let Some(o) = self.occluders.get_mut(&occluder) {
            o.enabled = enabled;
        }
    }

    fn canvas_light_occluder_set_light_mask(&mut self, occluder: Rid, mask: u32) {
        self.commands.push(format!("canvas_light_occluder_set_light_mask {} {}", occluder.raw(), mask));
        if let Some(o) = self.occluders.get_mut(&occluder) {
            o.light_mask = mask;
        }
    }

    fn texture_create_from_image(&mut self, image: &RgbaImage) -> Rid {
        let rid = self.handles.allocate();
        self.commands.push(format!(
            "texture_create_from_image {}x{} -> {}",
            image.width(),
            image.height(),
            rid.raw()
        ));
        if rid.is_valid() {
            self.textures.insert(rid, (image.width(), image.height()));
        }
        rid
    }

    fn sync(&mut self) {
        self.sync_count += 1;
    }

    fn free_rid(&mut self, rid: Rid) {
        self.commands.push(format!("free_rid {}", rid.raw()));
        if self.handles.free(rid) {
            self.canvas_items.remove(&rid);
            self.occluders.remove(&rid);
            self.textures.remove(&rid);
        }
    }
}

// ============================================================================
// Mock physics server
// ============================================================================

/// State recorded for one body.
#[derive(Debug, Clone)]
pub struct MockBody {
    pub mode: BodyMode,
    pub instance_id: u64,
    pub space: Rid,
    pub transform: Affine2,
    pub layer: u32,
    pub mask: u32,
    pub friction: f32,
    pub bounce: f32,
    pub shapes: Vec<MockShapeSlot>,
}

#[derive(Debug, Clone)]
pub struct MockShapeSlot {
    pub shape: Rid,
    pub transform: Affine2,
    pub metadata: IVec2,
    pub one_way: bool,
    pub one_way_margin: f32,
}

#[derive(Debug)]
pub struct MockPhysicsServer {
    pub commands: Vec<String>,
    pub bodies: FxHashMap<Rid, MockBody>,
    /// Shape transforms pushed onto parent-owned shapes (`rid`, index).
    pub shape_transforms: FxHashMap<(Rid, usize), Affine2>,
    handles: HandleAllocator,
}

impl MockPhysicsServer {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            bodies: FxHashMap::default(),
            shape_transforms: FxHashMap::default(),
            handles: HandleAllocator::new(1 << 32),
        }
    }

    pub fn set_fail_allocations(&mut self, fail: bool) {
        self.handles.fail_allocations = fail;
    }

    pub fn live_body_count(&self) -> usize {
        self.bodies.len()
    }

    fn body_mut(&mut self, body: Rid) -> Option<&mut MockBody> {
        self.bodies.get_mut(&body)
    }
}

impl Default for MockPhysicsServer {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsServer for MockPhysicsServer {
    fn body_create(&mut self) -> Rid {
        let rid = self.handles.allocate();
        self.commands.push(format!("body_create -> {}", rid.raw()));
        if rid.is_valid() {
            self.bodies.insert(rid, MockBody {
                mode: BodyMode::Static,
                instance_id: 0,
                space: Rid::INVALID,
                transform: Affine2::IDENTITY,
                layer: 1,
                mask: 1,
                friction: 1.0,
                bounce: 0.0,
                shapes: Vec::new(),
            });
        }
        rid
    }

    fn body_set_mode(&mut self, body: Rid, mode: BodyMode) {
        self.commands.push(format!("body_set_mode {} {:?}", body.raw(), mode));
        if let Some(b) = self.body_mut(body) {
            b.mode = mode;
        }
    }

    fn body_attach_object_instance_id(&mut self, body: Rid, id: u64) {
        self.commands.push(format!("body_attach_object_instance_id {} {}", body.raw(), id));
        if let Some(b) = self.body_mut(body) {
            b.instance_id = id;
        }
    }

    fn body_set_space(&mut self, body: Rid, space: Rid) {
        self.commands.push(format!("body_set_space {} {}", body.raw(), space.raw()));
        if let Some(b) = self.body_mut(body) {
            b.space = space;
        }
    }

    fn body_set_state_transform(&mut self, body: Rid, transform: Affine2) {
        self.commands.push(format!("body_set_state_transform {}", body.raw()));
        if let Some(b) = self.body_mut(body) {
            b.transform = transform;
        }
    }

    fn body_set_collision_layer(&mut self, body: Rid, layer: u32) {
        self.commands.push(format!("body_set_collision_layer {} {}", body.raw(), layer));
        if let Some(b) = self.body_mut(body) {
            b.layer = layer;
        }
    }

    fn body_set_collision_mask(&mut self, body: Rid, mask: u32) {
        self.commands.push(format!("body_set_collision_mask {} {}", body.raw(), mask));
        if let Some(b) = self.body_mut(body) {
            b.mask = mask;
        }
    }

    fn body_set_param(&mut self, body: Rid, param: BodyParam, value: f32) {
        self.commands.push(format!("body_set_param {} {:?} {}", body.raw(), param, value));
        if let Some(b) = self.body_mut(body) {
            match param {
                BodyParam::Friction => b.friction = value,
                BodyParam::Bounce => b.bounce = value,
            }
        }
    }

    fn body_add_shape(&mut self, body: Rid, shape: Rid, transform: Affine2) {
        self.commands.push(format!("body_add_shape {} {}", body.raw(), shape.raw()));
        if let Some(b) = self.body_mut(body) {
            b.shapes.push(MockShapeSlot {
                shape,
                transform,
                metadata: IVec2::ZERO,
                one_way: false,
                one_way_margin: 0.0,
            });
        }
    }

    fn body_set_shape_transform(&mut self, body: Rid, index: usize, transform: Affine2) {
        self.commands.push(format!("body_set_shape_transform {} {}", body.raw(), index));
        self.shape_transforms.insert((body, index), transform);
        if let Some(slot) = self.body_mut(body).and_then(|b| b.shapes.get_mut(index)) {
            slot.transform = transform;
        }
    }

    fn body_set_shape_metadata(&mut self, body: Rid, index: usize, metadata: IVec2) {
        self.commands.push(format!("body_set_shape_metadata {} {} {:?}", body.raw(), index, metadata));
        if let Some(slot) = self.body_mut(body).and_then(|b| b.shapes.get_mut(index)) {
            slot.metadata = metadata;
        }
    }

    fn body_set_shape_as_one_way_collision(&mut self, body: Rid, index: usize, enable: bool, margin: f32) {
        self.commands.push(format!("body_set_shape_as_one_way_collision {} {} {}", body.raw(), index, enable));
        if let Some(slot) = self.body_mut(body).and_then(|b| b.shapes.get_mut(index)) {
            slot.one_way = enable;
            slot.one_way_margin = margin;
        }
    }

    fn body_clear_shapes(&mut self, body: Rid) {
        self.commands.push(format!("body_clear_shapes {}", body.raw()));
        if let Some(b) = self.body_mut(body) {
            b.shapes.clear();
        }
    }

    fn area_set_shape_transform(&mut self, area: Rid, index: usize, transform: Affine2) {
        self.commands.push(format!("area_set_shape_transform {} {}", area.raw(), index));
        self.shape_transforms.insert((area, index), transform);
    }

    fn free_rid(&mut self, rid: Rid) {
        self.commands.push(format!("free_rid {}", rid.raw()));
        if self.handles.free(rid) {
            self.bodies.remove(&rid);
        }
    }
}

// ============================================================================
// Mock navigation server
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MockRegion {
    pub map: Rid,
    pub transform: Affine2,
    pub navpoly: Rid,
}

#[derive(Debug)]
pub struct MockNavigationServer {
    pub commands: Vec<String>,
    pub regions: FxHashMap<Rid, MockRegion>,
    handles: HandleAllocator,
}

impl MockNavigationServer {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            regions: FxHashMap::default(),
            handles: HandleAllocator::new(2 << 32),
        }
    }

    pub fn set_fail_allocations(&mut self, fail: bool) {
        self.handles.fail_allocations = fail;
    }

    pub fn live_region_count(&self) -> usize {
        self.regions.len()
    }
}

impl Default for MockNavigationServer {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationServer for MockNavigationServer {
    fn region_create(&mut self) -> Rid {
        let rid = self.handles.allocate();
        self.commands.push(format!("region_create -> {}", rid.raw()));
        if rid.is_valid() {
            self.regions.insert(rid, MockRegion::default());
        }
        rid
    }

    fn region_set_map(&mut self, region: Rid, map: Rid) {
        self.commands.push(format!("region_set_map {} {}", region.raw(), map.raw()));
        if let Some(r) = self.regions.get_mut(&region) {
            r.map = map;
        }
    }

    fn region_set_transform(&mut self, region: Rid, transform: Affine2) {
        self.commands.push(format!("region_set_transform {}", region.raw()));
        if let Some(r) = self.regions.get_mut(&region) {
            r.transform = transform;
        }
    }

    fn region_set_navpoly(&mut self, region: Rid, navpoly: Rid) {
        self.commands.push(format!("region_set_navpoly {} {}", region.raw(), navpoly.raw()));
        if let Some(r) = self.regions.get_mut(&region) {
            r.navpoly = navpoly;
        }
    }

    fn free_rid(&mut self, rid: Rid) {
        self.commands.push(format!("free_rid {}", rid.raw()));
        if self.handles.free(rid) {
            self.regions.remove(&rid);
        }
    }
}

// ============================================================================
// Mock collision object
// ============================================================================

/// Parent collision object with a flat shape list split across owners.
#[derive(Debug)]
pub struct MockCollisionObject {
    rid: Rid,
    area: bool,
    next_owner: u32,
    /// owner → (owner id, shapes)
    owners: std::collections::BTreeMap<u32, (u64, Vec<Rid>)>,
}

impl MockCollisionObject {
    pub fn new(rid: Rid, area: bool) -> Self {
        Self { rid, area, next_owner: 0, owners: Default::default() }
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    pub fn total_shape_count(&self) -> usize {
        self.owners.values().map(|(_, shapes)| shapes.len()).sum()
    }
}

impl CollisionObjectHost for MockCollisionObject {
    fn rid(&self) -> Rid {
        self.rid
    }

    fn is_area(&self) -> bool {
        self.area
    }

    fn create_shape_owner(&mut self, owner_id: u64) -> u32 {
        let owner = self.next_owner;
        self.next_owner += 1;
        self.owners.insert(owner, (owner_id, Vec::new()));
        owner
    }

    fn remove_shape_owner(&mut self, owner: u32) {
        self.owners.remove(&owner);
    }

    fn shape_owner_clear_shapes(&mut self, owner: u32) {
        if let Some((_, shapes)) = self.owners.get_mut(&owner) {
            shapes.clear();
        }
    }

    fn shape_owner_add_shape(&mut self, owner: u32, shape: Rid) {
        if let Some((_, shapes)) = self.owners.get_mut(&owner) {
            shapes.push(shape);
        }
    }

    fn shape_owner_shape_count(&self, owner: u32) -> usize {
        self.owners.get(&owner).map_or(0, |(_, shapes)| shapes.len())
    }

    fn shape_owner_get_shape_index(&self, owner: u32, shape: usize) -> usize {
        let before: usize = self
            .owners
            .range(..owner)
            .map(|(_, (_, shapes))| shapes.len())
            .sum();
        before + shape
    }
}

#[cfg(test)]
#[path = "mock_tests.rs"]
mod tests;
