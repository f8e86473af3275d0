use glam::{Affine2, Vec2};
use image::RgbaImage;
use crate::math::{Color, Rect2};
use super::Rid;

/// One textured quad appended to a canvas item.
///
/// `source` selects a texture region; `None` draws the whole texture.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureRect {
    pub rect: Rect2,
    pub texture: Rid,
    pub source: Option<Rect2>,
    pub modulate: Color,
    pub transpose: bool,
    pub normal_map: Option<Rid>,
    pub clip_uv: bool,
}

/// Rendering server commands used by the tile map and the preview cache.
pub trait RenderingServer: Send {
    // ===== CANVAS ITEMS =====

    fn canvas_item_create(&mut self) -> Rid;
    fn canvas_item_set_parent(&mut self, item: Rid, parent: Rid);
    fn canvas_item_set_material(&mut self, item: Rid, material: Option<Rid>);
    fn canvas_item_set_use_parent_material(&mut self, item: Rid, enable: bool);
    fn canvas_item_set_transform(&mut self, item: Rid, transform: Affine2);
    fn canvas_item_set_light_mask(&mut self, item: Rid, mask: u32);
    fn canvas_item_set_z_index(&mut self, item: Rid, z: i32);
    fn canvas_item_set_z_as_relative_to_parent(&mut self, item: Rid, relative: bool);
    fn canvas_item_set_sort_children_by_y(&mut self, item: Rid, enable: bool);
    fn canvas_item_set_draw_index(&mut self, item: Rid, index: i32);
    fn canvas_item_add_texture_rect(&mut self, item: Rid, rect: &TextureRect);
    fn canvas_item_add_polygon(&mut self, item: Rid, points: &[Vec2], color: Color);
    fn canvas_item_clear(&mut self, item: Rid);

    // ===== LIGHT OCCLUDERS =====

    fn canvas_light_occluder_create(&mut self) -> Rid;
    fn canvas_light_occluder_attach_to_canvas(&mut self, occluder: Rid, canvas: Rid);
    fn canvas_light_occluder_set_polygon(&mut self, occluder: Rid, polygon: Rid);
    fn canvas_light_occluder_set_transform(&mut self, occluder: Rid, transform: Affine2);
    fn canvas_light_occluder_set_enabled(&mut self, occluder: Rid, enabled: bool);
    fn canvas_light_occluder_set_light_mask(&mut self, occluder: Rid, mask: u32);

    // ===== TEXTURES =====

    fn texture_create_from_image(&mut self, image: &RgbaImage) -> Rid;

    /// Flush work queued by other threads.
    fn sync(&mut self);

    fn free_rid(&mut self, rid: Rid);
}
