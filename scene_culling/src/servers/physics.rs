use glam::{Affine2, IVec2};
use super::Rid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    Static,
    Kinematic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyParam {
    Friction,
    Bounce,
}

/// Physics server commands used by tile map quadrants.
pub trait PhysicsServer: Send {
    fn body_create(&mut self) -> Rid;
    fn body_set_mode(&mut self, body: Rid, mode: BodyMode);
    fn body_attach_object_instance_id(&mut self, body: Rid, id: u64);
    fn body_set_space(&mut self, body: Rid, space: Rid);
    fn body_set_state_transform(&mut self, body: Rid, transform: Affine2);
    fn body_set_collision_layer(&mut self, body: Rid, layer: u32);
    fn body_set_collision_mask(&mut self, body: Rid, mask: u32);
    fn body_set_param(&mut self, body: Rid, param: BodyParam, value: f32);
    fn body_add_shape(&mut self, body: Rid, shape: Rid, transform: Affine2);
    fn body_set_shape_transform(&mut self, body: Rid, index: usize, transform: Affine2);
    fn body_set_shape_metadata(&mut self, body: Rid, index: usize, metadata: IVec2);
    fn body_set_shape_as_one_way_collision(&mut self, body: Rid, index: usize, enable: bool, margin: f32);
    fn body_clear_shapes(&mut self, body: Rid);
    fn area_set_shape_transform(&mut self, area: Rid, index: usize, transform: Affine2);
    fn free_rid(&mut self, rid: Rid);
}

/// Parent collision object that lends shape owners to a tile map using
/// its parent for collisions.
pub trait CollisionObjectHost: Send {
    /// Physics handle of the parent body or area.
    fn rid(&self) -> Rid;
    fn is_area(&self) -> bool;
    fn create_shape_owner(&mut self, owner_id: u64) -> u32;
    fn remove_shape_owner(&mut self, owner: u32);
    fn shape_owner_clear_shapes(&mut self, owner: u32);
    fn shape_owner_add_shape(&mut self, owner: u32, shape: Rid);
    fn shape_owner_shape_count(&self, owner: u32) -> usize;
    /// Index of the owner's `shape` in the parent's flat shape list.
    fn shape_owner_get_shape_index(&self, owner: u32, shape: usize) -> usize;
}
