/// Camera as the portal culler sees it: an eye and a frustum.
///
/// The caller owns the real camera and its matrices. Culling only reads
/// the clip planes and the eye position that portal planes fan out from.

use glam::{Mat4, Vec3};
use crate::math::{Frustum, Plane};

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    frustum: Frustum,
    position: Vec3,
}

impl Camera {
    pub fn new(frustum: Frustum, position: Vec3) -> Self {
        Self { frustum, position }
    }

    /// Derive the frustum from `projection * view` and the eye position
    /// from the inverse view matrix.
    pub fn from_view_projection(view: Mat4, projection: Mat4) -> Self {
        let frustum = Frustum::from_view_projection(&(projection * view));
        let position = view.inverse().w_axis.truncate();
        Self::new(frustum, position)
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    pub fn planes(&self) -> &[Plane] {
        self.frustum.planes()
    }

    /// Eye position in world space.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Move the eye without touching the frustum, e.g. for a camera
    /// detached from its culling volume while debugging.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }
}

#[cfg(test)]
#[path = "camera_tests.rs"]
mod tests;
