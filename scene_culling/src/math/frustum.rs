/// Six camera clip planes.
///
/// Planes follow the `Plane` convention: the visible volume lies *under*
/// every plane (`normal · p - d <= 0`), so a frustum can seed the portal
/// culler's clip-plane stack directly.

use glam::{Mat4, Vec3, Vec4};
use super::Plane;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far; normals point out of the volume
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract the planes of a view-projection matrix (Gribb & Hartmann).
    ///
    /// Works for perspective and orthographic projections.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let m = vp.to_cols_array_2d();
        let row = |i: usize| Vec4::new(m[0][i], m[1][i], m[2][i], m[3][i]);
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        // Each combination is an inward (A, B, C, D) with Ax + By + Cz + D >= 0 inside
        let inward = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r3 + r2, r3 - r2];
        let planes = inward.map(|p| {
            let len = p.truncate().length();
            let p = if len > 0.0 { p / len } else { p };
            Plane::new(-p.truncate(), p.w)
        });

        Self { planes }
    }

    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|p| p.distance_to(point) <= 0.0)
    }
}

#[cfg(test)]
#[path = "frustum_tests.rs"]
mod tests;
