use glam::Vec3;
use super::AABB;

const CMP_EPSILON: f32 = 0.00001;

/// Plane `normal · p = d`.
///
/// The signed distance of a point is `normal · p - d`; positive means the
/// point is *over* the plane. Room boundaries and clip planes both use the
/// convention that the kept volume lies under every plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    pub const fn new(normal: Vec3, d: f32) -> Self {
        Self { normal, d }
    }

    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        Self { normal, d: normal.dot(point) }
    }

    /// Plane through three points, normal by the right-hand rule of `a → b → c`.
    ///
    /// Returns `None` for collinear points.
    pub fn from_points(a: Vec3, b: Vec3, c: Vec3) -> Option<Self> {
        let normal = (b - a).cross(c - a).try_normalize()?;
        Some(Self::from_point_normal(a, normal))
    }

    pub fn distance_to(&self, point: Vec3) -> f32 {
        self.normal.dot(point) - self.d
    }

    pub fn is_point_over(&self, point: Vec3) -> bool {
        self.distance_to(point) > 0.0
    }

    pub fn flipped(&self) -> Plane {
        Plane::new(-self.normal, -self.d)
    }

    /// Orthogonal projection of `point` onto the plane.
    pub fn project(&self, point: Vec3) -> Vec3 {
        point - self.normal * self.distance_to(point)
    }

    /// True if the whole box lies over the plane.
    pub fn is_aabb_over(&self, aabb: &AABB) -> bool {
        let n = self.normal;
        let nearest = Vec3::new(
            if n.x >= 0.0 { aabb.min.x } else { aabb.max.x },
            if n.y >= 0.0 { aabb.min.y } else { aabb.max.y },
            if n.z >= 0.0 { aabb.min.z } else { aabb.max.z },
        );
        self.distance_to(nearest) > 0.0
    }

    /// Near-duplicate test used to coalesce generated planes.
    pub fn is_similar(&self, other: &Plane, normal_dot: f32, d_epsilon: f32) -> bool {
        self.normal.dot(other.normal) >= normal_dot && (self.d - other.d).abs() < d_epsilon
    }

    /// Intersection point of three planes, `None` when two are parallel.
    pub fn intersect_3(&self, p2: &Plane, p3: &Plane) -> Option<Vec3> {
        let n0 = self.normal;
        let n1 = p2.normal;
        let n2 = p3.normal;
        let denom = n0.cross(n1).dot(n2);
        if denom.abs() <= CMP_EPSILON {
            return None;
        }
        Some((n1.cross(n2) * self.d + n2.cross(n0) * p2.d + n0.cross(n1) * p3.d) / denom)
    }
}

#[cfg(test)]
#[path = "plane_tests.rs"]
mod tests;
