/// Convex polygon helpers shared by rooms, portals, occluders and the PVS.

use glam::Vec3;
use crate::math::Plane;

/// Side of a clip plane a polygon lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonSide {
    /// Every vertex on or over the plane; the polygon can be culled
    Outside,
    /// Every vertex strictly under the plane
    Inside,
    Partial,
}

pub fn classify_polygon(plane: &Plane, points: &[Vec3]) -> PolygonSide {
    let mut over = 0;
    for &p in points {
        if plane.distance_to(p) >= 0.0 {
            over += 1;
        }
    }
    match over {
        0 => PolygonSide::Inside,
        n if n == points.len() => PolygonSide::Outside,
        _ => PolygonSide::Partial,
    }
}

/// True when some plane fully clips the polygon.
pub fn polygon_outside_any(planes: &[Plane], points: &[Vec3]) -> bool {
    planes
        .iter()
        .any(|plane| classify_polygon(plane, points) == PolygonSide::Outside)
}

/// True when the sphere lies entirely over at least one plane.
pub fn sphere_outside_any(planes: &[Plane], center: Vec3, radius: f32) -> bool {
    planes.iter().any(|plane| plane.distance_to(center) > radius)
}

/// True when the sphere lies entirely under every plane.
pub fn sphere_inside_all(planes: &[Plane], center: Vec3, radius: f32) -> bool {
    planes.iter().all(|plane| plane.distance_to(center) <= -radius)
}

pub fn centroid(points: &[Vec3]) -> Vec3 {
    if points.is_empty() {
        return Vec3::ZERO;
    }
    points.iter().copied().sum::<Vec3>() / points.len() as f32
}

/// Best-fit plane of a possibly non-planar polygon (Newell's method).
///
/// The normal follows the right-hand rule of the winding. Returns `None`
/// for degenerate (zero-area) polygons.
pub fn best_fit_plane(points: &[Vec3]) -> Option<Plane> {
    let mut normal = Vec3::ZERO;
    for (i, &a) in points.iter().enumerate() {
        let b = points[(i + 1) % points.len()];
        normal.x += (a.y - b.y) * (a.z + b.z);
        normal.y += (a.z - b.z) * (a.x + b.x);
        normal.z += (a.x - b.x) * (a.y + b.y);
    }
    let normal = normal.try_normalize()?;
    Some(Plane::from_point_normal(centroid(points), normal))
}

/// One plane per polygon edge through `eye`, oriented so the polygon
/// lies under each of them.
///
/// Edges collinear with the eye are skipped.
pub fn edge_planes(eye: Vec3, points: &[Vec3]) -> Vec<Plane> {
    let center = centroid(points);
    let mut planes = Vec::with_capacity(points.len());
    for (i, &a) in points.iter().enumerate() {
        let b = points[(i + 1) % points.len()];
        let Some(plane) = Plane::from_points(eye, a, b) else {
            continue;
        };
        if plane.distance_to(center) > 0.0 {
            planes.push(plane.flipped());
        } else {
            planes.push(plane);
        }
    }
    planes
}

/// Append `plane` unless a near-duplicate is already present.
pub fn push_unique_plane(planes: &mut Vec<Plane>, plane: Plane, normal_dot: f32, d_epsilon: f32) -> bool {
    if planes.iter().any(|p| p.is_similar(&plane, normal_dot, d_epsilon)) {
        return false;
    }
    planes.push(plane);
    true
}

#[cfg(test)]
#[path = "geometry_tests.rs"]
mod tests;
