/// Occluder resources and their placed instances.
///
/// A resource is shared geometry: a bundle of spheres or a planar polygon
/// mesh. Instances place a resource in the world; each keeps a world-space
/// copy of the geometry so culling never re-transforms it per candidate.

use glam::{Mat4, Vec3};
use slotmap::new_key_type;
use crate::error::Result;
use crate::math::Plane;
use crate::engine_bail;
use super::geometry::{best_fit_plane, edge_planes, sphere_inside_all, sphere_outside_any};

const SOURCE: &str = "culling::PortalScenario";

/// Eye distances below this from a face plane are treated as on the plane.
const FACE_EPSILON: f32 = 0.001;

// ===== SLOT MAP KEYS =====

new_key_type! {
    /// Stable key for occluder geometry.
    pub struct OccluderResourceKey;

    /// Stable key for a placed occluder.
    pub struct OccluderInstanceKey;
}

// ===== GEOMETRY =====

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccluderSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl OccluderSphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }
}

/// Convex polygon of an occluder mesh, with optional convex holes.
#[derive(Debug, Clone, PartialEq)]
pub struct OccluderFace {
    pub indices: Vec<u32>,
    pub holes: Vec<Vec<u32>>,
    /// One-way faces only occlude when the eye is over their plane
    pub two_way: bool,
    plane: Plane,
}

impl OccluderFace {
    pub fn new(indices: Vec<u32>, two_way: bool) -> Self {
        Self {
            indices,
            holes: Vec::new(),
            two_way,
            plane: Plane::default(),
        }
    }

    pub fn with_hole(mut self, hole: Vec<u32>) -> Self {
        self.holes.push(hole);
        self
    }

    /// Local-space plane, filled in when the mesh is staged.
    pub fn plane(&self) -> Plane {
        self.plane
    }
}

/// Polygon faces sharing one vertex array.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OccluderMesh {
    pub vertices: Vec<Vec3>,
    pub faces: Vec<OccluderFace>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum OccluderShape {
    #[default]
    None,
    Spheres(Vec<OccluderSphere>),
    Mesh(OccluderMesh),
}

impl OccluderShape {
    /// Check the geometry and compute face planes.
    pub(super) fn validated(self) -> Result<Self> {
        match self {
            OccluderShape::None => Ok(OccluderShape::None),
            OccluderShape::Spheres(spheres) => {
                if let Some(bad) = spheres.iter().find(|s| s.radius.is_nan() || s.radius < 0.0) {
                    engine_bail!(InvalidArgument: SOURCE, "Occluder sphere radius must be positive, got {}", bad.radius);
                }
                Ok(OccluderShape::Spheres(spheres))
            }
            OccluderShape::Mesh(mut mesh) => {
                let count = mesh.vertices.len();
                for (i, face) in mesh.faces.iter_mut().enumerate() {
                    let loops = std::iter::once(&face.indices).chain(face.holes.iter());
                    for indices in loops {
                        if indices.len() < 3 {
                            engine_bail!(InvalidArgument: SOURCE, "Occluder face {} has fewer than 3 indices", i);
                        }
                        if let Some(&index) = indices.iter().find(|&&index| index as usize >= count) {
                            engine_bail!(InvalidArgument: SOURCE, "Occluder face {} index {} out of range ({} vertices)", i, index, count);
                        }
                    }
                    let points = gather(&mesh.vertices, &face.indices);
                    let Some(plane) = best_fit_plane(&points) else {
                        engine_bail!(InvalidArgument: SOURCE, "Occluder face {} is degenerate", i);
                    };
                    face.plane = plane;
                }
                Ok(OccluderShape::Mesh(mesh))
            }
        }
    }
}

fn gather(vertices: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    indices.iter().map(|&i| vertices[i as usize]).collect()
}

// ===== RESOURCE / INSTANCE =====

#[derive(Debug, Clone, Default)]
pub struct OccluderResource {
    pub(super) shape: OccluderShape,
    /// Bumped every time a staged update lands
    pub(super) version: u64,
}

impl OccluderResource {
    pub fn shape(&self) -> &OccluderShape {
        &self.shape
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone)]
pub struct OccluderInstance {
    pub(super) resource: OccluderResourceKey,
    pub(super) transform: Mat4,
    pub(super) active: bool,
    /// Detached instances are kept but never cull
    pub(super) attached: bool,
    pub(super) world: WorldOccluder,
}

impl OccluderInstance {
    pub(super) fn new(resource: OccluderResourceKey, transform: Mat4) -> Self {
        Self {
            resource,
            transform,
            active: true,
            attached: true,
            world: WorldOccluder::Empty,
        }
    }

    pub fn resource(&self) -> OccluderResourceKey {
        self.resource
    }

    pub fn transform(&self) -> &Mat4 {
        &self.transform
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub(super) fn is_enabled(&self) -> bool {
        self.active && self.attached
    }

    pub fn world(&self) -> &WorldOccluder {
        &self.world
    }
}

// ===== WORLD SPACE =====

#[derive(Debug, Clone, PartialEq)]
pub struct WorldFace {
    pub points: Vec<Vec3>,
    pub plane: Plane,
    pub holes: Vec<Vec<Vec3>>,
    pub two_way: bool,
}

/// Occluder geometry transformed into world space.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WorldOccluder {
    #[default]
    Empty,
    Spheres(Vec<OccluderSphere>),
    Faces(Vec<WorldFace>),
}

impl WorldOccluder {
    pub fn from_shape(shape: &OccluderShape, transform: &Mat4) -> Self {
        match shape {
            OccluderShape::None => WorldOccluder::Empty,
            OccluderShape::Spheres(spheres) => {
                let scale = max_axis_scale(transform);
                WorldOccluder::Spheres(
                    spheres
                        .iter()
                        .map(|s| OccluderSphere::new(transform.transform_point3(s.center), s.radius * scale))
                        .collect(),
                )
            }
            OccluderShape::Mesh(mesh) => {
                let vertices: Vec<Vec3> = mesh
                    .vertices
                    .iter()
                    .map(|&v| transform.transform_point3(v))
                    .collect();
                let faces = mesh
                    .faces
                    .iter()
                    .filter_map(|face| {
                        let points = gather(&vertices, &face.indices);
                        // A collapsing transform can flatten a valid face
                        let plane = best_fit_plane(&points)?;
                        Some(WorldFace {
                            points,
                            plane,
                            holes: face.holes.iter().map(|hole| gather(&vertices, hole)).collect(),
                            two_way: face.two_way,
                        })
                    })
                    .collect();
                WorldOccluder::Faces(faces)
            }
        }
    }

    /// True when the sphere `(center, radius)` is hidden from `eye`.
    pub fn occludes(&self, eye: Vec3, center: Vec3, radius: f32) -> bool {
        match self {
            WorldOccluder::Empty => false,
            WorldOccluder::Spheres(spheres) => spheres
                .iter()
                .any(|occluder| sphere_occludes(occluder, eye, center, radius)),
            WorldOccluder::Faces(faces) => faces
                .iter()
                .any(|face| face_occludes(face, eye, center, radius)),
        }
    }
}

fn max_axis_scale(transform: &Mat4) -> f32 {
    transform
        .x_axis
        .truncate()
        .length()
        .max(transform.y_axis.truncate().length())
        .max(transform.z_axis.truncate().length())
}

/// The candidate is either swallowed by the occluder sphere or sits in
/// its shadow cone as seen from the eye.
fn sphere_occludes(occluder: &OccluderSphere, eye: Vec3, center: Vec3, radius: f32) -> bool {
    let to_occluder = occluder.center - eye;
    let occluder_dist = to_occluder.length();
    if occluder_dist <= occluder.radius {
        // Eye inside the occluder
        return false;
    }

    if center.distance(occluder.center) + radius <= occluder.radius {
        return true;
    }

    let to_candidate = center - eye;
    let candidate_dist = to_candidate.length();
    if candidate_dist - radius < occluder_dist || candidate_dist <= radius {
        return false;
    }

    let occluder_angle = (occluder.radius / occluder_dist).asin();
    let candidate_angle = (radius / candidate_dist).min(1.0).asin();
    let between = to_occluder.angle_between(to_candidate);
    between + candidate_angle <= occluder_angle
}

/// The candidate lies beyond the face, inside the volume swept from the
/// eye through its edges, and cannot be seen through any hole.
fn face_occludes(face: &WorldFace, eye: Vec3, center: Vec3, radius: f32) -> bool {
    let eye_side = face.plane.distance_to(eye);
    if eye_side.abs() < FACE_EPSILON || (eye_side < 0.0 && !face.two_way) {
        return false;
    }

    // Under `beyond` is the side facing away from the eye
    let beyond = if eye_side > 0.0 { face.plane } else { face.plane.flipped() };
    if beyond.distance_to(center) > -radius {
        return false;
    }

    if !sphere_inside_all(&edge_planes(eye, &face.points), center, radius) {
        return false;
    }

    face.holes
        .iter()
        .all(|hole| sphere_outside_any(&edge_planes(eye, hole), center, radius))
}

#[cfg(test)]
#[path = "occluder_tests.rs"]
mod tests;
