/// Rooms and the portals joining them.

use glam::Vec3;
use slotmap::new_key_type;
use crate::math::{Plane, AABB};
use super::geometry::centroid;
use super::InstanceKey;

const VERTEX_EPSILON: f32 = 0.001;

// ===== SLOT MAP KEYS =====

new_key_type! {
    /// Stable key for a room within a scenario.
    pub struct RoomKey;

    /// Stable key for a portal within a scenario.
    pub struct PortalKey;
}

// ===== ROOM =====

/// Convex volume; the interior lies under every plane.
#[derive(Debug, Clone)]
pub struct Room {
    pub(super) planes: Vec<Plane>,
    /// Corners found by intersecting plane triples, empty when unbounded
    pub(super) vertices: Vec<Vec3>,
    pub(super) bounds: Option<AABB>,
    pub(super) portals: Vec<PortalKey>,
    pub(super) instances: Vec<InstanceKey>,
    /// Position in the scenario's creation order, used by the PVS
    pub(super) index: usize,
    /// Cull tick while this room is on the traversal stack
    pub(super) stack_tick: u64,
    /// Last cull tick that reached this room
    pub(super) visited_tick: u64,
}

impl Room {
    pub(super) fn new(planes: Vec<Plane>, index: usize) -> Self {
        let vertices = convex_hull_vertices(&planes);
        let bounds = AABB::from_points(&vertices);
        Self {
            planes,
            vertices,
            bounds,
            portals: Vec::new(),
            instances: Vec::new(),
            index,
            stack_tick: 0,
            visited_tick: 0,
        }
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn bounds(&self) -> Option<AABB> {
        self.bounds
    }

    pub fn portals(&self) -> &[PortalKey] {
        &self.portals
    }

    pub fn instances(&self) -> &[InstanceKey] {
        &self.instances
    }

    /// Largest signed distance to any bounding plane.
    pub fn max_distance(&self, point: Vec3) -> f32 {
        self.planes
            .iter()
            .map(|plane| plane.distance_to(point))
            .fold(f32::NEG_INFINITY, f32::max)
    }

    /// Strictly inside: every signed distance is negative.
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.max_distance(point) < 0.0
    }

    /// Center of the generated corners, `None` for unbounded rooms.
    pub fn center(&self) -> Option<Vec3> {
        (!self.vertices.is_empty()).then(|| centroid(&self.vertices))
    }
}

/// Corners of the convex volume bounded by `planes`.
fn convex_hull_vertices(planes: &[Plane]) -> Vec<Vec3> {
    let mut vertices: Vec<Vec3> = Vec::new();
    for i in 0..planes.len() {
        for j in (i + 1)..planes.len() {
            for k in (j + 1)..planes.len() {
                let Some(point) = planes[i].intersect_3(&planes[j], &planes[k]) else {
                    continue;
                };
                let inside = planes.iter().all(|p| p.distance_to(point) <= VERTEX_EPSILON);
                let duplicate = vertices.iter().any(|v| v.distance(point) <= VERTEX_EPSILON);
                if inside && !duplicate {
                    vertices.push(point);
                }
            }
        }
    }
    vertices
}

// ===== PORTAL =====

/// Convex polygon joining two rooms.
///
/// The plane normal is the outgoing direction: it points out of `from`
/// and into `to`.
#[derive(Debug, Clone)]
pub struct Portal {
    pub(super) points: Vec<Vec3>,
    pub(super) plane: Plane,
    pub(super) from: RoomKey,
    pub(super) to: RoomKey,
    pub(super) two_way: bool,
    pub(super) active: bool,
}

impl Portal {
    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn plane(&self) -> Plane {
        self.plane
    }

    pub fn from_room(&self) -> RoomKey {
        self.from
    }

    pub fn to_room(&self) -> RoomKey {
        self.to
    }

    pub fn is_two_way(&self) -> bool {
        self.two_way
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Destination and outgoing plane when leaving `room` through this
    /// portal, `None` if the portal cannot be crossed from there.
    pub fn crossing_from(&self, room: RoomKey) -> Option<(RoomKey, Plane)> {
        if room == self.from {
            Some((self.to, self.plane))
        } else if room == self.to && self.two_way {
            Some((self.from, self.plane.flipped()))
        } else {
            None
        }
    }
}
