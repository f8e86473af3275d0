/// Per-frame visibility: room traversal through portals, then occluders.

use glam::Vec3;
use slotmap::SlotMap;
use crate::math::Plane;
use super::camera::Camera;
use super::geometry::{edge_planes, polygon_outside_any, sphere_outside_any};
use super::occluder::WorldOccluder;
use super::room::{Portal, PortalKey, Room, RoomKey};
use super::scenario::{CullResult, Instance, InstanceKey, InstanceKind, PortalScenario};

/// Split borrows of a scenario for one traversal.
struct Traversal<'a> {
    rooms: &'a mut SlotMap<RoomKey, Room>,
    portals: &'a SlotMap<PortalKey, Portal>,
    instances: &'a mut SlotMap<InstanceKey, Instance>,
    occluders: Vec<&'a WorldOccluder>,
    /// Rooms the PVS allows, by creation index
    pvs_filter: Option<Vec<bool>>,
    eye: Vec3,
    tick: u64,
    max_depth: usize,
    result: CullResult,
}

impl Traversal<'_> {
    fn visit_room(&mut self, room: RoomKey, planes: &[Plane], depth: usize) {
        let Some(entry) = self.rooms.get_mut(room) else {
            return;
        };
        entry.stack_tick = self.tick;
        if entry.visited_tick != self.tick {
            entry.visited_tick = self.tick;
            self.result.rooms.push(room);
        }
        for &key in &entry.instances {
            test_candidate(self.instances, &self.occluders, self.eye, self.tick, planes, key, &mut self.result);
        }
        let exits = entry.portals.clone();

        if depth < self.max_depth {
            let portals = self.portals;
            for key in exits {
                let Some(portal) = portals.get(key) else {
                    continue;
                };
                if !portal.active {
                    continue;
                }
                let Some((dest, outgoing)) = portal.crossing_from(room) else {
                    continue;
                };
                // Back-facing: the eye is already past the portal plane
                if outgoing.distance_to(self.eye) > 0.0 {
                    continue;
                }
                let Some(dest_room) = self.rooms.get(dest) else {
                    continue;
                };
                if dest_room.stack_tick == self.tick {
                    continue;
                }
                if let Some(filter) = &self.pvs_filter {
                    if !filter.get(dest_room.index).copied().unwrap_or(false) {
                        continue;
                    }
                }
                if polygon_outside_any(planes, &portal.points) {
                    continue;
                }

                let mut clipped = planes.to_vec();
                clipped.extend(edge_planes(self.eye, &portal.points));
                clipped.push(outgoing.flipped());
                self.visit_room(dest, &clipped, depth + 1);
            }
        }

        if let Some(entry) = self.rooms.get_mut(room) {
            entry.stack_tick = 0;
        }
    }
}

/// Add `key` to the result if its bounding sphere survives the planes and
/// the occluders. Instances already found visible this tick are skipped.
fn test_candidate(
    instances: &mut SlotMap<InstanceKey, Instance>,
    occluders: &[&WorldOccluder],
    eye: Vec3,
    tick: u64,
    planes: &[Plane],
    key: InstanceKey,
    result: &mut CullResult,
) {
    let Some(instance) = instances.get_mut(key) else {
        return;
    };
    if instance.visible_tick == tick {
        return;
    }
    let center = instance.bounds.center();
    let radius = instance.bounds.bounding_radius();
    if sphere_outside_any(planes, center, radius)
        || planes.iter().any(|plane| plane.is_aabb_over(&instance.bounds))
    {
        return;
    }
    if occluders.iter().any(|occluder| occluder.occludes(eye, center, radius)) {
        return;
    }

    instance.visible_tick = tick;
    match instance.kind {
        InstanceKind::Ghost => result.ghosts.push(key),
        _ => result.instances.push(key),
    }
}

impl PortalScenario {
    fn begin_cull(&mut self) -> u64 {
        self.occluders_apply_pending();
        self.tick += 1;
        self.tick
    }

    /// Cull the scenario from `camera`.
    ///
    /// Applies pending occluder updates first. With the eye inside a room,
    /// rooms are walked depth-first through the portals the clip planes
    /// let through. With the eye outside every room, every instance is
    /// tested against the frustum and the occluders. Global instances are
    /// always tested against the camera frustum.
    pub fn cull(&mut self, camera: &Camera) -> CullResult {
        let (eye, planes) = match &self.camera_override {
            Some(custom) => (custom.position, custom.planes.clone()),
            None => (camera.position(), camera.frustum().planes().to_vec()),
        };

        let camera_room = self.find_room(eye, self.camera_room);
        self.camera_room = camera_room;
        let Some(start) = camera_room else {
            let mut result = self.cull_all(eye, &planes);
            result.camera_room = None;
            return result;
        };

        let tick = self.begin_cull();
        let pvs_filter = match (&self.pvs, self.config.use_pvs) {
            (Some(pvs), true) => {
                let mut filter = vec![false; self.room_order.len()];
                for &index in pvs.visible_from(self.rooms[start].index) {
                    if let Some(slot) = filter.get_mut(index as usize) {
                        *slot = true;
                    }
                }
                Some(filter)
            }
            _ => None,
        };

        let occluders = self
            .occluder_instances
            .values()
            .filter(|instance| instance.is_enabled())
            .map(|instance| &instance.world)
            .collect();
        let mut traversal = Traversal {
            rooms: &mut self.rooms,
            portals: &self.portals,
            instances: &mut self.instances,
            occluders,
            pvs_filter,
            eye,
            tick,
            max_depth: self.config.max_depth,
            result: CullResult {
                camera_room,
                ..CullResult::default()
            },
        };
        traversal.visit_room(start, &planes, 0);

        let frustum = camera.frustum().planes();
        let globals: Vec<InstanceKey> = traversal
            .instances
            .iter()
            .filter(|(_, instance)| instance.kind == InstanceKind::Global)
            .map(|(key, _)| key)
            .collect();
        for key in globals {
            test_candidate(
                traversal.instances,
                &traversal.occluders,
                camera.position(),
                tick,
                frustum,
                key,
                &mut traversal.result,
            );
        }

        traversal.result
    }

    /// Frustum and occluder culling of every instance, ignoring rooms.
    pub fn occlusion_cull(&mut self, camera: &Camera) -> CullResult {
        let planes = camera.frustum().planes().to_vec();
        self.cull_all(camera.position(), &planes)
    }

    fn cull_all(&mut self, eye: Vec3, planes: &[Plane]) -> CullResult {
        let tick = self.begin_cull();
        let keys: Vec<InstanceKey> = self.instances.keys().collect();
        let occluders: Vec<&WorldOccluder> = self
            .occluder_instances
            .values()
            .filter(|instance| instance.is_enabled())
            .map(|instance| &instance.world)
            .collect();

        let mut result = CullResult::default();
        for key in keys {
            test_candidate(&mut self.instances, &occluders, eye, tick, planes, key, &mut result);
        }
        result
    }
}
