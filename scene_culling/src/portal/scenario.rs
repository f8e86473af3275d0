/// Portal scenario: rooms, portals, culled instances and occluders.
///
/// A scenario owns every object the portal culler reasons about. Objects
/// are addressed by slot map keys that stay valid until their own removal.

use glam::{Mat4, Vec3};
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};
use crate::error::Result;
use crate::math::{Plane, AABB};
use crate::{engine_bail, engine_debug};
use super::geometry::best_fit_plane;
use super::occluder::{
    OccluderInstance, OccluderInstanceKey, OccluderMesh, OccluderResource, OccluderResourceKey,
    OccluderShape, OccluderSphere, WorldOccluder,
};
use super::pvs::Pvs;
use super::room::{Portal, PortalKey, Room, RoomKey};

pub(super) const SOURCE: &str = "culling::PortalScenario";

// ===== SLOT MAP KEYS =====

new_key_type! {
    /// Stable key for a culled instance.
    pub struct InstanceKey;
}

// ===== CONFIG =====

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalConfig {
    /// Maximum number of portals crossed from the camera room
    pub max_depth: usize,
    /// Restrict traversal to the rooms the PVS marks visible
    pub use_pvs: bool,
    /// Plane-constant tolerance of PVS plane generation
    pub pvs_plane_epsilon: f32,
    /// Normal dot above which two PVS planes are coalesced
    pub pvs_normal_dot: f32,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            max_depth: 8,
            use_pvs: false,
            pvs_plane_epsilon: 0.001,
            pvs_normal_dot: 0.98,
        }
    }
}

// ===== INSTANCES =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceKind {
    /// Assigned to a room once, at creation or by `instance_set_room`
    Static,
    /// Re-finds its room whenever its bounds change
    Roaming,
    /// Belongs to no room; tested against the camera frustum only
    Global,
    /// Tracked like a roaming instance but reported separately
    Ghost,
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub(super) bounds: AABB,
    pub(super) kind: InstanceKind,
    pub(super) room: Option<RoomKey>,
    /// Last cull tick that found this instance visible
    pub(super) visible_tick: u64,
}

impl Instance {
    pub fn bounds(&self) -> AABB {
        self.bounds
    }

    pub fn kind(&self) -> InstanceKind {
        self.kind
    }

    pub fn room(&self) -> Option<RoomKey> {
        self.room
    }

    fn tracks_rooms(&self) -> bool {
        matches!(self.kind, InstanceKind::Roaming | InstanceKind::Ghost)
    }
}

/// Replacement eye and clip planes for room traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraOverride {
    pub position: Vec3,
    pub planes: Vec<Plane>,
}

/// Output of one cull.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CullResult {
    /// Visible static, roaming and global instances
    pub instances: Vec<InstanceKey>,
    /// Visible ghost instances
    pub ghosts: Vec<InstanceKey>,
    /// Rooms reached, in traversal order
    pub rooms: Vec<RoomKey>,
    /// Room holding the eye, `None` when it is outside every room
    pub camera_room: Option<RoomKey>,
}

// ===== SCENARIO =====

pub struct PortalScenario {
    pub(super) config: PortalConfig,
    pub(super) rooms: SlotMap<RoomKey, Room>,
    /// Creation order; a room's `index` is its position here
    pub(super) room_order: Vec<RoomKey>,
    pub(super) portals: SlotMap<PortalKey, Portal>,
    pub(super) instances: SlotMap<InstanceKey, Instance>,
    pub(super) occluder_resources: SlotMap<OccluderResourceKey, OccluderResource>,
    pub(super) occluder_instances: SlotMap<OccluderInstanceKey, OccluderInstance>,
    /// Staged resource geometry, swapped in by `occluders_apply_pending`
    pending_occluders: FxHashMap<OccluderResourceKey, OccluderShape>,
    pub(super) pvs: Option<Pvs>,
    pub(super) camera_override: Option<CameraOverride>,
    pub(super) camera_room: Option<RoomKey>,
    pub(super) tick: u64,
}

impl PortalScenario {
    pub fn new(config: PortalConfig) -> Result<Self> {
        if config.pvs_plane_epsilon.is_nan() || config.pvs_plane_epsilon <= 0.0 {
            engine_bail!(InvalidArgument: SOURCE, "PVS plane epsilon must be positive, got {}", config.pvs_plane_epsilon);
        }
        if !(0.0..=1.0).contains(&config.pvs_normal_dot) {
            engine_bail!(InvalidArgument: SOURCE, "PVS normal dot must be within [0, 1], got {}", config.pvs_normal_dot);
        }
        Ok(Self {
            config,
            rooms: SlotMap::with_key(),
            room_order: Vec::new(),
            portals: SlotMap::with_key(),
            instances: SlotMap::with_key(),
            occluder_resources: SlotMap::with_key(),
            occluder_instances: SlotMap::with_key(),
            pending_occluders: FxHashMap::default(),
            pvs: None,
            camera_override: None,
            camera_room: None,
            tick: 0,
        })
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn set_use_pvs(&mut self, use_pvs: bool) {
        self.config.use_pvs = use_pvs;
    }

    fn invalidate_pvs(&mut self) {
        if self.pvs.take().is_some() {
            engine_debug!(SOURCE, "Room topology changed, PVS discarded");
        }
    }

    // ===== ROOMS =====

    /// Create a convex room. The interior lies under every plane.
    pub fn room_create(&mut self, planes: Vec<Plane>) -> Result<RoomKey> {
        if planes.is_empty() {
            engine_bail!(InvalidArgument: SOURCE, "A room needs at least one plane");
        }
        let key = self.rooms.insert(Room::new(planes, self.room_order.len()));
        self.room_order.push(key);
        self.invalidate_pvs();

        // Roaming objects may now fall inside the new room
        self.relocate_roaming();
        Ok(key)
    }

    /// Remove a room together with every portal touching it.
    pub fn room_remove(&mut self, room: RoomKey) -> Result<()> {
        let Some(removed) = self.rooms.remove(room) else {
            engine_bail!(InvalidResource: SOURCE, "Unknown room {:?}", room);
        };

        let attached: Vec<PortalKey> = self
            .portals
            .iter()
            .filter(|(_, portal)| portal.from == room || portal.to == room)
            .map(|(key, _)| key)
            .collect();
        for portal in attached {
            self.detach_portal(portal);
        }

        for key in removed.instances {
            if let Some(instance) = self.instances.get_mut(key) {
                instance.room = None;
            }
        }

        self.room_order.retain(|&key| key != room);
        for (index, &key) in self.room_order.iter().enumerate() {
            self.rooms[key].index = index;
        }
        if self.camera_room == Some(room) {
            self.camera_room = None;
        }
        self.invalidate_pvs();
        self.relocate_roaming();
        Ok(())
    }

    pub fn room(&self, room: RoomKey) -> Option<&Room> {
        self.rooms.get(room)
    }

    /// Rooms in creation order.
    pub fn rooms(&self) -> impl Iterator<Item = (RoomKey, &Room)> {
        self.room_order.iter().map(|&key| (key, &self.rooms[key]))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Room strictly containing `point`, trying `hint` first.
    pub fn find_room(&self, point: Vec3, hint: Option<RoomKey>) -> Option<RoomKey> {
        if let Some(hint) = hint {
            if self.rooms.get(hint).is_some_and(|room| room.contains_point(point)) {
                return Some(hint);
            }
        }
        self.room_order
            .iter()
            .copied()
            .find(|&key| Some(key) != hint && self.rooms[key].contains_point(point))
    }

    // ===== PORTALS =====

    /// Create a portal from `from` into `to`.
    ///
    /// Needs at least 3 points. Non-planar input is projected onto its
    /// best-fit plane. The outgoing normal follows the winding, and is
    /// flipped if it would point back into a bounded `from` room.
    pub fn portal_create(&mut self, points: &[Vec3], from: RoomKey, to: RoomKey, two_way: bool) -> Result<PortalKey> {
        if points.len() < 3 {
            engine_bail!(InvalidArgument: SOURCE, "A portal needs at least 3 points, got {}", points.len());
        }
        if !self.rooms.contains_key(from) || !self.rooms.contains_key(to) {
            engine_bail!(InvalidResource: SOURCE, "Portal rooms {:?} -> {:?} are not both registered", from, to);
        }
        if from == to {
            engine_bail!(InvalidArgument: SOURCE, "A portal cannot lead back into its own room");
        }
        let Some(mut plane) = best_fit_plane(points) else {
            engine_bail!(InvalidArgument: SOURCE, "Portal polygon is degenerate");
        };

        let mut projected: Vec<Vec3> = points.iter().map(|&p| plane.project(p)).collect();
        let points_back = self.rooms[from]
            .center()
            .is_some_and(|center| plane.distance_to(center) > 0.0);
        if points_back {
            plane = plane.flipped();
            projected.reverse();
        }

        let key = self.portals.insert(Portal {
            points: projected,
            plane,
            from,
            to,
            two_way,
            active: true,
        });
        self.rooms[from].portals.push(key);
        self.rooms[to].portals.push(key);
        self.invalidate_pvs();
        Ok(key)
    }

    fn detach_portal(&mut self, portal: PortalKey) -> Option<Portal> {
        let removed = self.portals.remove(portal)?;
        for room in [removed.from, removed.to] {
            if let Some(room) = self.rooms.get_mut(room) {
                room.portals.retain(|&key| key != portal);
            }
        }
        Some(removed)
    }

    pub fn portal_remove(&mut self, portal: PortalKey) -> Result<()> {
        if self.detach_portal(portal).is_none() {
            engine_bail!(InvalidResource: SOURCE, "Unknown portal {:?}", portal);
        }
        self.invalidate_pvs();
        Ok(())
    }

    /// Inactive portals are never crossed at cull time.
    pub fn portal_set_active(&mut self, portal: PortalKey, active: bool) -> Result<()> {
        let Some(portal) = self.portals.get_mut(portal) else {
            engine_bail!(InvalidResource: SOURCE, "Unknown portal {:?}", portal);
        };
        portal.active = active;
        Ok(())
    }

    pub fn portal(&self, portal: PortalKey) -> Option<&Portal> {
        self.portals.get(portal)
    }

    pub fn portal_count(&self) -> usize {
        self.portals.len()
    }

    // ===== INSTANCES =====

    /// Register a culled object. Every kind but `Global` is placed in the
    /// room holding the center of its bounds.
    pub fn instance_create(&mut self, bounds: AABB, kind: InstanceKind) -> InstanceKey {
        let room = match kind {
            InstanceKind::Global => None,
            _ => self.find_room(bounds.center(), None),
        };
        let key = self.instances.insert(Instance {
            bounds,
            kind,
            room,
            visible_tick: 0,
        });
        if let Some(room) = room {
            self.rooms[room].instances.push(key);
        }
        key
    }

    pub fn instance_remove(&mut self, instance: InstanceKey) -> Result<()> {
        let Some(removed) = self.instances.remove(instance) else {
            engine_bail!(InvalidResource: SOURCE, "Unknown instance {:?}", instance);
        };
        if let Some(room) = removed.room.and_then(|room| self.rooms.get_mut(room)) {
            room.instances.retain(|&key| key != instance);
        }
        Ok(())
    }

    /// Move an instance. Roaming and ghost instances re-find their room,
    /// starting from the one they were in.
    pub fn instance_set_bounds(&mut self, instance: InstanceKey, bounds: AABB) -> Result<()> {
        let Some(entry) = self.instances.get_mut(instance) else {
            engine_bail!(InvalidResource: SOURCE, "Unknown instance {:?}", instance);
        };
        entry.bounds = bounds;
        if entry.tracks_rooms() {
            let previous = entry.room;
            let found = self.find_room(bounds.center(), previous);
            self.move_instance(instance, previous, found);
        }
        Ok(())
    }

    /// Pin an instance to a room, or to none.
    pub fn instance_set_room(&mut self, instance: InstanceKey, room: Option<RoomKey>) -> Result<()> {
        let Some(entry) = self.instances.get(instance) else {
            engine_bail!(InvalidResource: SOURCE, "Unknown instance {:?}", instance);
        };
        if entry.kind == InstanceKind::Global && room.is_some() {
            engine_bail!(InvalidArgument: SOURCE, "Global instances cannot belong to a room");
        }
        if let Some(room) = room {
            if !self.rooms.contains_key(room) {
                engine_bail!(InvalidResource: SOURCE, "Unknown room {:?}", room);
            }
        }
        let previous = entry.room;
        self.move_instance(instance, previous, room);
        Ok(())
    }

    pub fn instance(&self, instance: InstanceKey) -> Option<&Instance> {
        self.instances.get(instance)
    }

    pub fn instance_room(&self, instance: InstanceKey) -> Option<RoomKey> {
        self.instances.get(instance).and_then(|entry| entry.room)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn move_instance(&mut self, instance: InstanceKey, from: Option<RoomKey>, to: Option<RoomKey>) {
        if from == to {
            return;
        }
        if let Some(room) = from.and_then(|room| self.rooms.get_mut(room)) {
            room.instances.retain(|&key| key != instance);
        }
        if let Some(room) = to.and_then(|room| self.rooms.get_mut(room)) {
            room.instances.push(instance);
        }
        self.instances[instance].room = to;
    }

    fn relocate_roaming(&mut self) {
        let roaming: Vec<(InstanceKey, Option<RoomKey>, Vec3)> = self
            .instances
            .iter()
            .filter(|(_, entry)| entry.tracks_rooms())
            .map(|(key, entry)| (key, entry.room, entry.bounds.center()))
            .collect();
        for (key, previous, center) in roaming {
            let previous = previous.filter(|&room| self.rooms.contains_key(room));
            let found = self.find_room(center, previous);
            self.move_instance(key, previous, found);
        }
    }

    // ===== OCCLUDERS =====

    pub fn occluder_resource_create(&mut self) -> OccluderResourceKey {
        self.occluder_resources.insert(OccluderResource::default())
    }

    /// Stage new sphere geometry; it lands on `occluders_apply_pending`.
    pub fn occluder_resource_update_spheres(&mut self, resource: OccluderResourceKey, spheres: Vec<OccluderSphere>) -> Result<()> {
        self.stage_occluder(resource, OccluderShape::Spheres(spheres))
    }

    /// Stage new mesh geometry; it lands on `occluders_apply_pending`.
    pub fn occluder_resource_update_mesh(&mut self, resource: OccluderResourceKey, mesh: OccluderMesh) -> Result<()> {
        self.stage_occluder(resource, OccluderShape::Mesh(mesh))
    }

    fn stage_occluder(&mut self, resource: OccluderResourceKey, shape: OccluderShape) -> Result<()> {
        if !self.occluder_resources.contains_key(resource) {
            engine_bail!(InvalidResource: SOURCE, "Unknown occluder resource {:?}", resource);
        }
        let shape = shape.validated()?;
        self.pending_occluders.insert(resource, shape);
        Ok(())
    }

    pub fn has_pending_occluder_updates(&self) -> bool {
        !self.pending_occluders.is_empty()
    }

    /// Swap every staged resource update in and refresh the instances
    /// using them. Returns the number of resources updated.
    pub fn occluders_apply_pending(&mut self) -> usize {
        if self.pending_occluders.is_empty() {
            return 0;
        }

        let pending = std::mem::take(&mut self.pending_occluders);
        let mut applied = 0;
        for (key, shape) in pending {
            if let Some(resource) = self.occluder_resources.get_mut(key) {
                resource.shape = shape;
                resource.version += 1;
                applied += 1;
            }
        }

        let resources = &self.occluder_resources;
        for instance in self.occluder_instances.values_mut() {
            instance.world = resources
                .get(instance.resource)
                .map(|resource| WorldOccluder::from_shape(&resource.shape, &instance.transform))
                .unwrap_or_default();
        }
        engine_debug!(SOURCE, "Applied {} occluder resource update(s)", applied);
        applied
    }

    pub fn occluder_resource(&self, resource: OccluderResourceKey) -> Option<&OccluderResource> {
        self.occluder_resources.get(resource)
    }

    /// Remove a resource; instances still pointing at it stop occluding.
    pub fn occluder_resource_remove(&mut self, resource: OccluderResourceKey) -> Result<()> {
        if self.occluder_resources.remove(resource).is_none() {
            engine_bail!(InvalidResource: SOURCE, "Unknown occluder resource {:?}", resource);
        }
        self.pending_occluders.remove(&resource);
        for instance in self.occluder_instances.values_mut() {
            if instance.resource == resource {
                instance.world = WorldOccluder::Empty;
            }
        }
        Ok(())
    }

    pub fn occluder_instance_create(&mut self, resource: OccluderResourceKey, transform: Mat4) -> Result<OccluderInstanceKey> {
        let Some(shape) = self.occluder_resources.get(resource).map(|r| &r.shape) else {
            engine_bail!(InvalidResource: SOURCE, "Unknown occluder resource {:?}", resource);
        };
        let mut instance = OccluderInstance::new(resource, transform);
        instance.world = WorldOccluder::from_shape(shape, &transform);
        Ok(self.occluder_instances.insert(instance))
    }

    pub fn occluder_instance_set_transform(&mut self, instance: OccluderInstanceKey, transform: Mat4) -> Result<()> {
        let Some(entry) = self.occluder_instances.get_mut(instance) else {
            engine_bail!(InvalidResource: SOURCE, "Unknown occluder instance {:?}", instance);
        };
        entry.transform = transform;
        entry.world = self
            .occluder_resources
            .get(entry.resource)
            .map(|resource| WorldOccluder::from_shape(&resource.shape, &transform))
            .unwrap_or_default();
        Ok(())
    }

    pub fn occluder_instance_set_active(&mut self, instance: OccluderInstanceKey, active: bool) -> Result<()> {
        let Some(entry) = self.occluder_instances.get_mut(instance) else {
            engine_bail!(InvalidResource: SOURCE, "Unknown occluder instance {:?}", instance);
        };
        entry.active = active;
        Ok(())
    }

    /// Attach the instance to this scenario or detach it. Detached
    /// instances keep their state but never cull.
    pub fn occluder_instance_set_attached(&mut self, instance: OccluderInstanceKey, attached: bool) -> Result<()> {
        let Some(entry) = self.occluder_instances.get_mut(instance) else {
            engine_bail!(InvalidResource: SOURCE, "Unknown occluder instance {:?}", instance);
        };
        entry.attached = attached;
        Ok(())
    }

    pub fn occluder_instance_remove(&mut self, instance: OccluderInstanceKey) -> Result<()> {
        if self.occluder_instances.remove(instance).is_none() {
            engine_bail!(InvalidResource: SOURCE, "Unknown occluder instance {:?}", instance);
        }
        Ok(())
    }

    pub fn occluder_instance(&self, instance: OccluderInstanceKey) -> Option<&OccluderInstance> {
        self.occluder_instances.get(instance)
    }

    // ===== CAMERA OVERRIDE =====

    /// Replace the eye and clip planes used for room traversal, or restore
    /// the camera's with `None`.
    pub fn rooms_override_camera(&mut self, camera_override: Option<CameraOverride>) {
        self.camera_override = camera_override;
    }

    pub fn camera_override(&self) -> Option<&CameraOverride> {
        self.camera_override.as_ref()
    }

    // ===== PVS =====

    pub fn pvs(&self) -> Option<&Pvs> {
        self.pvs.as_ref()
    }

    /// Install a precomputed PVS; its room count must match.
    pub fn set_pvs(&mut self, pvs: Pvs) -> Result<()> {
        if pvs.room_count() != self.room_order.len() {
            engine_bail!(
                InvalidResource: SOURCE,
                "PVS covers {} rooms, scenario has {}",
                pvs.room_count(),
                self.room_order.len()
            );
        }
        self.pvs = Some(pvs);
        Ok(())
    }

    pub fn clear_pvs(&mut self) {
        self.pvs = None;
    }
}

#[cfg(test)]
#[path = "scenario_tests.rs"]
mod tests;
