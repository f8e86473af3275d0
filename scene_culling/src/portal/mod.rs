//! Rooms-and-portals visibility for 3D scenes.
//!
//! A `PortalScenario` holds convex rooms joined by portals, the instances
//! placed in them and the occluders hiding them. `cull` walks the rooms
//! from the camera's, narrowing the clip planes at every portal. A
//! precomputed `Pvs` can restrict the walk to rooms known to be reachable.

mod camera;
mod cull;
mod geometry;
mod occluder;
mod pvs;
mod room;
mod scenario;

pub use camera::Camera;
pub use geometry::{best_fit_plane, classify_polygon, PolygonSide};
pub use occluder::{
    OccluderFace, OccluderInstance, OccluderInstanceKey, OccluderMesh, OccluderResource,
    OccluderResourceKey, OccluderShape, OccluderSphere, WorldFace, WorldOccluder,
};
pub use pvs::{separating_planes, Pvs};
pub use room::{Portal, PortalKey, Room, RoomKey};
pub use scenario::{
    CameraOverride, CullResult, Instance, InstanceKey, InstanceKind, PortalConfig, PortalScenario,
};
