use glam::Affine2;
use super::Rid;

/// Navigation server commands used by tile map quadrants.
pub trait NavigationServer: Send {
    fn region_create(&mut self) -> Rid;
    fn region_set_map(&mut self, region: Rid, map: Rid);
    fn region_set_transform(&mut self, region: Rid, transform: Affine2);
    fn region_set_navpoly(&mut self, region: Rid, navpoly: Rid);
    fn free_rid(&mut self, rid: Rid);
}
