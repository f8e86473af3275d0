/// Potentially visible set: per room, the rooms that can ever be seen
/// from it through chains of portals.
///
/// Stored flat: `buffer` holds room indices, `ranges[room]` is the
/// `(first, size)` slice of `buffer` belonging to that room. Indices refer
/// to the scenario's room creation order.

use glam::Vec3;
use crate::error::Result;
use crate::math::Plane;
use crate::{engine_bail, engine_info};
use super::geometry::{polygon_outside_any, push_unique_plane};
use super::room::RoomKey;
use super::scenario::{PortalScenario, SOURCE};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pvs {
    ranges: Vec<(u32, u32)>,
    buffer: Vec<u32>,
}

impl Pvs {
    pub fn room_count(&self) -> usize {
        self.ranges.len()
    }

    /// Room indices visible from `room`, itself included.
    pub fn visible_from(&self, room: usize) -> &[u32] {
        let Some(&(first, size)) = self.ranges.get(room) else {
            return &[];
        };
        &self.buffer[first as usize..(first + size) as usize]
    }

    pub fn is_visible(&self, from: usize, to: usize) -> bool {
        self.visible_from(from).contains(&(to as u32))
    }

    pub fn buffer(&self) -> &[u32] {
        &self.buffer
    }

    /// Serialize as native-endian `u32` words:
    /// `room_count, buffer_len, (first, size) * room_count, buffer`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut words = Vec::with_capacity(2 + self.ranges.len() * 2 + self.buffer.len());
        words.push(self.ranges.len() as u32);
        words.push(self.buffer.len() as u32);
        for &(first, size) in &self.ranges {
            words.push(first);
            words.push(size);
        }
        words.extend_from_slice(&self.buffer);
        bytemuck::cast_slice(&words).to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            engine_bail!(InvalidResource: SOURCE, "PVS data length {} is not a multiple of 4", bytes.len());
        }
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<u32>)
            .collect();
        let [room_count, buffer_len, rest @ ..] = words.as_slice() else {
            engine_bail!(InvalidResource: SOURCE, "PVS data is missing its header");
        };
        let (room_count, buffer_len) = (*room_count as usize, *buffer_len as usize);
        if rest.len() != room_count * 2 + buffer_len {
            engine_bail!(
                InvalidResource: SOURCE,
                "PVS data holds {} words, header announces {}",
                rest.len(),
                room_count * 2 + buffer_len
            );
        }

        let (range_words, buffer) = rest.split_at(room_count * 2);
        let ranges: Vec<(u32, u32)> = range_words.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect();
        for &(first, size) in &ranges {
            if first as usize + size as usize > buffer_len {
                engine_bail!(InvalidResource: SOURCE, "PVS range ({}, {}) exceeds buffer of {}", first, size, buffer_len);
            }
        }
        if let Some(&bad) = buffer.iter().find(|&&index| index as usize >= room_count) {
            engine_bail!(InvalidResource: SOURCE, "PVS references room {} of {}", bad, room_count);
        }

        Ok(Self {
            ranges,
            buffer: buffer.to_vec(),
        })
    }
}

/// Planes separating portal polygons `a` and `b`.
///
/// Each plane runs through an edge of one polygon and a vertex of the
/// other, with `a` on or over it and `b` on or under it, so anything seen
/// through both portals lies under every returned plane. Near-duplicate
/// planes are coalesced.
pub fn separating_planes(a: &[Vec3], b: &[Vec3], epsilon: f32, normal_dot: f32) -> Vec<Plane> {
    let mut planes = Vec::new();
    let mut consider = |plane: Plane| {
        let on_a = a.iter().all(|&p| plane.distance_to(p).abs() <= epsilon);
        let on_b = b.iter().all(|&p| plane.distance_to(p).abs() <= epsilon);
        if on_a || on_b {
            return;
        }
        for candidate in [plane, plane.flipped()] {
            let a_over = a.iter().all(|&p| candidate.distance_to(p) >= -epsilon);
            let b_under = b.iter().all(|&p| candidate.distance_to(p) <= epsilon);
            if a_over && b_under {
                push_unique_plane(&mut planes, candidate, normal_dot, epsilon);
                return;
            }
        }
    };

    for (edge_of, apex_of) in [(a, b), (b, a)] {
        for (i, &e0) in edge_of.iter().enumerate() {
            let e1 = edge_of[(i + 1) % edge_of.len()];
            for &apex in apex_of {
                if let Some(plane) = Plane::from_points(e0, e1, apex) {
                    consider(plane);
                }
            }
        }
    }
    planes
}

/// Working state of one source room's PVS walk.
struct PvsWalk<'a> {
    scenario: &'a PortalScenario,
    visible: Vec<bool>,
    on_stack: Vec<bool>,
}

impl PvsWalk<'_> {
    fn walk(&mut self, source: &[Vec3], room: RoomKey, planes: &[Plane], depth: usize) {
        let scenario = self.scenario;
        let config = &scenario.config;
        if depth >= config.max_depth {
            return;
        }
        let Some(entry) = scenario.rooms.get(room) else {
            return;
        };
        self.on_stack[entry.index] = true;

        for &key in &entry.portals {
            let Some(portal) = scenario.portals.get(key) else {
                continue;
            };
            let Some((dest, _)) = portal.crossing_from(room) else {
                continue;
            };
            let dest_index = scenario.rooms[dest].index;
            if self.on_stack[dest_index] || polygon_outside_any(planes, &portal.points) {
                continue;
            }
            self.visible[dest_index] = true;

            let mut next = planes.to_vec();
            for plane in separating_planes(source, &portal.points, config.pvs_plane_epsilon, config.pvs_normal_dot) {
                push_unique_plane(&mut next, plane, config.pvs_normal_dot, config.pvs_plane_epsilon);
            }
            self.walk(source, dest, &next, depth + 1);
        }

        self.on_stack[entry.index] = false;
    }
}

impl PortalScenario {
    /// Compute and install the PVS for the current rooms and portals.
    ///
    /// Inactive portals count as open; activity is a runtime switch.
    pub fn generate_pvs(&mut self) -> &Pvs {
        let count = self.room_order.len();
        let mut ranges = Vec::with_capacity(count);
        let mut buffer = Vec::new();

        for &source_room in &self.room_order {
            let source_index = self.rooms[source_room].index;
            let mut walk = PvsWalk {
                scenario: self,
                visible: vec![false; count],
                on_stack: vec![false; count],
            };
            walk.visible[source_index] = true;
            walk.on_stack[source_index] = true;

            for &key in &self.rooms[source_room].portals {
                let portal = &self.portals[key];
                let Some((dest, _)) = portal.crossing_from(source_room) else {
                    continue;
                };
                walk.visible[self.rooms[dest].index] = true;
                walk.walk(&portal.points, dest, &[], 1);
            }

            let first = buffer.len() as u32;
            buffer.extend(
                walk.visible
                    .iter()
                    .enumerate()
                    .filter(|(_, seen)| **seen)
                    .map(|(index, _)| index as u32),
            );
            ranges.push((first, buffer.len() as u32 - first));
        }

        engine_info!(SOURCE, "PVS generated: {} rooms, {} entries", count, buffer.len());
        self.pvs.insert(Pvs { ranges, buffer })
    }
}

#[cfg(test)]
#[path = "pvs_tests.rs"]
mod tests;
