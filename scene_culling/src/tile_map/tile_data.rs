//! Persisted tile data.
//!
//! Cells are stored as a flat list of 32-bit ints. `Format2` uses three
//! ints per cell:
//!
//! ```text
//! [x: i16 | y: i16 << 16] [id | flip_h << 29 | flip_v << 30 | transpose << 31] [coord_x: i16 | coord_y: i16 << 16]
//! ```
//!
//! `Format1` is the older two-int layout without the autotile coordinate.

use crate::error::{Error, Result};
use super::cell_transform::CellFlags;
use super::quadrant::PosKey;

const FLIP_H_BIT: u32 = 1 << 29;
const FLIP_V_BIT: u32 = 1 << 30;
const TRANSPOSE_BIT: u32 = 1 << 31;
const ID_MASK: u32 = (1 << 29) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileDataFormat {
    Format1,
    #[default]
    Format2,
}

impl TileDataFormat {
    pub fn ints_per_cell(self) -> usize {
        match self {
            TileDataFormat::Format1 => 2,
            TileDataFormat::Format2 => 3,
        }
    }
}

/// One decoded cell record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRecord {
    pub position: PosKey,
    pub tile_id: i32,
    pub flags: CellFlags,
    pub autotile_coord: (i16, i16),
}

fn pack_pair(a: u16, b: u16) -> i32 {
    (a as u32 | ((b as u32) << 16)) as i32
}

fn unpack_pair(v: i32) -> (u16, u16) {
    let v = v as u32;
    (v as u16, (v >> 16) as u16)
}

pub fn encode(records: &[CellRecord]) -> Vec<i32> {
    let mut data = Vec::with_capacity(records.len() * 3);
    for record in records {
        data.push(pack_pair(record.position.x as u16, record.position.y as u16));

        let mut value = record.tile_id as u32 & ID_MASK;
        if record.flags.flip_h {
            value |= FLIP_H_BIT;
        }
        if record.flags.flip_v {
            value |= FLIP_V_BIT;
        }
        if record.flags.transpose {
            value |= TRANSPOSE_BIT;
        }
        data.push(value as i32);

        let (cx, cy) = record.autotile_coord;
        data.push(pack_pair(cx as u16, cy as u16));
    }
    data
}

pub fn decode(data: &[i32], format: TileDataFormat) -> Result<Vec<CellRecord>> {
    let stride = format.ints_per_cell();
    if data.len() % stride != 0 {
        return Err(Error::InvalidArgument("Corrupted tile data.".to_string()));
    }

    Ok(data
        .chunks_exact(stride)
        .map(|chunk| {
            let (x, y) = unpack_pair(chunk[0]);
            let value = chunk[1] as u32;
            let autotile_coord = match format {
                TileDataFormat::Format2 => {
                    let (cx, cy) = unpack_pair(chunk[2]);
                    (cx as i16, cy as i16)
                }
                TileDataFormat::Format1 => (0, 0),
            };
            CellRecord {
                position: PosKey::new(x as i16 as i32, y as i16 as i32),
                tile_id: (value & ID_MASK) as i32,
                flags: CellFlags {
                    flip_h: value & FLIP_H_BIT != 0,
                    flip_v: value & FLIP_V_BIT != 0,
                    transpose: value & TRANSPOSE_BIT != 0,
                },
                autotile_coord,
            }
        })
        .collect())
}

/// Byte view of an encoded buffer in native endianness.
pub fn as_bytes(data: &[i32]) -> &[u8] {
    bytemuck::cast_slice(data)
}

/// Rebuild an int buffer from bytes produced by `as_bytes`.
pub fn from_bytes(bytes: &[u8]) -> Result<Vec<i32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::InvalidArgument("Corrupted tile data.".to_string()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| bytemuck::pod_read_unaligned::<i32>(chunk))
        .collect())
}

#[cfg(test)]
#[path = "tile_data_tests.rs"]
mod tests;
