//! Per-cell placement of textures, shapes, occluders and navigation
//! polygons under flip/transpose.
//!
//! With compatibility mode on (and textures not centered) the offsets
//! reproduce the historical tile-origin behaviour exactly, including its
//! asymmetries; authored maps depend on them.

use glam::{Affine2, Vec2};
use crate::math::{swap_basis_xy, Rect2};
use super::grid::TileOrigin;

/// Widening applied to drawn rects to hide seams between cells.
pub const FP_ADJUST: f32 = 0.00001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CellFlags {
    pub flip_h: bool,
    pub flip_v: bool,
    pub transpose: bool,
}

/// Map-wide settings that drive cell placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub cell_size: Vec2,
    pub tile_origin: TileOrigin,
    pub compatibility_mode: bool,
    pub centered_textures: bool,
}

impl Placement {
    fn legacy(&self) -> bool {
        self.compatibility_mode && !self.centered_textures
    }

    /// Skew correction for non-square content under the legacy rules.
    fn legacy_skew(flags: CellFlags, size: Vec2, offset: &mut Vec2) {
        if size.y > size.x {
            if (flags.flip_h && (flags.flip_v || flags.transpose)) || (flags.flip_v && !flags.transpose) {
                offset.y += size.y - size.x;
            }
        } else if size.y < size.x {
            if (flags.flip_v && (flags.flip_h || flags.transpose)) || (flags.flip_h && !flags.transpose) {
                offset.x += size.x - size.y;
            }
        }
    }

    /// Apply a cell's flip/transpose flags to `xform` and move its origin
    /// by `offset` (local to a content of size `size`).
    pub fn fix_cell_transform(&self, xform: &mut Affine2, flags: CellFlags, offset: Vec2, size: Vec2) {
        let mut s = size;
        let mut offset = offset;
        let cell_size = self.cell_size;

        if self.legacy() {
            match self.tile_origin {
                TileOrigin::BottomLeft => offset.y += cell_size.y,
                TileOrigin::Center => offset += cell_size / 2.0,
                TileOrigin::TopLeft => {}
            }
            Self::legacy_skew(flags, s, &mut offset);
        }

        if flags.transpose {
            swap_basis_xy(xform);
            std::mem::swap(&mut offset.x, &mut offset.y);
            std::mem::swap(&mut s.x, &mut s.y);
        }

        if flags.flip_h {
            xform.matrix2.x_axis.x = -xform.matrix2.x_axis.x;
            xform.matrix2.y_axis.x = -xform.matrix2.y_axis.x;
            if self.legacy() {
                match self.tile_origin {
                    TileOrigin::TopLeft | TileOrigin::BottomLeft => offset.x = s.x - offset.x,
                    TileOrigin::Center => offset.x = s.x - offset.x / 2.0,
                }
            } else {
                offset.x = s.x - offset.x;
            }
        }

        if flags.flip_v {
            xform.matrix2.x_axis.y = -xform.matrix2.x_axis.y;
            xform.matrix2.y_axis.y = -xform.matrix2.y_axis.y;
            if self.legacy() {
                match self.tile_origin {
                    TileOrigin::TopLeft => offset.y = s.y - offset.y,
                    TileOrigin::BottomLeft | TileOrigin::Center => offset.y += s.y,
                }
            } else {
                offset.y = s.y - offset.y;
            }
        }

        if self.centered_textures {
            offset += cell_size / 2.0 - s / 2.0;
        }
        xform.translation += offset;
    }

    /// Destination rect of a cell's texture quad.
    ///
    /// `offset` is the cell's position inside its quadrant, `size` the
    /// source size and `texture_offset` the tile's texture offset. Flips
    /// are expressed as negative rect sizes.
    pub fn tile_rect(&self, offset: Vec2, size: Vec2, texture_offset: Vec2, flags: CellFlags) -> Rect2 {
        let cell_size = self.cell_size;
        let mut rect = Rect2::from_position_size(offset.floor(), size + Vec2::splat(FP_ADJUST));
        let mut tile_ofs = texture_offset;

        if self.legacy() {
            Self::legacy_skew(flags, rect.size, &mut tile_ofs);
        }

        if flags.transpose {
            std::mem::swap(&mut tile_ofs.x, &mut tile_ofs.y);
            if self.centered_textures {
                rect.position.x += cell_size.x / 2.0 - rect.size.y / 2.0;
                rect.position.y += cell_size.y / 2.0 - rect.size.x / 2.0;
            }
        } else if self.centered_textures {
            rect.position += cell_size / 2.0 - rect.size / 2.0;
        }

        if flags.flip_h {
            rect.size.x = -rect.size.x;
            tile_ofs.x = -tile_ofs.x;
        }
        if flags.flip_v {
            rect.size.y = -rect.size.y;
            tile_ofs.y = -tile_ofs.y;
        }

        rect.position += tile_ofs;
        if !self.legacy() {
            return rect;
        }

        match self.tile_origin {
            TileOrigin::TopLeft => {}
            TileOrigin::BottomLeft => {
                if flags.transpose {
                    rect.position.x += if flags.flip_h { -cell_size.x } else { cell_size.x };
                } else {
                    rect.position.y += if flags.flip_v { -cell_size.y } else { cell_size.y };
                }
            }
            TileOrigin::Center => {
                rect.position.x += if flags.flip_h { -cell_size.x / 2.0 } else { cell_size.x / 2.0 };
                rect.position.y += if flags.flip_v { -cell_size.y / 2.0 } else { cell_size.y / 2.0 };
            }
        }
        rect
    }
}

#[cfg(test)]
#[path = "cell_transform_tests.rs"]
mod tests;
