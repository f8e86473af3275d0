//! Grid geometry: cell ↔ world mapping for square, isometric and custom
//! layouts, with optional staggered half offsets.

use glam::{Affine2, IVec2, Vec2};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileMapMode {
    #[default]
    Square,
    Isometric,
    Custom,
}

/// Staggering applied to every other row (X variants) or column (Y variants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HalfOffset {
    X,
    Y,
    #[default]
    Disabled,
    NegativeX,
    NegativeY,
}

/// Where a tile's texture is anchored inside its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileOrigin {
    #[default]
    TopLeft,
    Center,
    BottomLeft,
}

/// Added before flooring in `world_to_map` so points exactly on a grid
/// line land in the cell they start.
pub const WORLD_TO_MAP_EPSILON: f32 = 0.00005;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridGeometry {
    pub mode: TileMapMode,
    pub cell_size: Vec2,
    pub custom_transform: Affine2,
    pub half_offset: HalfOffset,
    pub tile_origin: TileOrigin,
}

impl Default for GridGeometry {
    fn default() -> Self {
        Self {
            mode: TileMapMode::Square,
            cell_size: Vec2::new(64.0, 64.0),
            custom_transform: Affine2::from_cols(
                Vec2::new(64.0, 0.0),
                Vec2::new(0.0, 64.0),
                Vec2::ZERO,
            ),
            half_offset: HalfOffset::Disabled,
            tile_origin: TileOrigin::TopLeft,
        }
    }
}

impl GridGeometry {
    /// Basis mapping cell coordinates to local space.
    pub fn cell_transform(&self) -> Affine2 {
        let size = self.cell_size;
        match self.mode {
            TileMapMode::Square => Affine2::from_cols(
                Vec2::new(size.x, 0.0),
                Vec2::new(0.0, size.y),
                Vec2::ZERO,
            ),
            TileMapMode::Isometric => Affine2::from_cols(
                Vec2::new(size.x * 0.5, size.y * 0.5),
                Vec2::new(-size.x * 0.5, size.y * 0.5),
                Vec2::ZERO,
            ),
            TileMapMode::Custom => self.custom_transform,
        }
    }

    /// Shift applied to every drawn cell so the grid starts at its
    /// top-left-most corner.
    pub fn cell_draw_offset(&self) -> Vec2 {
        match self.mode {
            TileMapMode::Square => Vec2::ZERO,
            TileMapMode::Isometric => Vec2::new(-self.cell_size.x * 0.5, 0.0),
            TileMapMode::Custom => {
                let xform = &self.custom_transform;
                Vec2::ZERO.min(xform.x_axis).min(xform.y_axis)
            }
        }
    }

    pub fn map_to_world(&self, cell: IVec2, ignore_half_offset: bool) -> Vec2 {
        let xform = self.cell_transform();
        let mut ret = xform.transform_point2(cell.as_vec2());
        if ignore_half_offset {
            return ret;
        }
        match self.half_offset {
            HalfOffset::X | HalfOffset::NegativeX => {
                if cell.y & 1 != 0 {
                    let sign = if self.half_offset == HalfOffset::X { 0.5 } else { -0.5 };
                    ret += xform.x_axis * sign;
                }
            }
            HalfOffset::Y | HalfOffset::NegativeY => {
                if cell.x & 1 != 0 {
                    let sign = if self.half_offset == HalfOffset::Y { 0.5 } else { -0.5 };
                    ret += xform.y_axis * sign;
                }
            }
            HalfOffset::Disabled => {}
        }
        ret
    }

    pub fn world_to_map(&self, position: Vec2) -> IVec2 {
        let mut ret = self.cell_transform().inverse().transform_point2(position);
        ret += Vec2::splat(WORLD_TO_MAP_EPSILON);

        let odd = |v: f32| (v.floor() as i32) & 1 != 0;
        match self.half_offset {
            HalfOffset::X if odd(ret.y) => ret.x -= 0.5,
            HalfOffset::NegativeX if odd(ret.y) => ret.x += 0.5,
            HalfOffset::Y if odd(ret.x) => ret.y -= 0.5,
            HalfOffset::NegativeY if odd(ret.x) => ret.y += 0.5,
            _ => {}
        }
        ret.floor().as_ivec2()
    }

    /// Local-space pivot of quadrant `quadrant` for quadrants of side `size`.
    pub fn quadrant_origin(&self, quadrant: IVec2, size: i32) -> Vec2 {
        let mut origin = self.map_to_world(quadrant * size, true) + self.cell_draw_offset();
        match self.tile_origin {
            TileOrigin::Center => origin += self.cell_size / 2.0,
            TileOrigin::BottomLeft => origin.y += self.cell_size.y,
            TileOrigin::TopLeft => {}
        }
        origin
    }
}

#[cfg(test)]
#[path = "grid_tests.rs"]
mod tests;
