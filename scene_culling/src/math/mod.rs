//! Math primitives shared by the 2D and 3D culling subsystems.
//!
//! Vectors and matrices come from `glam`; this module adds the small
//! value types the culling code needs on top of it.

mod aabb;
mod color;
mod frustum;
mod plane;
mod rect2;

pub use aabb::AABB;
pub use color::Color;
pub use frustum::Frustum;
pub use plane::Plane;
pub use rect2::Rect2;

use glam::{Affine2, Vec2};

/// Swap the X and Y components of both basis columns of a 2D transform.
pub fn swap_basis_xy(xform: &mut Affine2) {
    let x = &mut xform.matrix2.x_axis;
    std::mem::swap(&mut x.x, &mut x.y);
    let y = &mut xform.matrix2.y_axis;
    std::mem::swap(&mut y.x, &mut y.y);
}

/// Basis of a 2D transform without its translation.
pub fn untranslated(xform: &Affine2) -> Affine2 {
    Affine2::from_mat2(xform.matrix2)
}

/// Build a 2D transform from its two basis columns and origin.
pub fn affine2(x_axis: Vec2, y_axis: Vec2, origin: Vec2) -> Affine2 {
    Affine2::from_cols(x_axis, y_axis, origin)
}
