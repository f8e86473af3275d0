//! Autotile bitmask resolution.
//!
//! A cell's neighbourhood is folded into a 9-bit `BindFlags` value, then
//! compared against each sub-tile's `SubtileMask`. Everything here is a
//! pure function of the neighbourhood; the tile map decides which cells
//! are bound to which.

use bitflags::bitflags;
use glam::IVec2;

bitflags! {
    /// 3×3 neighbourhood bits, row-major from the top-left corner.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BindFlags: u16 {
        const TOP_LEFT = 1;
        const TOP = 2;
        const TOP_RIGHT = 4;
        const LEFT = 8;
        const CENTER = 16;
        const RIGHT = 32;
        const BOTTOM_LEFT = 64;
        const BOTTOM = 128;
        const BOTTOM_RIGHT = 256;
    }
}

/// Which neighbours a bitmask considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitmaskMode {
    /// Corners only, each requiring the three cells it touches.
    #[default]
    TwoByTwo,
    /// Corners requiring their adjacent sides, plus the four sides and center.
    ThreeByThreeMinimal,
    /// All eight neighbours independently, plus center.
    ThreeByThree,
}

/// Required neighbourhood of a sub-tile plus its don't-care bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SubtileMask {
    pub bind: BindFlags,
    pub ignore: BindFlags,
}

impl SubtileMask {
    pub const fn new(bind: BindFlags, ignore: BindFlags) -> Self {
        Self { bind, ignore }
    }

    pub const fn bind(bind: BindFlags) -> Self {
        Self { bind, ignore: BindFlags::empty() }
    }

    /// Mask as seen by the matcher for the given bitmask mode.
    ///
    /// 2×2 sub-tiles never look at sides or center.
    pub fn effective(&self, mode: BitmaskMode) -> SubtileMask {
        match mode {
            BitmaskMode::TwoByTwo => SubtileMask {
                bind: self.bind,
                ignore: self.ignore
                    | BindFlags::TOP
                    | BindFlags::LEFT
                    | BindFlags::CENTER
                    | BindFlags::RIGHT
                    | BindFlags::BOTTOM,
            },
            _ => *self,
        }
    }

    /// `(m & !ign) == (b & !ign) && (!m | ign) == (!b | ign)` over 16 bits.
    pub fn matches(&self, neighbors: BindFlags) -> bool {
        let m = self.bind.bits();
        let ign = self.ignore.bits();
        let b = neighbors.bits();
        (m & !ign) == (b & !ign) && (!m | ign) == (!b | ign)
    }
}

/// Fold a cell's neighbourhood into bind flags.
///
/// `bound(offset)` answers whether the neighbour at `offset` (relative to
/// the cell) is bound to the cell's tile.
pub fn neighbor_bitmask(mode: BitmaskMode, bound: impl Fn(IVec2) -> bool) -> BindFlags {
    let at = |x: i32, y: i32| bound(IVec2::new(x, y));
    let mut mask = BindFlags::empty();

    let corners = [
        (BindFlags::TOP_LEFT, -1, -1),
        (BindFlags::TOP_RIGHT, 1, -1),
        (BindFlags::BOTTOM_LEFT, -1, 1),
        (BindFlags::BOTTOM_RIGHT, 1, 1),
    ];

    match mode {
        BitmaskMode::TwoByTwo | BitmaskMode::ThreeByThreeMinimal => {
            for (flag, dx, dy) in corners {
                if at(dx, dy) && at(0, dy) && at(dx, 0) {
                    mask |= flag;
                }
            }
        }
        BitmaskMode::ThreeByThree => {
            for (flag, dx, dy) in corners {
                if at(dx, dy) {
                    mask |= flag;
                }
            }
        }
    }

    if mode == BitmaskMode::TwoByTwo {
        return mask;
    }

    if at(0, -1) {
        mask |= BindFlags::TOP;
    }
    if at(-1, 0) {
        mask |= BindFlags::LEFT;
    }
    mask |= BindFlags::CENTER;
    if at(1, 0) {
        mask |= BindFlags::RIGHT;
    }
    if at(0, 1) {
        mask |= BindFlags::BOTTOM;
    }
    mask
}

/// Weighted pick among `(coord, priority)` candidates.
///
/// `roll` is an arbitrary random value; the candidate whose cumulative
/// priority range contains `roll % total` wins. Returns `None` for an
/// empty candidate list.
pub fn pick_weighted(candidates: &[(IVec2, u32)], roll: u32) -> Option<IVec2> {
    let first = candidates.first()?.0;
    let total: u32 = candidates.iter().map(|(_, p)| *p).sum();
    if total == 0 {
        return Some(first);
    }
    let picked = roll % total;
    let mut lower = 0;
    for (coord, priority) in candidates {
        let upper = lower + priority;
        if lower <= picked && picked < upper {
            return Some(*coord);
        }
        lower = upper;
    }
    Some(first)
}

#[cfg(test)]
#[path = "autotile_tests.rs"]
mod tests;
