use super::*;

fn neighbors_of(set: &[(i32, i32)]) -> impl Fn(IVec2) -> bool + '_ {
    move |offset| set.contains(&(offset.x, offset.y))
}

// ============================================================================
// NEIGHBOR BITMASK
// ============================================================================

#[test]
fn test_isolated_cell_has_only_center_in_3x3_modes() {
    let none: [(i32, i32); 0] = [];
    assert_eq!(neighbor_bitmask(BitmaskMode::ThreeByThree, neighbors_of(&none)), BindFlags::CENTER);
    assert_eq!(neighbor_bitmask(BitmaskMode::ThreeByThreeMinimal, neighbors_of(&none)), BindFlags::CENTER);
    assert_eq!(neighbor_bitmask(BitmaskMode::TwoByTwo, neighbors_of(&none)), BindFlags::empty());
}

#[test]
fn test_minimal_corner_requires_adjacent_sides() {
    let diagonal_only = [(-1, -1)];
    let mask = neighbor_bitmask(BitmaskMode::ThreeByThreeMinimal, neighbors_of(&diagonal_only));
    assert_eq!(mask, BindFlags::CENTER);

    let full_corner = [(-1, -1), (0, -1), (-1, 0)];
    let mask = neighbor_bitmask(BitmaskMode::ThreeByThreeMinimal, neighbors_of(&full_corner));
    assert_eq!(mask, BindFlags::TOP_LEFT | BindFlags::TOP | BindFlags::LEFT | BindFlags::CENTER);
}

#[test]
fn test_full_3x3_counts_diagonals_alone() {
    let diagonal_only = [(1, 1)];
    let mask = neighbor_bitmask(BitmaskMode::ThreeByThree, neighbors_of(&diagonal_only));
    assert_eq!(mask, BindFlags::BOTTOM_RIGHT | BindFlags::CENTER);
}

#[test]
fn test_2x2_only_sets_corners() {
    let all = [(-1, -1), (0, -1), (1, -1), (-1, 0), (1, 0), (-1, 1), (0, 1), (1, 1)];
    let mask = neighbor_bitmask(BitmaskMode::TwoByTwo, neighbors_of(&all));
    assert_eq!(
        mask,
        BindFlags::TOP_LEFT | BindFlags::TOP_RIGHT | BindFlags::BOTTOM_LEFT | BindFlags::BOTTOM_RIGHT
    );
}

// ============================================================================
// MATCHING
// ============================================================================

#[test]
fn test_exact_match_without_ignore() {
    let mask = SubtileMask::bind(BindFlags::CENTER | BindFlags::RIGHT);
    assert!(mask.matches(BindFlags::CENTER | BindFlags::RIGHT));
    assert!(!mask.matches(BindFlags::CENTER));
    assert!(!mask.matches(BindFlags::CENTER | BindFlags::RIGHT | BindFlags::TOP));
}

#[test]
fn test_ignore_bits_are_dont_care() {
    let mask = SubtileMask::new(
        BindFlags::TOP | BindFlags::LEFT | BindFlags::RIGHT | BindFlags::BOTTOM | BindFlags::CENTER,
        BindFlags::TOP | BindFlags::LEFT | BindFlags::BOTTOM,
    );
    assert!(mask.matches(BindFlags::CENTER | BindFlags::RIGHT));
    assert!(mask.matches(BindFlags::CENTER | BindFlags::RIGHT | BindFlags::TOP));
    assert!(!mask.matches(BindFlags::CENTER));
}

#[test]
fn test_2x2_effective_mask_ignores_sides() {
    let mask = SubtileMask::bind(BindFlags::TOP_LEFT).effective(BitmaskMode::TwoByTwo);
    assert!(mask.matches(BindFlags::TOP_LEFT));
    assert!(mask.matches(BindFlags::TOP_LEFT | BindFlags::CENTER | BindFlags::TOP));
    assert!(!mask.matches(BindFlags::TOP_RIGHT));
}

// ============================================================================
// WEIGHTED PICK
// ============================================================================

#[test]
fn test_pick_weighted_ranges() {
    let candidates = [(IVec2::new(0, 0), 1), (IVec2::new(1, 0), 3)];
    assert_eq!(pick_weighted(&candidates, 0), Some(IVec2::new(0, 0)));
    assert_eq!(pick_weighted(&candidates, 1), Some(IVec2::new(1, 0)));
    assert_eq!(pick_weighted(&candidates, 3), Some(IVec2::new(1, 0)));
    assert_eq!(pick_weighted(&candidates, 4), Some(IVec2::new(0, 0)));
    assert_eq!(pick_weighted(&[], 7), None);
}
