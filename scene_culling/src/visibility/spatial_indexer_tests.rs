use std::sync::{Arc, Mutex};
use serial_test::serial;
use crate::error::Error;
use super::*;

fn recording_indexer(config: IndexerConfig) -> (SpatialIndexer2D, Arc<Mutex<Vec<VisibilityEvent>>>) {
    let mut indexer = SpatialIndexer2D::new(config).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    indexer.subscribe(move |event| sink.lock().unwrap().push(*event));
    (indexer, events)
}

fn drain(events: &Arc<Mutex<Vec<VisibilityEvent>>>) -> Vec<VisibilityEvent> {
    std::mem::take(&mut *events.lock().unwrap())
}

// ============================================================================
// Enter / exit
// ============================================================================

#[test]
fn test_notifier_enters_then_exits_viewport() {
    let (mut indexer, events) = recording_indexer(IndexerConfig::default());
    let viewport = indexer.add_viewport(Rect2::new(0.0, 0.0, 100.0, 100.0));
    let notifier = indexer.add_notifier(Rect2::new(50.0, 50.0, 10.0, 10.0));

    indexer.update();
    assert_eq!(drain(&events), vec![VisibilityEvent::Entered { viewport, notifier }]);
    assert!(indexer.is_notifier_visible(viewport, notifier));

    indexer.update_notifier(notifier, Rect2::new(200.0, 200.0, 10.0, 10.0)).unwrap();
    indexer.update();
    assert_eq!(drain(&events), vec![VisibilityEvent::Exited { viewport, notifier }]);
    assert!(!indexer.is_notifier_visible(viewport, notifier));

    indexer.remove_notifier(notifier).unwrap();
    indexer.update();
    assert!(drain(&events).is_empty());
}

#[test]
fn test_update_without_changes_emits_nothing() {
    let (mut indexer, events) = recording_indexer(IndexerConfig::default());
    indexer.add_viewport(Rect2::new(0.0, 0.0, 100.0, 100.0));
    indexer.add_notifier(Rect2::new(10.0, 10.0, 5.0, 5.0));

    indexer.update();
    assert_eq!(drain(&events).len(), 1);
    assert!(!indexer.is_changed());

    indexer.update();
    indexer.update();
    assert!(drain(&events).is_empty());
}

#[test]
fn test_moving_within_viewport_does_not_reenter() {
    let (mut indexer, events) = recording_indexer(IndexerConfig::default());
    indexer.add_viewport(Rect2::new(0.0, 0.0, 400.0, 400.0));
    let notifier = indexer.add_notifier(Rect2::new(10.0, 10.0, 5.0, 5.0));
    indexer.update();
    drain(&events);

    indexer.update_notifier(notifier, Rect2::new(250.0, 250.0, 5.0, 5.0)).unwrap();
    indexer.update();
    assert!(drain(&events).is_empty());
}

#[test]
fn test_same_cell_but_outside_viewport_is_not_visible() {
    let (mut indexer, _events) = recording_indexer(IndexerConfig::default());
    // Both live in cell (0, 0) but do not overlap
    let viewport = indexer.add_viewport(Rect2::new(0.0, 0.0, 20.0, 20.0));
    let notifier = indexer.add_notifier(Rect2::new(60.0, 60.0, 10.0, 10.0));

    indexer.update();
    assert!(!indexer.is_notifier_visible(viewport, notifier));
}

#[test]
fn test_removing_visible_notifier_emits_exit_per_viewport() {
    let (mut indexer, events) = recording_indexer(IndexerConfig::default());
    let left = indexer.add_viewport(Rect2::new(0.0, 0.0, 100.0, 100.0));
    let right = indexer.add_viewport(Rect2::new(50.0, 0.0, 100.0, 100.0));
    let notifier = indexer.add_notifier(Rect2::new(60.0, 10.0, 10.0, 10.0));
    indexer.update();
    assert_eq!(drain(&events).len(), 2);

    indexer.remove_notifier(notifier).unwrap();
    let exits = drain(&events);
    assert_eq!(exits.len(), 2);
    assert!(exits.contains(&VisibilityEvent::Exited { viewport: left, notifier }));
    assert!(exits.contains(&VisibilityEvent::Exited { viewport: right, notifier }));
    assert_eq!(indexer.cell_count(), 0);
}

#[test]
fn test_removing_viewport_emits_exit_for_its_notifiers() {
    let (mut indexer, events) = recording_indexer(IndexerConfig::default());
    let viewport = indexer.add_viewport(Rect2::new(0.0, 0.0, 100.0, 100.0));
    let a = indexer.add_notifier(Rect2::new(10.0, 10.0, 5.0, 5.0));
    let b = indexer.add_notifier(Rect2::new(80.0, 80.0, 5.0, 5.0));
    indexer.add_notifier(Rect2::new(500.0, 500.0, 5.0, 5.0));
    indexer.update();
    drain(&events);

    indexer.remove_viewport(viewport).unwrap();
    let exits = drain(&events);
    assert_eq!(exits.len(), 2);
    assert!(exits.contains(&VisibilityEvent::Exited { viewport, notifier: a }));
    assert!(exits.contains(&VisibilityEvent::Exited { viewport, notifier: b }));
    assert_eq!(indexer.viewport_count(), 0);
}

#[test]
fn test_viewport_move_triggers_enter_and_exit() {
    let (mut indexer, events) = recording_indexer(IndexerConfig::default());
    let viewport = indexer.add_viewport(Rect2::new(0.0, 0.0, 100.0, 100.0));
    let near = indexer.add_notifier(Rect2::new(10.0, 10.0, 5.0, 5.0));
    let far = indexer.add_notifier(Rect2::new(1010.0, 10.0, 5.0, 5.0));
    indexer.update();
    drain(&events);

    indexer.update_viewport(viewport, Rect2::new(1000.0, 0.0, 100.0, 100.0)).unwrap();
    indexer.update();
    let moved = drain(&events);
    assert_eq!(moved.len(), 2);
    assert!(moved.contains(&VisibilityEvent::Entered { viewport, notifier: far }));
    assert!(moved.contains(&VisibilityEvent::Exited { viewport, notifier: near }));
}

#[test]
fn test_zoomed_out_viewport_scans_stored_cells() {
    let config = IndexerConfig { cell_size: 10.0, threshold: 100 };
    let (mut indexer, events) = recording_indexer(config);
    // 1000 x 1000 cells under the viewport, well over the threshold
    let viewport = indexer.add_viewport(Rect2::new(-5000.0, -5000.0, 10_000.0, 10_000.0));
    let inside = indexer.add_notifier(Rect2::new(4000.0, -4000.0, 1.0, 1.0));
    indexer.add_notifier(Rect2::new(9000.0, 9000.0, 1.0, 1.0));

    indexer.update();
    assert_eq!(drain(&events), vec![VisibilityEvent::Entered { viewport, notifier: inside }]);
}

#[test]
fn test_unbounded_viewport_sees_notifiers() {
    let (mut indexer, events) = recording_indexer(IndexerConfig::default());
    // Cell range saturates to the full i32 span on both axes
    let viewport = indexer.add_viewport(Rect2::new(-1e12, -1e12, 2e12, 2e12));
    let notifier = indexer.add_notifier(Rect2::new(50.0, 50.0, 10.0, 10.0));

    indexer.update();
    assert_eq!(drain(&events), vec![VisibilityEvent::Entered { viewport, notifier }]);
}

#[test]
fn test_threshold_boundary_walks_or_scans() {
    let config = IndexerConfig { cell_size: 10.0, threshold: 4 };
    let (mut indexer, events) = recording_indexer(config);
    let notifier = indexer.add_notifier(Rect2::new(5.0, 5.0, 1.0, 1.0));

    // 2 x 2 cells, exactly the threshold: walked
    let walked = Rect2::new(0.0, 0.0, 19.9, 19.9);
    assert_eq!(indexer.cell_range(&walked).area(), 4);
    let first = indexer.add_viewport(walked);
    indexer.update();
    assert_eq!(drain(&events), vec![VisibilityEvent::Entered { viewport: first, notifier }]);

    // 5 x 1 cells, one over: scanned
    let scanned = Rect2::new(0.0, 0.0, 49.9, 9.9);
    assert_eq!(indexer.cell_range(&scanned).area(), 5);
    let second = indexer.add_viewport(scanned);
    indexer.update();
    assert_eq!(drain(&events), vec![VisibilityEvent::Entered { viewport: second, notifier }]);
}

#[test]
fn test_saturated_range_area_does_not_overflow() {
    let (indexer, _events) = recording_indexer(IndexerConfig::default());
    let range = indexer.cell_range(&Rect2::new(-1e12, -1e12, 2e12, 2e12));
    assert_eq!(range.begin, IVec2::splat(i32::MIN));
    assert_eq!(range.end, IVec2::splat(i32::MAX));
    assert_eq!(range.area(), i64::MAX);
}

// ============================================================================
// Cell bookkeeping
// ============================================================================

#[test]
fn test_oversized_notifier_bypasses_cells() {
    let config = IndexerConfig { cell_size: 10.0, threshold: 4 };
    let (mut indexer, events) = recording_indexer(config);

    let fits = indexer.add_notifier(Rect2::new(0.0, 0.0, 19.9, 19.9));
    assert_eq!(indexer.cell_count(), 4);
    assert!(!indexer.is_oversized(fits));
    indexer.remove_notifier(fits).unwrap();

    let huge = indexer.add_notifier(Rect2::new(-1e12, -1e12, 2e12, 2e12));
    assert!(indexer.is_oversized(huge));
    assert_eq!(indexer.cell_count(), 0);

    let viewport = indexer.add_viewport(Rect2::new(100.0, 100.0, 10.0, 10.0));
    indexer.update();
    assert_eq!(drain(&events), vec![VisibilityEvent::Entered { viewport, notifier: huge }]);

    // Shrinking back into the grid leaves the oversized set
    indexer.update_notifier(huge, Rect2::new(500.0, 500.0, 1.0, 1.0)).unwrap();
    assert!(!indexer.is_oversized(huge));
    assert_eq!(indexer.cell_count(), 1);
    indexer.update();
    assert_eq!(drain(&events), vec![VisibilityEvent::Exited { viewport, notifier: huge }]);
}

#[test]
fn test_cells_are_refcounted_and_released() {
    let (mut indexer, _events) = recording_indexer(IndexerConfig::default());
    // Spans cells (0,0) and (1,0)
    let notifier = indexer.add_notifier(Rect2::new(50.0, 10.0, 100.0, 10.0));
    assert_eq!(indexer.cell_count(), 2);
    assert_eq!(indexer.cell_refcount(IVec2::new(0, 0), notifier), 1);
    assert_eq!(indexer.cell_refcount(IVec2::new(1, 0), notifier), 1);

    // Shares cell (1,0) with the old rect
    indexer.update_notifier(notifier, Rect2::new(150.0, 10.0, 100.0, 10.0)).unwrap();
    assert_eq!(indexer.cell_count(), 2);
    assert_eq!(indexer.cell_refcount(IVec2::new(0, 0), notifier), 0);
    assert_eq!(indexer.cell_refcount(IVec2::new(1, 0), notifier), 1);
    assert_eq!(indexer.cell_refcount(IVec2::new(2, 0), notifier), 1);

    indexer.remove_notifier(notifier).unwrap();
    assert_eq!(indexer.cell_count(), 0);
}

#[test]
fn test_negative_coordinates_floor_into_cells() {
    let (mut indexer, _events) = recording_indexer(IndexerConfig::default());
    let notifier = indexer.add_notifier(Rect2::new(-50.0, -50.0, 10.0, 10.0));
    assert_eq!(indexer.cell_refcount(IVec2::new(-1, -1), notifier), 1);
    assert_eq!(indexer.cell_refcount(IVec2::new(0, 0), notifier), 0);
}

#[test]
fn test_unchanged_rect_is_noop() {
    let (mut indexer, _events) = recording_indexer(IndexerConfig::default());
    let rect = Rect2::new(0.0, 0.0, 10.0, 10.0);
    let notifier = indexer.add_notifier(rect);
    indexer.update();

    indexer.update_notifier(notifier, rect).unwrap();
    assert!(!indexer.is_changed());
}

// ============================================================================
// Errors
// ============================================================================

#[test]
#[serial]
fn test_unknown_keys_are_rejected() {
    let (mut indexer, _events) = recording_indexer(IndexerConfig::default());
    let notifier = indexer.add_notifier(Rect2::new(0.0, 0.0, 10.0, 10.0));
    let viewport = indexer.add_viewport(Rect2::new(0.0, 0.0, 10.0, 10.0));
    indexer.remove_notifier(notifier).unwrap();
    indexer.remove_viewport(viewport).unwrap();

    assert!(matches!(indexer.remove_notifier(notifier), Err(Error::InvalidResource(_))));
    assert!(matches!(
        indexer.update_notifier(notifier, Rect2::new(1.0, 1.0, 1.0, 1.0)),
        Err(Error::InvalidResource(_))
    ));
    assert!(matches!(indexer.remove_viewport(viewport), Err(Error::InvalidResource(_))));
}

#[test]
#[serial]
fn test_non_positive_cell_size_rejected() {
    let config = IndexerConfig { cell_size: 0.0, ..Default::default() };
    assert!(matches!(SpatialIndexer2D::new(config), Err(Error::InvalidArgument(_))));
}
