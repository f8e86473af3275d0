//! Viewport visibility for 2D notifiers.
//!
//! `SpatialIndexer2D` buckets notifier rectangles into a uniform grid and,
//! once per frame, reports which notifiers entered or left each viewport.

mod spatial_indexer;

pub use spatial_indexer::{
    IndexerConfig, NotifierKey, SpatialIndexer2D, ViewportKey, VisibilityEvent,
};
