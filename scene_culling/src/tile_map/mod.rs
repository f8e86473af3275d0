//! Quadrant-indexed tile map.
//!
//! `TileMap` stores cells in a sparse map and groups them into quadrants;
//! each quadrant owns the canvas items, physics shapes, light occluders and
//! navigation regions derived from its cells. `TileSet` describes the
//! tiles, `GridGeometry` the cell-to-world mapping, and `tile_data` the
//! persisted cell format.

mod autotile;
mod cell_transform;
mod grid;
mod quadrant;
mod rebuild;
mod tile_map;
mod tile_set;
pub mod tile_data;

pub use autotile::{neighbor_bitmask, pick_weighted, BindFlags, BitmaskMode, SubtileMask};
pub use cell_transform::{CellFlags, Placement};
pub use grid::{GridGeometry, HalfOffset, TileMapMode, TileOrigin, WORLD_TO_MAP_EPSILON};
pub use quadrant::{Cell, PosKey, Quadrant};
pub use tile_data::{CellRecord, TileDataFormat};
pub use tile_map::{
    NavigationBinding, TileMap, TileMapConfig, TileMapEvent, WorldBinding, INVALID_CELL,
};
pub use tile_set::{
    AtlasSelectionHook, AutotileData, NavigationPolygonRef, OccluderPolygonRef, ShapeRef,
    SubtileSelectionHook, TextureRef, Tile, TileBoundHook, TileMode, TileSet, TileShape,
};
