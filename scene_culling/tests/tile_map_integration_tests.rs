//! Integration tests for the tile map frame loop
//!
//! These tests drive a TileMap through the public API against the
//! recording server mocks: edit cells, draw, persist and reload.
//!
//! Run with: cargo test --test tile_map_integration_tests

use std::sync::{Arc, Mutex};
use scene_culling::culling::math::Rect2;
use scene_culling::culling::servers::mock::{MockNavigationServer, MockPhysicsServer, MockRenderingServer};
use scene_culling::culling::servers::{Rid, ServerSet};
use scene_culling::culling::tile_map::{
    CellFlags, ShapeRef, TextureRef, Tile, TileDataFormat, TileMap, TileMapConfig, TileSet,
    TileShape, WorldBinding, INVALID_CELL,
};
use scene_culling::glam::{IVec2, Vec2};
use serial_test::serial;

const CANVAS_ITEM: Rid = Rid::from_raw(9001);

struct World {
    rendering: Arc<Mutex<MockRenderingServer>>,
    physics: Arc<Mutex<MockPhysicsServer>>,
    map: TileMap,
}

fn world(config: TileMapConfig) -> World {
    let rendering = Arc::new(Mutex::new(MockRenderingServer::new()));
    let physics = Arc::new(Mutex::new(MockPhysicsServer::new()));
    let navigation = Arc::new(Mutex::new(MockNavigationServer::new()));
    let servers = ServerSet::new(rendering.clone(), physics.clone(), navigation);
    let mut map = TileMap::new(config, servers).unwrap();
    map.set_tileset(Some(tile_set()));
    map.enter_world(WorldBinding {
        canvas: Rid::from_raw(9000),
        canvas_item: CANVAS_ITEM,
        space: Rid::from_raw(9002),
        navigation: None,
        collision_parent: None,
    });
    World { rendering, physics, map }
}

fn tile_set() -> Arc<TileSet> {
    let texture = TextureRef { rid: Rid::from_raw(500), size: Vec2::new(64.0, 64.0) };
    let mut set = TileSet::new();

    let mut floor = Tile::new("floor");
    floor.texture = Some(texture);
    set.create_tile(0, floor).unwrap();

    let mut wall = Tile::new("wall");
    wall.texture = Some(texture);
    wall.shapes.push(TileShape::new(ShapeRef {
        rid: Rid::from_raw(600),
        outline: vec![Vec2::ZERO, Vec2::new(64.0, 0.0), Vec2::new(64.0, 64.0), Vec2::new(0.0, 64.0)],
        decomposed: Vec::new(),
    }));
    set.create_tile(1, wall).unwrap();

    Arc::new(set)
}

/// A walled room spanning two quadrants.
fn paint_room(map: &mut TileMap) {
    for x in 0..20 {
        for y in 0..4 {
            let border = y == 0 || y == 3 || x == 0 || x == 19;
            map.set_cell(x, y, if border { 1 } else { 0 }, CellFlags::default(), IVec2::ZERO);
        }
    }
}

// ============================================================================
// FRAME LOOP TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_edit_then_draw() {
    let mut w = world(TileMapConfig::default());
    paint_room(&mut w.map);

    // Nothing drawn until the deferred rebuild runs
    assert!(w.map.has_deferred_update());
    assert!(w.rendering.lock().unwrap().render_snapshot(CANVAS_ITEM).is_empty());

    w.map.pre_draw();
    assert!(!w.map.is_update_pending());
    assert_eq!(w.map.quadrant_count(), 2);
    assert_eq!(w.physics.lock().unwrap().live_body_count(), 2);
    assert!(!w.rendering.lock().unwrap().render_snapshot(CANVAS_ITEM).is_empty());
    assert_eq!(w.map.get_used_rect(), Rect2::new(0.0, 0.0, 20.0, 4.0));
}

#[test]
#[serial]
fn test_integration_reloaded_map_draws_the_same() {
    let mut original = world(TileMapConfig::default());
    paint_room(&mut original.map);
    original.map.set_cell(5, 1, 0, CellFlags { flip_h: true, ..CellFlags::default() }, IVec2::ZERO);
    original.map.pre_draw();
    let data = original.map.tile_data();

    let mut reloaded = world(TileMapConfig::default());
    reloaded.map.set_tile_data(&data, TileDataFormat::Format2).unwrap();
    reloaded.map.pre_draw();

    assert_eq!(reloaded.map.tile_data(), data);
    assert!(reloaded.map.is_cell_x_flipped(5, 1));
    assert_eq!(
        reloaded.rendering.lock().unwrap().render_snapshot(CANVAS_ITEM),
        original.rendering.lock().unwrap().render_snapshot(CANVAS_ITEM)
    );
}

#[test]
#[serial]
fn test_integration_erasing_releases_server_handles() {
    let mut w = world(TileMapConfig::default());
    paint_room(&mut w.map);
    w.map.pre_draw();
    assert!(w.rendering.lock().unwrap().live_handle_count() > 0);

    for cell in w.map.get_used_cells() {
        w.map.set_cell(cell.x, cell.y, INVALID_CELL, CellFlags::default(), IVec2::ZERO);
    }
    w.map.pre_draw();

    assert_eq!(w.map.quadrant_count(), 0);
    assert_eq!(w.physics.lock().unwrap().live_body_count(), 0);
    assert_eq!(w.rendering.lock().unwrap().live_handle_count(), 0);
}

#[test]
#[serial]
fn test_integration_exit_world_keeps_cells() {
    let mut w = world(TileMapConfig::default());
    paint_room(&mut w.map);
    w.map.pre_draw();

    w.map.exit_world();
    assert!(!w.map.is_in_world());
    assert_eq!(w.map.cell_count(), 80);
    assert_eq!(w.map.get_cell(0, 0), 1);
    assert_eq!(w.map.get_cell(5, 1), 0);
}
