//! Integration tests for the Engine service holder
//!
//! These tests verify server registration, the main-thread message queue
//! and building subsystems from the registered services.
//!
//! Run with: cargo test --test engine_integration_tests

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use scene_culling::culling::preview::{PreviewConfig, PreviewResource, ResourcePreviewer};
use scene_culling::culling::servers::ServerSet;
use scene_culling::culling::tile_map::{TileMap, TileMapConfig};
use scene_culling::culling::{Engine, Error};
use serial_test::serial;

// ============================================================================
// ENGINE LIFECYCLE TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_engine_full_lifecycle() {
    // Step 1: Initialize engine
    let result = Engine::initialize();
    assert!(result.is_ok(), "Engine initialization should succeed");

    // Step 2: Register servers
    let result = Engine::create_servers(ServerSet::mock());
    assert!(result.is_ok(), "Server registration should succeed");

    // Step 3: A second registration is refused
    let result = Engine::create_servers(ServerSet::mock());
    assert!(matches!(result, Err(Error::InitializationFailed(_))));

    // Step 4: Subsystems can be built from the registered servers
    let servers = Engine::servers().unwrap();
    let map = TileMap::new(TileMapConfig::default(), servers);
    assert!(map.is_ok(), "TileMap creation should succeed");

    // Step 5: Cleanup
    Engine::destroy_servers().unwrap();
    assert!(matches!(Engine::servers(), Err(Error::MissingDependency(_))));
    Engine::shutdown();
}

#[test]
#[serial]
fn test_integration_engine_reinitialize_after_shutdown() {
    Engine::initialize().unwrap();
    Engine::create_servers(ServerSet::mock()).unwrap();
    Engine::shutdown();

    Engine::initialize().unwrap();
    let result = Engine::create_servers(ServerSet::mock());
    assert!(result.is_ok(), "Should be able to register servers after shutdown");
    assert!(Engine::servers().is_ok());

    Engine::shutdown();
}

// ============================================================================
// MESSAGE QUEUE TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_message_queue_is_shared() {
    Engine::initialize().unwrap();
    let queue = Engine::message_queue().unwrap();
    let again = Engine::message_queue().unwrap();
    assert!(Arc::ptr_eq(&queue, &again));

    let calls = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3 {
        let calls = calls.clone();
        std::thread::spawn(move || queue_push(i, calls)).join().unwrap();
    }
    assert_eq!(queue.flush(), 3);
    assert_eq!(*calls.lock().unwrap(), vec![0, 1, 2]);

    Engine::shutdown();
}

fn queue_push(value: usize, calls: Arc<Mutex<Vec<usize>>>) {
    Engine::message_queue()
        .unwrap()
        .push(move || calls.lock().unwrap().push(value));
}

#[test]
#[serial]
fn test_integration_previewer_from_engine() {
    Engine::initialize().unwrap();
    Engine::create_servers(ServerSet::mock()).unwrap();
    let cache = tempfile::tempdir().unwrap();
    let config = PreviewConfig { cache_dir: cache.path().to_path_buf(), ..PreviewConfig::default() };

    let assets = Arc::new(scene_culling::culling::preview::DiskAssetSource::new(cache.path()));
    let mut previewer = ResourcePreviewer::from_engine(config, assets).unwrap();
    previewer.start().unwrap();

    // No generators: the request still completes, without a preview
    let owner = Arc::new(Mutex::new(Vec::new()));
    let resource = Arc::new(PreviewResource::new(3, "Mesh"));
    previewer.queue_edited_resource_preview(&resource, &owner, |seen, result| {
        seen.lock().unwrap().push((result.path.clone(), result.preview.is_some()));
    });

    let queue = Engine::message_queue().unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while queue.is_empty() {
        assert!(Instant::now() < deadline, "preview worker did not answer");
        std::thread::sleep(Duration::from_millis(2));
    }
    queue.flush();
    assert_eq!(*owner.lock().unwrap(), vec![("ID:3".to_string(), false)]);

    previewer.stop();
    Engine::destroy_servers().unwrap();
    Engine::shutdown();
}

#[test]
#[serial]
fn test_integration_previewer_needs_servers() {
    Engine::initialize().unwrap();
    Engine::destroy_servers().unwrap();
    let assets = Arc::new(scene_culling::culling::preview::DiskAssetSource::new("."));
    let result = ResourcePreviewer::from_engine(PreviewConfig::default(), assets);
    assert!(matches!(result, Err(Error::MissingDependency(_))));
    Engine::shutdown();
}
