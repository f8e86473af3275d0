use std::path::Path;
use std::time::Instant;
use serial_test::serial;
use crate::preview::asset::DiskAssetSource;
use crate::preview::generator::ImagePreviewGenerator;
use crate::preview::test_support::{solid_image, CountingGenerator, MemoryAssets};
use crate::servers::mock::MockRenderingServer;
use super::*;

type Results = Arc<Mutex<Vec<PreviewResult>>>;

struct Harness {
    previewer: ResourcePreviewer,
    messages: Arc<MessageQueue>,
    rendering: Arc<Mutex<MockRenderingServer>>,
    results: Results,
}

fn harness(cache_dir: &Path, assets: Arc<dyn AssetSource>) -> Harness {
    let rendering = Arc::new(Mutex::new(MockRenderingServer::new()));
    let messages = Arc::new(MessageQueue::new());
    let config = PreviewConfig {
        cache_dir: cache_dir.to_path_buf(),
        shutdown_poll: Duration::from_millis(1),
        ..PreviewConfig::default()
    };
    let previewer = ResourcePreviewer::new(config, assets, rendering.clone(), messages.clone()).unwrap();
    Harness {
        previewer,
        messages,
        rendering,
        results: Arc::new(Mutex::new(Vec::new())),
    }
}

impl Harness {
    fn request(&self, path: &str) {
        self.previewer
            .queue_resource_preview(path, &self.results, |results, result| results.lock().unwrap().push(result.clone()));
    }

    fn request_resource(&self, resource: &Arc<PreviewResource>) {
        self.previewer
            .queue_edited_resource_preview(resource, &self.results, |results, result| {
                results.lock().unwrap().push(result.clone())
            });
    }

    /// Wait for `count` deferred calls, then flush them.
    fn flush_when(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.messages.len() < count {
            assert!(Instant::now() < deadline, "preview worker did not answer");
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(self.messages.flush(), count);
    }

    fn take_results(&self) -> Vec<PreviewResult> {
        std::mem::take(&mut *self.results.lock().unwrap())
    }
}

// ============================================================================
// Disk assets
// ============================================================================

#[test]
#[serial]
fn test_second_request_is_served_from_memory() {
    let project = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    solid_image(32, 16, 90).save(project.path().join("a.png")).unwrap();
    let assets = Arc::new(DiskAssetSource::new(project.path()));
    let mut h = harness(cache.path(), assets.clone());
    h.previewer.add_preview_generator(Arc::new(ImagePreviewGenerator::new()));
    h.previewer.start().unwrap();

    h.request("/a.png");
    h.flush_when(1);
    let first = h.take_results();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].path, "/a.png");
    let preview = first[0].preview.clone().unwrap();
    assert_eq!((preview.width(), preview.height()), (64, 32));
    assert_eq!(first[0].small_preview.as_ref().unwrap().width(), 16);

    // Disk cache written next to the memory entry
    let base = disk_cache::cache_base(cache.path(), &assets.globalize_path("/a.png"));
    assert!(disk_cache::preview_path(&base).exists());
    assert!(disk_cache::small_preview_path(&base).exists());
    let sidecar = disk_cache::read_sidecar(&base).unwrap().unwrap();
    assert_eq!(sidecar.thumbnail_size, 64);
    assert!(sidecar.has_small);
    assert_eq!(sidecar.modified_time, assets.modified_time("/a.png"));
    assert_eq!(Some(sidecar.md5), assets.md5("/a.png"));

    // Cached: answered before returning, nothing reaches the worker
    h.request("/a.png");
    let second = h.take_results();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].preview.as_ref().unwrap().rid(), preview.rid());
    assert!(h.messages.is_empty());
    assert_eq!(h.previewer.queued_count(), 0);
    assert_eq!(h.previewer.shared.semaphore.pending(), 0);

    h.previewer.stop();
}

#[test]
#[serial]
fn test_disk_cache_survives_restart() {
    let cache = tempfile::tempdir().unwrap();
    let assets = Arc::new(MemoryAssets::new());
    assets.insert("/a.png", solid_image(8, 8, 10), 100);

    let first_generator = Arc::new(CountingGenerator::default());
    let mut h = harness(cache.path(), assets.clone());
    h.previewer.add_preview_generator(first_generator.clone());
    h.previewer.start().unwrap();
    h.request("/a.png");
    h.flush_when(1);
    assert_eq!(first_generator.renders(), 1);
    drop(h);

    let second_generator = Arc::new(CountingGenerator::default());
    let mut h = harness(cache.path(), assets.clone());
    h.previewer.add_preview_generator(second_generator.clone());
    h.previewer.start().unwrap();
    h.request("/a.png");
    h.flush_when(1);

    assert_eq!(second_generator.renders(), 0);
    let results = h.take_results();
    assert_eq!(results[0].preview.as_ref().unwrap().width(), 64);
    assert!(results[0].small_preview.is_some());
}

#[test]
#[serial]
fn test_changed_asset_is_rendered_again() {
    let cache = tempfile::tempdir().unwrap();
    let assets = Arc::new(MemoryAssets::new());
    assets.insert("/a.png", solid_image(8, 8, 10), 100);

    let mut h = harness(cache.path(), assets.clone());
    h.previewer.add_preview_generator(Arc::new(CountingGenerator::default()));
    h.previewer.start().unwrap();
    h.request("/a.png");
    h.flush_when(1);
    drop(h);

    assets.insert("/a.png", solid_image(8, 8, 250), 200);
    let generator = Arc::new(CountingGenerator::default());
    let mut h = harness(cache.path(), assets.clone());
    h.previewer.add_preview_generator(generator.clone());
    h.previewer.start().unwrap();
    h.request("/a.png");
    h.flush_when(1);

    assert_eq!(generator.renders(), 1);
    let base = disk_cache::cache_base(cache.path(), &assets.globalize_path("/a.png"));
    assert_eq!(disk_cache::read_sidecar(&base).unwrap().unwrap().modified_time, 200);
}

#[test]
#[serial]
fn test_unknown_type_yields_empty_preview() {
    let cache = tempfile::tempdir().unwrap();
    let assets = Arc::new(MemoryAssets::new());
    let mut h = harness(cache.path(), assets);
    h.previewer.add_preview_generator(Arc::new(ImagePreviewGenerator::new()));
    h.previewer.start().unwrap();

    h.request("/missing.png");
    h.flush_when(1);
    let results = h.take_results();
    assert_eq!(results[0].path, "/missing.png");
    assert!(results[0].preview.is_none());
    assert!(results[0].small_preview.is_none());
    assert!(h.previewer.is_cached("/missing.png"));
}

// ============================================================================
// Edited resources
// ============================================================================

#[test]
#[serial]
fn test_edited_resource_hit_requires_same_hash() {
    let cache = tempfile::tempdir().unwrap();
    let generator = Arc::new(CountingGenerator::default());
    let mut h = harness(cache.path(), Arc::new(MemoryAssets::new()));
    h.previewer.add_preview_generator(generator.clone());
    h.previewer.start().unwrap();

    let resource = Arc::new(PreviewResource::new(7, "Image").with_image(solid_image(4, 4, 3)));
    h.request_resource(&resource);
    h.flush_when(1);
    let results = h.take_results();
    assert_eq!(results[0].path, "ID:7");
    assert!(results[0].preview.is_some());

    // Same edit state: synchronous hit
    h.request_resource(&resource);
    assert_eq!(h.take_results().len(), 1);
    assert!(h.messages.is_empty());
    assert_eq!(generator.renders(), 1);

    // Edited: the old entry goes and the resource is rendered again
    let mut edited = (*resource).clone();
    edited.edited_version += 1;
    let edited = Arc::new(edited);
    h.request_resource(&edited);
    assert!(h.take_results().is_empty());
    h.flush_when(1);
    assert_eq!(h.take_results().len(), 1);
    assert_eq!(generator.renders(), 2);

    // Edited resources never touch the disk cache
    assert_eq!(std::fs::read_dir(cache.path()).unwrap().count(), 0);
}

#[test]
#[serial]
fn test_edit_queued_behind_older_render_is_rendered_again() {
    let cache = tempfile::tempdir().unwrap();
    let generator = Arc::new(CountingGenerator::default());
    let mut h = harness(cache.path(), Arc::new(MemoryAssets::new()));
    h.previewer.add_preview_generator(generator.clone());

    // Both edit states wait in the queue for the same key
    let resource = Arc::new(PreviewResource::new(7, "Image").with_image(solid_image(4, 4, 3)));
    let mut edited = (*resource).clone();
    edited.edited_version += 1;
    let edited = Arc::new(edited);
    h.request_resource(&resource);
    h.request_resource(&edited);
    assert_eq!(h.previewer.queued_count(), 2);

    h.previewer.start().unwrap();
    h.flush_when(2);
    assert_eq!(h.take_results().len(), 2);
    assert_eq!(generator.renders(), 2);

    // The cache now holds the newer edit state
    h.request_resource(&edited);
    assert_eq!(h.take_results().len(), 1);
    assert!(h.messages.is_empty());
    assert_eq!(generator.renders(), 2);
}

// ============================================================================
// Cache bookkeeping
// ============================================================================

#[test]
#[serial]
fn test_hits_bump_lru_order() {
    let cache = tempfile::tempdir().unwrap();
    let assets = Arc::new(MemoryAssets::new());
    assets.insert("/a.png", solid_image(4, 4, 1), 1);
    assets.insert("/b.png", solid_image(4, 4, 2), 1);
    let mut h = harness(cache.path(), assets);
    h.previewer.add_preview_generator(Arc::new(ImagePreviewGenerator::new()));
    h.previewer.start().unwrap();

    h.request("/a.png");
    h.request("/b.png");
    h.flush_when(2);
    let a = h.previewer.cached_order("/a.png").unwrap();
    let b = h.previewer.cached_order("/b.png").unwrap();
    assert!(a < b);

    h.request("/a.png");
    assert!(h.previewer.cached_order("/a.png").unwrap() > b);
    assert_eq!(h.previewer.cached_count(), 2);
}

#[test]
#[serial]
fn test_callbacks_complete_in_request_order() {
    let cache = tempfile::tempdir().unwrap();
    let assets = Arc::new(MemoryAssets::new());
    for name in ["/1.png", "/2.png", "/3.png"] {
        assets.insert(name, solid_image(4, 4, 5), 1);
    }
    let mut h = harness(cache.path(), assets);
    h.previewer.add_preview_generator(Arc::new(ImagePreviewGenerator::new()));
    h.previewer.start().unwrap();

    for name in ["/1.png", "/2.png", "/3.png"] {
        h.request(name);
    }
    h.flush_when(3);
    let paths: Vec<String> = h.take_results().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, vec!["/1.png", "/2.png", "/3.png"]);
}

#[test]
#[serial]
fn test_dropped_owner_skips_callback() {
    let cache = tempfile::tempdir().unwrap();
    let assets = Arc::new(MemoryAssets::new());
    assets.insert("/a.png", solid_image(4, 4, 1), 1);
    let mut h = harness(cache.path(), assets);
    h.previewer.add_preview_generator(Arc::new(ImagePreviewGenerator::new()));

    let owner = Arc::new(Mutex::new(0usize));
    h.previewer
        .queue_resource_preview("/a.png", &owner, |calls, _| *calls.lock().unwrap() += 1);
    let weak = Arc::downgrade(&owner);
    drop(owner);

    h.previewer.start().unwrap();
    h.flush_when(1);
    assert!(weak.upgrade().is_none());
    assert!(h.previewer.is_cached("/a.png"));
}

// ============================================================================
// Invalidation
// ============================================================================

#[test]
#[serial]
fn test_check_for_invalidation_drops_stale_entry() {
    let cache = tempfile::tempdir().unwrap();
    let assets = Arc::new(MemoryAssets::new());
    assets.insert("/a.png", solid_image(4, 4, 1), 10);
    let mut h = harness(cache.path(), assets.clone());
    h.previewer.add_preview_generator(Arc::new(ImagePreviewGenerator::new()));
    h.previewer.start().unwrap();
    h.request("/a.png");
    h.flush_when(1);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    h.previewer.subscribe(move |event| sink.lock().unwrap().push(event.clone())).unwrap();

    // Unchanged file: nothing happens
    h.previewer.check_for_invalidation("/a.png");
    assert!(h.previewer.is_cached("/a.png"));
    assert!(h.messages.is_empty());

    assets.touch("/a.png", 11);
    h.previewer.check_for_invalidation("/a.png");
    assert!(!h.previewer.is_cached("/a.png"));
    // Emitted on the main thread, not inline
    assert!(events.lock().unwrap().is_empty());
    h.messages.flush();
    assert_eq!(*events.lock().unwrap(), vec![PreviewEvent::Invalidated("/a.png".to_string())]);

    // Not cached any more
    h.previewer.check_for_invalidation("/a.png");
    assert!(h.messages.is_empty());
}

// ============================================================================
// Lifecycle and generators
// ============================================================================

#[test]
#[serial]
fn test_start_twice_fails() {
    let cache = tempfile::tempdir().unwrap();
    let mut h = harness(cache.path(), Arc::new(MemoryAssets::new()));
    h.previewer.start().unwrap();
    assert!(matches!(h.previewer.start(), Err(Error::InitializationFailed(_))));
    assert!(h.previewer.is_running());

    h.previewer.stop();
    assert!(!h.previewer.is_running());
    h.previewer.stop();

    // Restartable
    h.previewer.start().unwrap();
    h.previewer.stop();
}

#[test]
#[serial]
fn test_requests_wait_for_start() {
    let cache = tempfile::tempdir().unwrap();
    let assets = Arc::new(MemoryAssets::new());
    assets.insert("/a.png", solid_image(4, 4, 1), 1);
    let mut h = harness(cache.path(), assets);
    h.previewer.add_preview_generator(Arc::new(ImagePreviewGenerator::new()));

    h.request("/a.png");
    assert_eq!(h.previewer.queued_count(), 1);
    thread::sleep(Duration::from_millis(20));
    assert!(h.messages.is_empty());

    h.previewer.start().unwrap();
    h.flush_when(1);
    assert_eq!(h.previewer.queued_count(), 0);
}

#[test]
#[serial]
fn test_removed_generator_is_not_used() {
    let cache = tempfile::tempdir().unwrap();
    let assets = Arc::new(MemoryAssets::new());
    assets.insert("/a.png", solid_image(4, 4, 1), 1);
    let mut h = harness(cache.path(), assets);

    let generator: Arc<dyn PreviewGenerator> = Arc::new(ImagePreviewGenerator::new());
    h.previewer.add_preview_generator(generator.clone());
    assert_eq!(h.previewer.preview_generator_count(), 1);
    assert!(h.previewer.remove_preview_generator(&generator));
    assert!(!h.previewer.remove_preview_generator(&generator));
    assert_eq!(h.previewer.preview_generator_count(), 0);

    h.previewer.start().unwrap();
    h.request("/a.png");
    h.flush_when(1);
    assert!(h.take_results()[0].preview.is_none());
}

#[test]
#[serial]
fn test_textures_are_freed_with_last_reference() {
    let cache = tempfile::tempdir().unwrap();
    let assets = Arc::new(MemoryAssets::new());
    assets.insert("/a.png", solid_image(4, 4, 1), 10);
    let mut h = harness(cache.path(), assets.clone());
    h.previewer.add_preview_generator(Arc::new(ImagePreviewGenerator::new()));
    h.previewer.start().unwrap();
    h.request("/a.png");
    h.flush_when(1);
    h.previewer.stop();

    let results = h.take_results();
    let rid = results[0].preview.as_ref().unwrap().rid();
    assert!(h.rendering.lock().unwrap().is_live(rid));
    assert_eq!(h.rendering.lock().unwrap().textures.len(), 2);

    drop(results);
    assets.touch("/a.png", 11);
    h.previewer.check_for_invalidation("/a.png");
    assert!(!h.rendering.lock().unwrap().is_live(rid));
    assert!(h.rendering.lock().unwrap().textures.is_empty());
}

#[test]
#[serial]
fn test_zero_thumbnail_size_rejected() {
    let config = PreviewConfig {
        thumbnail_size: 0,
        ..PreviewConfig::default()
    };
    let result = ResourcePreviewer::new(
        config,
        Arc::new(MemoryAssets::new()),
        Arc::new(Mutex::new(MockRenderingServer::new())),
        Arc::new(MessageQueue::new()),
    );
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}
