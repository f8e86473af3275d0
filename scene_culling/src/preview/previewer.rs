/// Background preview generation with memory and disk caches.
///
/// Requests are served synchronously from the memory cache when they can
/// be. Everything else goes through a FIFO drained by one worker thread:
/// it checks the disk cache, falls back to the generators, records the
/// result in the memory cache and posts the completion callback to the
/// main-thread `MessageQueue`. The memory cache, the queue and the LRU
/// order counter share one mutex; callbacks never run under it.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use image::RgbaImage;
use rustc_hash::FxHashMap;
use crate::dispatch::{EventSinks, MessageQueue, SinkId};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::servers::{self, RenderingServer};
use crate::{engine_bail, engine_debug, engine_error, engine_info};
use super::asset::AssetSource;
use super::disk_cache::{self, Sidecar};
use super::generator::{downscale_small, PreviewGenerator};
use super::resource::{hash_edited_version, PreviewResource};
use super::texture::PreviewTexture;

const SOURCE: &str = "culling::ResourcePreviewer";

// ===== CONFIG =====

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewConfig {
    /// Side of a full preview in pixels
    pub thumbnail_size: u32,
    /// Side of a small preview in pixels
    pub small_thumbnail_size: u32,
    /// Directory holding the `resthumb-*` files
    pub cache_dir: PathBuf,
    /// Sleep between checks while `stop()` waits for the worker
    pub shutdown_poll: Duration,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            thumbnail_size: 64,
            small_thumbnail_size: 16,
            cache_dir: std::env::temp_dir().join("scene_culling").join("previews"),
            shutdown_poll: Duration::from_millis(10),
        }
    }
}

// ===== RESULTS AND EVENTS =====

/// What a completion callback receives.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewResult {
    /// Asset path, or `"ID:<id>"` for an edited resource
    pub path: String,
    pub preview: Option<PreviewTexture>,
    pub small_preview: Option<PreviewTexture>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewEvent {
    /// The cached preview of this path went stale and was dropped
    Invalidated(String),
}

type PreviewCallback = Box<dyn FnOnce(&PreviewResult) + Send>;

/// Wrap `callback` so it only runs while `owner` is alive.
fn bind_owner<T, F>(owner: &Arc<T>, callback: F) -> PreviewCallback
where
    T: Send + Sync + 'static,
    F: FnOnce(&T, &PreviewResult) + Send + 'static,
{
    let owner = Arc::downgrade(owner);
    Box::new(move |result| {
        if let Some(owner) = owner.upgrade() {
            callback(&owner, result);
        }
    })
}

// ===== SHARED STATE =====

struct CacheItem {
    order: u64,
    preview: Option<PreviewTexture>,
    small_preview: Option<PreviewTexture>,
    last_hash: u32,
    modified_time: u64,
}

struct QueueItem {
    key: String,
    resource: Option<Arc<PreviewResource>>,
    callback: PreviewCallback,
}

/// Everything guarded by the single preview mutex.
#[derive(Default)]
struct CacheState {
    cache: FxHashMap<String, CacheItem>,
    queue: VecDeque<QueueItem>,
    order: u64,
}

impl CacheState {
    fn next_order(&mut self) -> u64 {
        let order = self.order;
        self.order += 1;
        order
    }

    /// Serve `key` from the cache and bump its LRU stamp. With `hash`,
    /// only an entry rendered from that edit state counts.
    fn hit(&mut self, key: &str, hash: Option<u32>) -> Option<PreviewResult> {
        let entry = self.cache.get_mut(key)?;
        if hash.is_some_and(|hash| hash != entry.last_hash) {
            return None;
        }
        entry.order = self.order;
        self.order += 1;
        Some(PreviewResult {
            path: key.to_string(),
            preview: entry.preview.clone(),
            small_preview: entry.small_preview.clone(),
        })
    }
}

/// Counting semaphore the worker sleeps on.
#[derive(Default)]
struct Semaphore {
    count: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    fn post(&self) {
        let mut count = self.count.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *count += 1;
        self.available.notify_one();
    }

    fn wait(&self) {
        let mut count = self.count.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while *count == 0 {
            count = self
                .available
                .wait(count)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *count -= 1;
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        *self.count.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Shared {
    config: PreviewConfig,
    state: Mutex<CacheState>,
    semaphore: Semaphore,
    generators: RwLock<Vec<Arc<dyn PreviewGenerator>>>,
    assets: Arc<dyn AssetSource>,
    rendering: Arc<Mutex<dyn RenderingServer>>,
    messages: Arc<MessageQueue>,
    events: Arc<Mutex<EventSinks<PreviewEvent>>>,
    exit: AtomicBool,
    exited: AtomicBool,
}

impl Shared {
    fn locked(&self) -> MutexGuard<'_, CacheState> {
        // Callbacks and generators never run under this lock
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn generators(&self) -> Vec<Arc<dyn PreviewGenerator>> {
        self.generators
            .read()
            .map(|generators| generators.clone())
            .unwrap_or_default()
    }

    // ===== WORKER =====

    fn run(&self) {
        engine_info!(SOURCE, "Preview worker started");
        while !self.exit.load(Ordering::SeqCst) {
            self.semaphore.wait();
            if self.exit.load(Ordering::SeqCst) {
                break;
            }
            let Some(item) = self.locked().queue.pop_front() else {
                continue;
            };
            self.process(item);
        }
        engine_info!(SOURCE, "Preview worker stopped");
        self.exited.store(true, Ordering::SeqCst);
    }

    fn process(&self, item: QueueItem) {
        // Someone finished the same key while this request waited; an
        // in-memory resource edited since then still needs a fresh render
        let current_hash = item.resource.as_deref().map(hash_edited_version);
        let cached = {
            let state = self.locked();
            state
                .cache
                .get(&item.key)
                .filter(|entry| current_hash.is_none_or(|hash| hash == entry.last_hash))
                .map(|entry| (entry.preview.clone(), entry.small_preview.clone(), entry.last_hash))
        };
        if let Some((preview, small_preview, last_hash)) = cached {
            self.preview_ready(item, preview, small_preview, last_hash);
            return;
        }

        let (preview, small_preview, hash) = match &item.resource {
            Some(resource) => {
                let (preview, small_preview) = self.generate(Some(resource), &item.key);
                (preview, small_preview, hash_edited_version(resource))
            }
            None => {
                let (preview, small_preview) = self.load_or_generate(&item.key);
                (preview, small_preview, 0)
            }
        };
        let preview = preview.and_then(|image| self.register(image));
        let small_preview = small_preview.and_then(|image| self.register(image));
        self.preview_ready(item, preview, small_preview, hash);
    }

    fn register(&self, image: RgbaImage) -> Option<PreviewTexture> {
        PreviewTexture::register(image, &self.rendering).ok()
    }

    /// Disk cache first, generators when it is missing or stale; fresh
    /// renders are written back.
    fn load_or_generate(&self, path: &str) -> (Option<RgbaImage>, Option<RgbaImage>) {
        let base = disk_cache::cache_base(&self.config.cache_dir, &self.assets.globalize_path(path));
        if let Some(cached) = disk_cache::load_current(&base, self.config.thumbnail_size, self.assets.as_ref(), path) {
            engine_debug!(SOURCE, "Preview of '{}' loaded from disk cache", path);
            return (Some(cached.preview), cached.small_preview);
        }

        let (preview, small_preview) = self.generate(None, path);
        if let Some(preview) = &preview {
            let sidecar = Sidecar {
                thumbnail_size: self.config.thumbnail_size,
                has_small: small_preview.is_some(),
                modified_time: self.assets.modified_time(path),
                md5: self.assets.md5(path).unwrap_or_default(),
            };
            if let Err(err) = disk_cache::store(&base, preview, small_preview.as_ref(), &sidecar) {
                engine_error!(
                    SOURCE,
                    "Cannot write preview cache '{}': {}. Check user write permissions.",
                    base.display(),
                    err
                );
            }
        }
        (preview, small_preview)
    }

    /// Run the first generator handling the resource type.
    fn generate(&self, resource: Option<&Arc<PreviewResource>>, path: &str) -> (Option<RgbaImage>, Option<RgbaImage>) {
        let type_name = match resource {
            Some(resource) => Some(resource.type_name.clone()),
            None => self.assets.resource_type(path),
        };
        let Some(type_name) = type_name.filter(|name| !name.is_empty()) else {
            return (None, None);
        };

        let render = |generator: &dyn PreviewGenerator, size: u32| match resource {
            Some(resource) => generator.generate(resource, size),
            None => generator.generate_from_path(self.assets.as_ref(), path, size),
        };

        let generators = self.generators();
        let Some(generator) = generators.iter().find(|generator| generator.handles(&type_name)) else {
            return (None, None);
        };
        let preview = render(&**generator, self.config.thumbnail_size);
        let mut small_preview = None;
        if generator.can_generate_small_preview() {
            small_preview = render(&**generator, self.config.small_thumbnail_size);
        }
        if small_preview.is_none() && generator.generate_small_preview_automatically() {
            small_preview = preview
                .as_ref()
                .map(|image| downscale_small(image, self.config.small_thumbnail_size));
        }
        (preview, small_preview)
    }

    /// Record a finished request and post its callback to the main thread.
    fn preview_ready(
        &self,
        item: QueueItem,
        preview: Option<PreviewTexture>,
        small_preview: Option<PreviewTexture>,
        hash: u32,
    ) {
        let modified_time = match item.resource {
            Some(_) => 0,
            None => self.assets.modified_time(&item.key),
        };
        let replaced = {
            let mut state = self.locked();
            let order = state.next_order();
            state.cache.insert(
                item.key.clone(),
                CacheItem {
                    order,
                    preview: preview.clone(),
                    small_preview: small_preview.clone(),
                    last_hash: hash,
                    modified_time,
                },
            )
        };
        drop(replaced);

        let result = PreviewResult {
            path: item.key,
            preview,
            small_preview,
        };
        let callback = item.callback;
        self.messages.push(move || callback(&result));
    }
}

// ===== PREVIEWER =====

/// Asynchronous preview cache.
///
/// # Example
///
/// ```no_run
/// use std::sync::{Arc, Mutex};
/// use scene_culling::culling::{MessageQueue, servers::ServerSet};
/// use scene_culling::culling::preview::{
///     DiskAssetSource, ImagePreviewGenerator, PreviewConfig, ResourcePreviewer,
/// };
///
/// let servers = ServerSet::mock();
/// let messages = Arc::new(MessageQueue::new());
/// let mut previewer = ResourcePreviewer::new(
///     PreviewConfig::default(),
///     Arc::new(DiskAssetSource::new("assets")),
///     servers.rendering.clone(),
///     messages.clone(),
/// )?;
/// previewer.add_preview_generator(Arc::new(ImagePreviewGenerator::new()));
/// previewer.start()?;
///
/// let owner = Arc::new(Mutex::new(None));
/// previewer.queue_resource_preview("/icon.png", &owner, |slot, result| {
///     *slot.lock().unwrap() = result.preview.clone();
/// });
///
/// // Once per frame on the main thread
/// messages.flush();
/// # Ok::<(), scene_culling::culling::Error>(())
/// ```
pub struct ResourcePreviewer {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ResourcePreviewer {
    /// Create a stopped previewer. Call `start()` to spawn the worker.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero thumbnail size.
    pub fn new(
        config: PreviewConfig,
        assets: Arc<dyn AssetSource>,
        rendering: Arc<Mutex<dyn RenderingServer>>,
        messages: Arc<MessageQueue>,
    ) -> Result<Self> {
        if config.thumbnail_size == 0 || config.small_thumbnail_size == 0 {
            engine_bail!(
                InvalidArgument: SOURCE,
                "Thumbnail sizes must be positive, got {} and {}",
                config.thumbnail_size,
                config.small_thumbnail_size
            );
        }
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(CacheState::default()),
                semaphore: Semaphore::default(),
                generators: RwLock::new(Vec::new()),
                assets,
                rendering,
                messages,
                events: Arc::new(Mutex::new(EventSinks::new())),
                exit: AtomicBool::new(false),
                exited: AtomicBool::new(true),
            }),
            worker: None,
        })
    }

    /// Create a previewer on the `Engine`'s rendering server and message
    /// queue.
    pub fn from_engine(config: PreviewConfig, assets: Arc<dyn AssetSource>) -> Result<Self> {
        let rendering = Engine::servers()?.rendering;
        let messages = Engine::message_queue()?;
        Self::new(config, assets, rendering, messages)
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.shared.config
    }

    // ===== WORKER LIFECYCLE =====

    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// `InitializationFailed` if the worker is already running or the
    /// thread cannot be spawned.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            engine_bail!(InitializationFailed: SOURCE, "Preview worker already started");
        }
        self.shared.exit.store(false, Ordering::SeqCst);
        self.shared.exited.store(false, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let worker = thread::Builder::new()
            .name("resource-preview".to_string())
            .spawn(move || shared.run());
        match worker {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.exited.store(true, Ordering::SeqCst);
                Err(crate::engine_err!(InitializationFailed: SOURCE, "Cannot spawn preview worker: {}", err))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Stop the worker after its current request.
    ///
    /// Waits for the worker to exit, syncing the rendering server between
    /// polls so a worker blocked on it can finish. Requests still queued
    /// stay queued for the next `start()`. No-op when not running.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shared.exit.store(true, Ordering::SeqCst);
        self.shared.semaphore.post();
        while !self.shared.exited.load(Ordering::SeqCst) {
            thread::sleep(self.shared.config.shutdown_poll);
            if let Ok(mut server) = servers::lock(&self.shared.rendering, "rendering server") {
                server.sync();
            }
        }
        if worker.join().is_err() {
            engine_error!(SOURCE, "Preview worker panicked");
        }
    }

    // ===== GENERATORS =====

    pub fn add_preview_generator(&self, generator: Arc<dyn PreviewGenerator>) {
        if let Ok(mut generators) = self.shared.generators.write() {
            generators.push(generator);
        }
    }

    /// Returns false if `generator` was not registered.
    pub fn remove_preview_generator(&self, generator: &Arc<dyn PreviewGenerator>) -> bool {
        let Ok(mut generators) = self.shared.generators.write() else {
            return false;
        };
        match generators.iter().position(|registered| Arc::ptr_eq(registered, generator)) {
            Some(index) => {
                generators.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn preview_generator_count(&self) -> usize {
        self.shared.generators.read().map_or(0, |generators| generators.len())
    }

    // ===== REQUESTS =====

    /// Request the preview of the asset at `path`.
    ///
    /// A cached preview is handed to `callback` before this returns.
    /// Otherwise the request is queued and `callback` runs on the next
    /// `MessageQueue::flush()` after the worker finishes it. The callback
    /// is skipped if `owner` has been dropped by then.
    pub fn queue_resource_preview<T, F>(&self, path: &str, owner: &Arc<T>, callback: F)
    where
        T: Send + Sync + 'static,
        F: FnOnce(&T, &PreviewResult) + Send + 'static,
    {
        let callback = bind_owner(owner, callback);
        let mut state = self.shared.locked();
        if let Some(result) = state.hit(path, None) {
            drop(state);
            callback(&result);
            return;
        }

        state.queue.push_back(QueueItem {
            key: path.to_string(),
            resource: None,
            callback,
        });
        drop(state);
        self.shared.semaphore.post();
    }

    /// Request the preview of an in-memory resource, keyed `"ID:<id>"`.
    ///
    /// A cached preview counts only while `hash_edited_version` of the
    /// resource is unchanged; an outdated entry is dropped and the
    /// resource is queued again.
    pub fn queue_edited_resource_preview<T, F>(&self, resource: &Arc<PreviewResource>, owner: &Arc<T>, callback: F)
    where
        T: Send + Sync + 'static,
        F: FnOnce(&T, &PreviewResult) + Send + 'static,
    {
        let callback = bind_owner(owner, callback);
        let key = resource.path_id();
        let hash = hash_edited_version(resource);

        let mut state = self.shared.locked();
        if let Some(result) = state.hit(&key, Some(hash)) {
            drop(state);
            callback(&result);
            return;
        }

        let outdated = state.cache.remove(&key);
        state.queue.push_back(QueueItem {
            key,
            resource: Some(Arc::clone(resource)),
            callback,
        });
        drop(state);
        drop(outdated);
        self.shared.semaphore.post();
    }

    // ===== INVALIDATION =====

    /// Drop the cached preview of `path` if the asset changed since it was
    /// rendered, and emit `PreviewEvent::Invalidated` on the next flush.
    pub fn check_for_invalidation(&self, path: &str) {
        let modified_time = self.shared.assets.modified_time(path);
        let removed = {
            let mut state = self.shared.locked();
            match state.cache.get(path) {
                Some(entry) if entry.modified_time != modified_time => state.cache.remove(path),
                _ => None,
            }
        };
        if removed.is_none() {
            return;
        }
        drop(removed);

        engine_debug!(SOURCE, "Preview of '{}' invalidated", path);
        let events = Arc::clone(&self.shared.events);
        let event = PreviewEvent::Invalidated(path.to_string());
        self.shared.messages.push(move || {
            if let Ok(mut sinks) = events.lock() {
                sinks.emit(&event);
            }
        });
    }

    pub fn subscribe<F>(&self, sink: F) -> Result<SinkId>
    where
        F: FnMut(&PreviewEvent) + Send + 'static,
    {
        let mut sinks = self
            .shared
            .events
            .lock()
            .map_err(|_| Error::BackendError("preview event sinks poisoned".to_string()))?;
        Ok(sinks.subscribe(sink))
    }

    pub fn unsubscribe(&self, id: SinkId) -> bool {
        self.shared
            .events
            .lock()
            .map(|mut sinks| sinks.unsubscribe(id))
            .unwrap_or(false)
    }

    // ===== INSPECTION =====

    pub fn is_cached(&self, key: &str) -> bool {
        self.shared.locked().cache.contains_key(key)
    }

    pub fn cached_count(&self) -> usize {
        self.shared.locked().cache.len()
    }

    /// LRU stamp of a cache entry; larger is more recent.
    pub fn cached_order(&self, key: &str) -> Option<u64> {
        self.shared.locked().cache.get(key).map(|entry| entry.order)
    }

    /// Requests waiting for the worker.
    pub fn queued_count(&self) -> usize {
        self.shared.locked().queue.len()
    }
}

impl Drop for ResourcePreviewer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "previewer_tests.rs"]
mod tests;
