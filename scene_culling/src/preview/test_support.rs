//! In-memory assets and counting generators for the preview tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use image::{Rgba, RgbaImage};
use rustc_hash::FxHashMap;
use super::asset::{md5_hex, AssetSource};
use super::generator::{ImagePreviewGenerator, PreviewGenerator};
use super::resource::PreviewResource;

struct MemoryAsset {
    image: Arc<RgbaImage>,
    modified_time: u64,
}

/// Image assets held in memory, with settable modified times.
#[derive(Default)]
pub(crate) struct MemoryAssets {
    assets: Mutex<FxHashMap<String, MemoryAsset>>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, image: RgbaImage, modified_time: u64) {
        self.assets.lock().unwrap().insert(
            path.to_string(),
            MemoryAsset {
                image: Arc::new(image),
                modified_time,
            },
        );
    }

    /// Change the modified time, keeping the content.
    pub fn touch(&self, path: &str, modified_time: u64) {
        if let Some(asset) = self.assets.lock().unwrap().get_mut(path) {
            asset.modified_time = modified_time;
        }
    }
}

impl AssetSource for MemoryAssets {
    fn resource_type(&self, path: &str) -> Option<String> {
        self.assets.lock().unwrap().contains_key(path).then(|| "Image".to_string())
    }

    fn modified_time(&self, path: &str) -> u64 {
        self.assets.lock().unwrap().get(path).map_or(0, |asset| asset.modified_time)
    }

    fn md5(&self, path: &str) -> Option<String> {
        self.assets.lock().unwrap().get(path).map(|asset| md5_hex(asset.image.as_raw()))
    }

    fn globalize_path(&self, path: &str) -> String {
        format!("/project{}", path)
    }

    fn load(&self, path: &str) -> Option<PreviewResource> {
        let assets = self.assets.lock().unwrap();
        let asset = assets.get(path)?;
        Some(PreviewResource {
            type_name: "Image".to_string(),
            image: Some(Arc::clone(&asset.image)),
            ..PreviewResource::default()
        })
    }
}

pub(crate) fn solid_image(width: u32, height: u32, value: u8) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
}

/// `ImagePreviewGenerator` that counts its renders.
#[derive(Default)]
pub(crate) struct CountingGenerator {
    inner: ImagePreviewGenerator,
    renders: AtomicUsize,
}

impl CountingGenerator {
    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

impl PreviewGenerator for CountingGenerator {
    fn handles(&self, type_name: &str) -> bool {
        self.inner.handles(type_name)
    }

    fn generate(&self, resource: &PreviewResource, size: u32) -> Option<RgbaImage> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        self.inner.generate(resource, size)
    }

    fn generate_small_preview_automatically(&self) -> bool {
        true
    }
}
