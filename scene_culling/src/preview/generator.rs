/// Preview generators: per-type thumbnail renderers.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use super::asset::AssetSource;
use super::resource::PreviewResource;

/// Renders thumbnails for the resource types it `handles`.
///
/// Generators run on the preview worker thread, in registration order;
/// the first one handling a type wins.
pub trait PreviewGenerator: Send + Sync {
    fn handles(&self, type_name: &str) -> bool;

    /// Render `resource` into a thumbnail fitting `size` x `size`.
    fn generate(&self, resource: &PreviewResource, size: u32) -> Option<RgbaImage>;

    /// Render the asset at `path`. Loads it through `assets` by default.
    fn generate_from_path(&self, assets: &dyn AssetSource, path: &str, size: u32) -> Option<RgbaImage> {
        let resource = assets.load(path)?;
        self.generate(&resource, size)
    }

    /// Derive the small preview from the full one by bicubic downscale.
    fn generate_small_preview_automatically(&self) -> bool {
        false
    }

    /// Render the small preview with its own `generate` call.
    fn can_generate_small_preview(&self) -> bool {
        false
    }
}

/// Bicubic downscale of a full preview into a `size` x `size` small one.
pub(crate) fn downscale_small(preview: &RgbaImage, size: u32) -> RgbaImage {
    imageops::resize(preview, size, size, FilterType::CatmullRom)
}

/// Thumbnails for `"Image"` resources: the picture scaled to fit the
/// thumbnail, aspect ratio kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagePreviewGenerator;

impl ImagePreviewGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl PreviewGenerator for ImagePreviewGenerator {
    fn handles(&self, type_name: &str) -> bool {
        type_name == "Image"
    }

    fn generate(&self, resource: &PreviewResource, size: u32) -> Option<RgbaImage> {
        let image = resource.image.as_ref()?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 || size == 0 {
            return None;
        }
        let (fit_width, fit_height) = if width >= height {
            (size, ((height as u64 * size as u64) / width as u64).max(1) as u32)
        } else {
            (((width as u64 * size as u64) / height as u64).max(1) as u32, size)
        };
        Some(imageops::resize(image.as_ref(), fit_width, fit_height, FilterType::CatmullRom))
    }

    fn generate_small_preview_automatically(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[path = "generator_tests.rs"]
mod tests;
