/// Preview images registered with the rendering server.

use std::fmt;
use std::sync::{Arc, Mutex};
use image::RgbaImage;
use crate::error::Result;
use crate::servers::{self, RenderingServer, Rid};
use crate::engine_bail;

const SOURCE: &str = "culling::PreviewTexture";

/// Frees the server texture when the last `PreviewTexture` clone drops.
struct TextureHandle {
    rid: Rid,
    rendering: Arc<Mutex<dyn RenderingServer>>,
}

impl Drop for TextureHandle {
    fn drop(&mut self) {
        if let Ok(mut server) = self.rendering.lock() {
            server.free_rid(self.rid);
        }
    }
}

/// A preview image and the server texture created from it.
///
/// Clones share both; the texture is freed with the last clone.
#[derive(Clone)]
pub struct PreviewTexture {
    image: Arc<RgbaImage>,
    handle: Arc<TextureHandle>,
}

impl PreviewTexture {
    /// Upload `image` to the rendering server.
    ///
    /// # Errors
    ///
    /// `BackendError` if the server is poisoned or returns an invalid handle.
    pub fn register(image: RgbaImage, rendering: &Arc<Mutex<dyn RenderingServer>>) -> Result<Self> {
        let rid = servers::lock(rendering, "rendering server")?.texture_create_from_image(&image);
        if !rid.is_valid() {
            engine_bail!(
                SOURCE,
                "Rendering server refused a {}x{} preview texture",
                image.width(),
                image.height()
            );
        }
        Ok(Self {
            image: Arc::new(image),
            handle: Arc::new(TextureHandle {
                rid,
                rendering: Arc::clone(rendering),
            }),
        })
    }

    pub fn rid(&self) -> Rid {
        self.handle.rid
    }

    pub fn image(&self) -> &Arc<RgbaImage> {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl fmt::Debug for PreviewTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewTexture")
            .field("rid", &self.handle.rid)
            .field("size", &self.image.dimensions())
            .finish()
    }
}

impl PartialEq for PreviewTexture {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}
