/// Asset lookup used by the preview worker.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use md5::{Digest, Md5};
use super::resource::PreviewResource;

/// File-system view the preview cache needs for path previews.
pub trait AssetSource: Send + Sync {
    /// Resource type of the asset at `path`, `None` if it cannot be guessed.
    fn resource_type(&self, path: &str) -> Option<String>;

    /// Last modification in seconds since the epoch; 0 if unknown.
    fn modified_time(&self, path: &str) -> u64;

    /// Lowercase hex MD5 of the asset's bytes.
    fn md5(&self, path: &str) -> Option<String>;

    /// Absolute form of `path`, hashed to name the disk cache files.
    fn globalize_path(&self, path: &str) -> String;

    /// Load the asset as an in-memory resource.
    fn load(&self, path: &str) -> Option<PreviewResource>;
}

/// Lowercase hex MD5 of `data`.
pub(crate) fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// Assets stored under a root directory. Paths are resolved relative to
/// the root, with any `res://` prefix or leading `/` stripped.
#[derive(Debug, Clone)]
pub struct DiskAssetSource {
    root: PathBuf,
}

impl DiskAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let relative = path.strip_prefix("res://").unwrap_or(path).trim_start_matches('/');
        self.root.join(relative)
    }
}

impl AssetSource for DiskAssetSource {
    fn resource_type(&self, path: &str) -> Option<String> {
        let extension = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "png" | "jpg" | "jpeg" | "bmp" => Some("Image".to_string()),
            _ => None,
        }
    }

    fn modified_time(&self, path: &str) -> u64 {
        fs::metadata(self.resolve(path))
            .and_then(|metadata| metadata.modified())
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |elapsed| elapsed.as_secs())
    }

    fn md5(&self, path: &str) -> Option<String> {
        fs::read(self.resolve(path)).ok().map(|bytes| md5_hex(&bytes))
    }

    fn globalize_path(&self, path: &str) -> String {
        self.resolve(path).to_string_lossy().into_owned()
    }

    fn load(&self, path: &str) -> Option<PreviewResource> {
        let type_name = self.resource_type(path)?;
        let image = image::open(self.resolve(path)).ok()?.to_rgba8();
        Some(PreviewResource::new(0, type_name).with_image(image))
    }
}

#[cfg(test)]
#[path = "asset_tests.rs"]
mod tests;
