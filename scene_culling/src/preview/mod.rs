//! Thumbnail previews for assets and edited resources.
//!
//! `ResourcePreviewer` renders previews on one background worker, keeps
//! them in an in-memory cache, mirrors path previews to an on-disk cache
//! under `resthumb-<md5>` files, and hands results back to the main
//! thread through the deferred `MessageQueue`.

mod asset;
mod disk_cache;
mod generator;
mod previewer;
mod resource;
mod texture;

#[cfg(test)]
mod test_support;

pub use asset::{AssetSource, DiskAssetSource};
pub use generator::{ImagePreviewGenerator, PreviewGenerator};
pub use previewer::{PreviewConfig, PreviewEvent, PreviewResult, ResourcePreviewer};
pub use resource::{hash_edited_version, PreviewResource};
pub use texture::PreviewTexture;
