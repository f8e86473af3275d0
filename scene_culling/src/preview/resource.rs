/// In-memory resources handed to preview generators.

use std::sync::Arc;
use image::RgbaImage;

/// A resource as the preview cache sees it: an identity, a type name the
/// generators dispatch on, an edit counter and optional pixel content.
#[derive(Debug, Clone, Default)]
pub struct PreviewResource {
    pub id: u64,
    pub type_name: String,
    /// Bumped by the editor on every change
    pub edited_version: u32,
    pub image: Option<Arc<RgbaImage>>,
    /// Resources this one stores by reference
    pub sub_resources: Vec<Arc<PreviewResource>>,
}

impl PreviewResource {
    pub fn new(id: u64, type_name: impl Into<String>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, image: RgbaImage) -> Self {
        self.image = Some(Arc::new(image));
        self
    }

    pub fn with_sub_resource(mut self, resource: Arc<PreviewResource>) -> Self {
        self.sub_resources.push(resource);
        self
    }

    /// Cache key of an edited resource: `"ID:<id>"`.
    pub fn path_id(&self) -> String {
        format!("ID:{}", self.id)
    }
}

const DJB2_SEED: u32 = 5381;

fn djb2_one(value: u32, previous: u32) -> u32 {
    (previous << 5).wrapping_add(previous).wrapping_add(value)
}

/// Hash of a resource's edit state, folding in its sub-resources.
///
/// Two calls return the same value until the resource or anything it
/// references is edited.
pub fn hash_edited_version(resource: &PreviewResource) -> u32 {
    resource
        .sub_resources
        .iter()
        .fold(djb2_one(resource.edited_version, DJB2_SEED), |hash, sub| {
            djb2_one(hash_edited_version(sub), hash)
        })
}

#[cfg(test)]
#[path = "resource_tests.rs"]
mod tests;
