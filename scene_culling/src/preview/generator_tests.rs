use image::Rgba;
use super::*;

fn image_resource(width: u32, height: u32) -> PreviewResource {
    PreviewResource::new(1, "Image").with_image(RgbaImage::from_pixel(width, height, Rgba([0, 128, 255, 255])))
}

#[test]
fn test_image_generator_handles_images_only() {
    let generator = ImagePreviewGenerator::new();
    assert!(generator.handles("Image"));
    assert!(!generator.handles("Mesh"));
    assert!(generator.generate_small_preview_automatically());
    assert!(!generator.can_generate_small_preview());
}

#[test]
fn test_wide_image_fits_width() {
    let generator = ImagePreviewGenerator::new();
    let preview = generator.generate(&image_resource(32, 16), 64).unwrap();
    assert_eq!(preview.dimensions(), (64, 32));
}

#[test]
fn test_tall_image_fits_height() {
    let generator = ImagePreviewGenerator::new();
    let preview = generator.generate(&image_resource(10, 200), 64).unwrap();
    assert_eq!(preview.dimensions(), (3, 64));
}

#[test]
fn test_sliver_keeps_one_pixel() {
    let generator = ImagePreviewGenerator::new();
    let preview = generator.generate(&image_resource(1000, 1), 64).unwrap();
    assert_eq!(preview.dimensions(), (64, 1));
}

#[test]
fn test_resource_without_pixels_has_no_preview() {
    let generator = ImagePreviewGenerator::new();
    assert!(generator.generate(&PreviewResource::new(1, "Image"), 64).is_none());
}

#[test]
fn test_downscale_small_is_square() {
    let preview = RgbaImage::from_pixel(64, 32, Rgba([9, 9, 9, 255]));
    let small = downscale_small(&preview, 16);
    assert_eq!(small.dimensions(), (16, 16));
    assert_eq!(*small.get_pixel(8, 8), Rgba([9, 9, 9, 255]));
}
