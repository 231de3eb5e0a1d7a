//! Image preprocessing for the detector and classifiers

use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array4;
use serde::Deserialize;

/// Default input size for the face detector (YuNet)
pub const DETECTOR_INPUT_SIZE: InferenceSize = InferenceSize::new(600, 600);

/// Default input size for the age and gender classifiers
pub const CLASSIFIER_INPUT_SIZE: InferenceSize = InferenceSize::new(227, 227);

/// Pixel dimensions a model expects its input resized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct InferenceSize {
    pub width: u32,
    pub height: u32,
}

impl InferenceSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Three-channel image at a model's inference size.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pixels: RgbImage,
    size: InferenceSize,
}

impl NormalizedImage {
    /// The inference size this image was produced for.
    pub fn size(&self) -> InferenceSize {
        self.size
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// NCHW tensor of raw `[0, 255]` values in the image's channel order.
    pub fn to_nchw(&self) -> Array4<f32> {
        build_blob(self, [0.0; 3])
    }
}

/// Stretch `image` to `target` and drop alpha.
///
/// The resize ignores aspect ratio; callers that need it must crop first.
pub fn prepare(image: &DynamicImage, target: InferenceSize) -> NormalizedImage {
    let resized = image.resize_exact(target.width, target.height, FilterType::Triangle);
    NormalizedImage {
        pixels: resized.to_rgb8(),
        size: target,
    }
}

/// Per-channel mean over the whole image.
pub fn channel_mean(image: &NormalizedImage) -> [f32; 3] {
    let mut sums = [0f64; 3];
    for pixel in image.pixels.pixels() {
        for c in 0..3 {
            sums[c] += pixel[c] as f64;
        }
    }
    let count = (image.pixels.width() as f64 * image.pixels.height() as f64).max(1.0);
    [
        (sums[0] / count) as f32,
        (sums[1] / count) as f32,
        (sums[2] / count) as f32,
    ]
}

/// Build the classifier input tensor: NCHW, scale 1.0, `mean` subtracted per
/// channel, channel order unchanged.
pub fn build_blob(image: &NormalizedImage, mean: [f32; 3]) -> Array4<f32> {
    let (width, height) = image.pixels.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in image.pixels.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 - mean[c];
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn solid(width: u32, height: u32, color: [u8; 4]) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(color)))
    }

    #[test]
    fn test_prepare_stretches_to_target() {
        let image = solid(1200, 300, [10, 20, 30, 128]);
        let prepared = prepare(&image, DETECTOR_INPUT_SIZE);

        assert_eq!(prepared.size(), DETECTOR_INPUT_SIZE);
        assert_eq!(prepared.pixels().dimensions(), (600, 600));
        // Alpha is dropped, color kept.
        let pixel = prepared.pixels().get_pixel(300, 300).0;
        for (got, want) in pixel.iter().zip([10u8, 20, 30]) {
            assert!(got.abs_diff(want) <= 1, "{pixel:?}");
        }
    }

    #[test]
    fn test_channel_mean() {
        let mut pixels = RgbaImage::from_pixel(2, 1, Rgba([0, 100, 200, 255]));
        pixels.put_pixel(1, 0, Rgba([100, 100, 0, 255]));
        let prepared = prepare(&DynamicImage::ImageRgba8(pixels), InferenceSize::new(2, 1));

        let mean = channel_mean(&prepared);
        assert!((mean[0] - 50.0).abs() < 1e-4);
        assert!((mean[1] - 100.0).abs() < 1e-4);
        assert!((mean[2] - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_blob_layout_and_mean_subtraction() {
        let image = solid(4, 4, [30, 60, 90, 255]);
        let prepared = prepare(&image, InferenceSize::new(3, 2));

        let blob = build_blob(&prepared, [10.0, 20.0, 30.0]);
        assert_eq!(blob.shape(), &[1, 3, 2, 3]);
        assert!((blob[[0, 0, 1, 2]] - 20.0).abs() <= 1.0);
        assert!((blob[[0, 1, 0, 0]] - 40.0).abs() <= 1.0);
        assert!((blob[[0, 2, 1, 1]] - 60.0).abs() <= 1.0);

        let raw = prepared.to_nchw();
        assert!((raw[[0, 2, 0, 0]] - 90.0).abs() <= 1.0);
    }
}
