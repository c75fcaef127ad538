//! Image preprocessing for classifier inference.
//!
//! Turns uploaded image bytes into the single-item batch tensor the model
//! was trained on: decoded, converted to RGB, resized to a square input and
//! scaled from `[0, 255]` to `[0, 1]`.

use image::{imageops, imageops::FilterType, DynamicImage, RgbImage};

use crate::config::{ModelConfig, TensorLayout};
use crate::error::InferenceError;
use crate::types::upload::ImageKind;

/// Default square input edge for the leaf classifier
pub const DEFAULT_INPUT_SIZE: u32 = 224;

/// Number of color channels fed to the model
pub const CHANNELS: usize = 3;

/// A batch of preprocessed images, flattened in the configured layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    data: Vec<f32>,
    shape: [usize; 4],
    layout: TensorLayout,
}

impl ImageBatch {
    /// Tensor dimensions in layout order, batch first
    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    /// Shape as the signed dimensions ONNX Runtime expects
    pub fn shape_i64(&self) -> Vec<i64> {
        self.shape.iter().map(|&d| d as i64).collect()
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    /// Number of images in the batch
    pub fn batch_size(&self) -> usize {
        self.shape[0]
    }

    /// Flattened pixel values
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

/// Converts images into model input tensors.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    input_size: u32,
    layout: TensorLayout,
}

impl ImagePreprocessor {
    /// Create a preprocessor producing `input_size` x `input_size` RGB tensors
    pub fn new(input_size: u32, layout: TensorLayout) -> Self {
        Self { input_size, layout }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(config.input_size, config.layout)
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    /// Decode raw JPEG/PNG bytes
    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, InferenceError> {
        if bytes.is_empty() {
            return Err(InferenceError::EmptyUpload);
        }
        Ok(image::load_from_memory(bytes)?)
    }

    /// Decode bytes with the decoder for `kind` only
    pub fn decode_as(
        &self,
        bytes: &[u8],
        kind: ImageKind,
    ) -> Result<DynamicImage, InferenceError> {
        if bytes.is_empty() {
            return Err(InferenceError::EmptyUpload);
        }
        Ok(image::load_from_memory_with_format(bytes, kind.into())?)
    }

    /// Decode and preprocess in one step
    pub fn process_bytes(&self, bytes: &[u8]) -> Result<ImageBatch, InferenceError> {
        let image = self.decode(bytes)?;
        Ok(self.process(&image))
    }

    /// Convert to RGB, resize and normalize into a batch of one.
    pub fn process(&self, image: &DynamicImage) -> ImageBatch {
        let resized = self.resize(&image.to_rgb8());
        let side = self.input_size as usize;

        let (data, shape) = match self.layout {
            TensorLayout::Nhwc => (normalize_hwc(&resized), [1, side, side, CHANNELS]),
            TensorLayout::Nchw => (normalize_chw(&resized), [1, CHANNELS, side, side]),
        };

        ImageBatch {
            data,
            shape,
            layout: self.layout,
        }
    }

    /// Bicubic resize to the square model input, ignoring aspect ratio
    fn resize(&self, rgb: &RgbImage) -> RgbImage {
        if rgb.dimensions() == (self.input_size, self.input_size) {
            return rgb.clone();
        }
        imageops::resize(rgb, self.input_size, self.input_size, FilterType::CatmullRom)
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE, TensorLayout::Nhwc)
    }
}

/// Interleaved [H, W, C] values scaled to [0, 1]
fn normalize_hwc(rgb: &RgbImage) -> Vec<f32> {
    rgb.as_raw().iter().map(|&v| v as f32 / 255.0).collect()
}

/// Planar [C, H, W] values scaled to [0, 1]
fn normalize_chw(rgb: &RgbImage) -> Vec<f32> {
    let num_pixels = (rgb.width() * rgb.height()) as usize;
    let mut planes = vec![0.0f32; CHANNELS * num_pixels];

    for (i, pixel) in rgb.pixels().enumerate() {
        for c in 0..CHANNELS {
            planes[c * num_pixels + i] = pixel[c] as f32 / 255.0;
        }
    }

    planes
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    /// Encode an image into the given container format
    pub(crate) fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    /// A leaf-green gradient test image
    pub(crate) fn leaf_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, 160, (y % 256) as u8])
        }))
    }

    fn assert_unit_range(batch: &ImageBatch) {
        assert!(batch.data().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_png_produces_nhwc_batch() {
        let preprocessor = ImagePreprocessor::default();
        let bytes = encode(&leaf_image(640, 480), ImageFormat::Png);

        let batch = preprocessor.process_bytes(&bytes).unwrap();

        assert_eq!(batch.shape(), [1, 224, 224, 3]);
        assert_eq!(batch.data().len(), 224 * 224 * 3);
        assert_eq!(batch.batch_size(), 1);
        assert_unit_range(&batch);
    }

    #[test]
    fn test_jpeg_produces_nhwc_batch() {
        let preprocessor = ImagePreprocessor::default();
        let bytes = encode(&leaf_image(300, 500), ImageFormat::Jpeg);

        let batch = preprocessor.process_bytes(&bytes).unwrap();

        assert_eq!(batch.shape(), [1, 224, 224, 3]);
        assert_unit_range(&batch);
    }

    #[test]
    fn test_small_image_is_upscaled() {
        let preprocessor = ImagePreprocessor::default();
        let bytes = encode(&leaf_image(10, 10), ImageFormat::Png);

        let batch = preprocessor.process_bytes(&bytes).unwrap();

        assert_eq!(batch.shape(), [1, 224, 224, 3]);
        assert_unit_range(&batch);
    }

    #[test]
    fn test_grayscale_and_alpha_become_three_channels() {
        let preprocessor = ImagePreprocessor::default();

        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(50, 40, Luma([128])));
        let batch = preprocessor.process(&gray);
        assert_eq!(batch.shape(), [1, 224, 224, 3]);

        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(30, 30, Rgba([255, 0, 0, 10])));
        let batch = preprocessor.process(&rgba);
        assert_eq!(batch.data().len(), 224 * 224 * 3);
        // Alpha is dropped, not blended
        let first = &batch.data()[0..3];
        assert!(first[0] > 0.99 && first[1] < 0.01 && first[2] < 0.01);
    }

    #[test]
    fn test_scaling_of_known_pixels() {
        let preprocessor = ImagePreprocessor::new(2, TensorLayout::Nhwc);
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([255, 0, 51])));

        let batch = preprocessor.process(&image);

        assert_eq!(batch.shape(), [1, 2, 2, 3]);
        for pixel in batch.data().chunks(3) {
            assert_eq!(pixel, &[1.0, 0.0, 0.2]);
        }
    }

    #[test]
    fn test_nchw_layout_is_planar() {
        let preprocessor = ImagePreprocessor::new(2, TensorLayout::Nchw);
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([255, 0, 51])));

        let batch = preprocessor.process(&image);

        assert_eq!(batch.shape(), [1, 3, 2, 2]);
        assert_eq!(&batch.data()[0..4], &[1.0; 4]);
        assert_eq!(&batch.data()[4..8], &[0.0; 4]);
        assert_eq!(&batch.data()[8..12], &[0.2; 4]);
    }

    #[test]
    fn test_preprocessing_is_deterministic() {
        let preprocessor = ImagePreprocessor::default();
        let bytes = encode(&leaf_image(333, 222), ImageFormat::Png);

        let first = preprocessor.process_bytes(&bytes).unwrap();
        let second = preprocessor.process_bytes(&bytes).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_decode_as_uses_declared_decoder() {
        let preprocessor = ImagePreprocessor::default();
        let png = encode(&leaf_image(8, 8), ImageFormat::Png);

        assert!(preprocessor.decode_as(&png, ImageKind::Png).is_ok());
        assert!(matches!(
            preprocessor.decode_as(&png, ImageKind::Jpeg),
            Err(InferenceError::DecodeImage(_))
        ));
    }

    #[test]
    fn test_rejects_empty_and_corrupt_bytes() {
        let preprocessor = ImagePreprocessor::default();

        assert!(matches!(
            preprocessor.process_bytes(&[]),
            Err(InferenceError::EmptyUpload)
        ));
        assert!(matches!(
            preprocessor.process_bytes(b"\x89PNG\r\n\x1a\nbroken"),
            Err(InferenceError::DecodeImage(_))
        ));
    }
}
