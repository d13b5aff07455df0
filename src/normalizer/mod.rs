//! Image normalization for inlined image references.
//!
//! Any decodable raster (PNG, JPEG, WebP) is bounded to a maximum edge
//! length, re-encoded as JPEG at a fixed quality, and returned as a
//! self-contained `data:` URL small enough to live inside a document.
//! Images are never upscaled.

pub mod data_url;

use crate::error::{MenuError, Result};
use crossbeam_channel::{bounded, Receiver};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::fs;
use std::path::Path;
use std::thread;

/// Longest edge an image may keep.
pub const DEFAULT_MAX_EDGE: u32 = 1200;

/// JPEG quality on a 1–100 scale (0.7).
pub const DEFAULT_JPEG_QUALITY: u8 = 70;

/// Normalizer configuration.
#[derive(Clone, Debug)]
pub struct NormalizerConfig {
    /// Longest edge of the output, in pixels.
    pub max_edge: u32,
    /// JPEG quality, 1–100.
    pub jpeg_quality: u8,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_edge: DEFAULT_MAX_EDGE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Raw input to the normalizer.
#[derive(Clone, Debug)]
pub enum ImageInput {
    /// Encoded file contents.
    Bytes(Vec<u8>),
    /// An existing base64 `data:` URL, e.g. a stored reference.
    DataUrl(String),
}

impl ImageInput {
    /// Read a file fully into memory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(ImageInput::Bytes(fs::read(path)?))
    }

    fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            ImageInput::Bytes(bytes) => Ok(bytes),
            ImageInput::DataUrl(url) => data_url::decode(&url).map(|(_, bytes)| bytes),
        }
    }
}

impl From<Vec<u8>> for ImageInput {
    fn from(bytes: Vec<u8>) -> Self {
        ImageInput::Bytes(bytes)
    }
}

/// A normalized, inlined image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedImage {
    pub width: u32,
    pub height: u32,
    /// `data:image/jpeg;base64,...`
    pub data_url: String,
}

impl NormalizedImage {
    pub fn into_data_url(self) -> String {
        self.data_url
    }
}

/// Output size for an image of `width` x `height`.
///
/// The longer edge is clamped to `max_edge` and the shorter edge follows
/// proportionally, rounded to the nearest pixel and never below 1.
pub fn target_size(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let max_edge = max_edge.max(1);
    let longer = width.max(height);
    if longer <= max_edge {
        return (width, height);
    }

    let scale = |edge: u32| -> u32 {
        let scaled = (u64::from(edge) * u64::from(max_edge) + u64::from(longer) / 2)
            / u64::from(longer);
        (scaled as u32).max(1)
    };

    if width > height {
        (max_edge, scale(height))
    } else {
        (scale(width), max_edge)
    }
}

/// Decodes, bounds, and re-encodes images.
#[derive(Clone, Debug, Default)]
pub struct ImageNormalizer {
    config: NormalizerConfig,
}

impl ImageNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Normalize an image on the calling thread.
    pub fn normalize(&self, input: impl Into<ImageInput>) -> Result<NormalizedImage> {
        let bytes = input.into().into_bytes()?;

        let decoded =
            image::load_from_memory(&bytes).map_err(|e| MenuError::ImageDecode(e.to_string()))?;
        let (width, height) = (decoded.width(), decoded.height());
        let (target_width, target_height) = target_size(width, height, self.config.max_edge);

        let resized = if (target_width, target_height) == (width, height) {
            decoded
        } else {
            decoded.resize_exact(target_width, target_height, FilterType::Triangle)
        };

        // JPEG has no alpha channel.
        let flattened = DynamicImage::ImageRgb8(resized.to_rgb8());

        let mut encoded = Vec::new();
        let quality = self.config.jpeg_quality.clamp(1, 100);
        flattened
            .write_with_encoder(JpegEncoder::new_with_quality(&mut encoded, quality))
            .map_err(|e| MenuError::ImageEncode(e.to_string()))?;

        tracing::debug!(
            source_width = width,
            source_height = height,
            width = target_width,
            height = target_height,
            input_bytes = bytes.len(),
            output_bytes = encoded.len(),
            "normalized image"
        );

        Ok(NormalizedImage {
            width: target_width,
            height: target_height,
            data_url: data_url::encode(data_url::JPEG_MIME, &encoded),
        })
    }

    /// Normalize on a worker thread.
    ///
    /// The returned channel yields exactly one result.
    pub fn spawn(&self, input: impl Into<ImageInput>) -> Receiver<Result<NormalizedImage>> {
        let (sender, receiver) = bounded(1);
        let fallback = sender.clone();
        let normalizer = self.clone();
        let input = input.into();

        let spawned = thread::Builder::new()
            .name("image-normalizer".into())
            .spawn(move || {
                // The caller may have stopped listening.
                let _ = sender.send(normalizer.normalize(input));
            });

        if let Err(e) = spawned {
            let _ = fallback.send(Err(MenuError::Io(e)));
        }

        receiver
    }
}
