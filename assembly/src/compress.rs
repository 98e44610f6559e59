//! Byte-budget JPEG encoding.
//!
//! Quality walks down from `start_quality` by `quality_step` for at most
//! `max_attempts` encodes. The first encoding within `max_bytes` wins; when
//! none fits, the smallest one produced is returned. The ceiling is a soft
//! target: posting an oversized image beats not posting at all.
//!
//! JPEG has no alpha channel, so transparent pixels are composited onto
//! white before the first encode.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage, Rgba};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::content::ImageAsset;

/// Quality never drops below this.
pub const MIN_QUALITY: u8 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionBudget {
    pub max_bytes: usize,
    pub start_quality: u8,
    pub quality_step: u8,
    pub max_attempts: u32,
}

impl Default for CompressionBudget {
    fn default() -> Self {
        Self {
            max_bytes: 950_000,
            start_quality: 85,
            quality_step: 15,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Compressed {
    /// JPEG bytes, never empty.
    pub bytes: Vec<u8>,
    /// Quality of the returned encoding.
    pub quality: u8,
    /// Size kept after each attempt; non-increasing.
    pub attempt_sizes: Vec<usize>,
    pub within_budget: bool,
}

pub fn compress(
    image: &ImageAsset,
    budget: &CompressionBudget,
) -> Result<Compressed, image::ImageError> {
    let rgb = flatten_on_white(image.as_image());
    let max_attempts = budget.max_attempts.max(1);

    let mut quality = budget.start_quality.clamp(MIN_QUALITY, 100);
    let mut bytes = encode_jpeg(&rgb, quality)?;
    let mut kept_quality = quality;
    let mut attempt_sizes = vec![bytes.len()];
    debug!(attempt = 1, quality, size = bytes.len(), "JPEG encode");

    let mut attempt = 1;
    while bytes.len() > budget.max_bytes && attempt < max_attempts {
        attempt += 1;
        quality = quality.saturating_sub(budget.quality_step).max(MIN_QUALITY);
        let candidate = encode_jpeg(&rgb, quality)?;
        debug!(attempt, quality, size = candidate.len(), "JPEG encode");
        if candidate.len() < bytes.len() {
            bytes = candidate;
            kept_quality = quality;
        }
        attempt_sizes.push(bytes.len());
    }

    let within_budget = bytes.len() <= budget.max_bytes;
    if !within_budget {
        warn!(
            size = bytes.len(),
            max_bytes = budget.max_bytes,
            quality = kept_quality,
            "Image still over byte budget, sending smallest encoding"
        );
    }

    Ok(Compressed {
        bytes,
        quality: kept_quality,
        attempt_sizes,
        within_budget,
    })
}

/// Alpha-blend every pixel over an opaque white background.
pub fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
        let alpha = u32::from(a);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut cursor = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut cursor, quality)
        .encode_image(image)?;

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// High-entropy image so quality changes move the size.
    fn noisy(w: u32, h: u32) -> ImageAsset {
        let mut state: u32 = 0x2545_f491;
        let img = RgbImage::from_fn(w, h, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let b = state.to_le_bytes();
            Rgb([b[0], b[1], b[2]])
        });
        ImageAsset::from(DynamicImage::ImageRgb8(img))
    }

    #[test]
    fn fits_on_first_attempt_when_budget_is_generous() {
        let budget = CompressionBudget::default();
        let out = compress(&noisy(32, 32), &budget).unwrap();
        assert!(out.within_budget);
        assert_eq!(out.quality, 85);
        assert_eq!(out.attempt_sizes.len(), 1);
        assert_eq!(&out.bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn impossible_budget_returns_last_smallest_encoding() {
        let budget = CompressionBudget {
            max_bytes: 10,
            ..CompressionBudget::default()
        };
        let out = compress(&noisy(64, 64), &budget).unwrap();
        assert!(!out.within_budget);
        assert!(!out.bytes.is_empty());
        assert_eq!(out.attempt_sizes.len(), 5);
        assert_eq!(*out.attempt_sizes.last().unwrap(), out.bytes.len());
    }

    #[test]
    fn sizes_are_non_increasing() {
        let budget = CompressionBudget {
            max_bytes: 1,
            start_quality: 95,
            quality_step: 20,
            max_attempts: 5,
        };
        let out = compress(&noisy(96, 96), &budget).unwrap();
        assert!(out.attempt_sizes.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn stops_at_first_fitting_quality() {
        let image = noisy(96, 96);
        let default = CompressionBudget::default();
        let at_85 = compress(&image, &default).unwrap().bytes.len();
        let budget = CompressionBudget {
            max_bytes: at_85 - 1,
            ..CompressionBudget::default()
        };
        let out = compress(&image, &budget).unwrap();
        assert!(out.within_budget);
        assert!(out.quality < 85);
        assert!(out.attempt_sizes.len() >= 2);
    }

    #[test]
    fn alpha_is_composited_onto_white() {
        let mut rgba = image::RgbaImage::new(2, 1);
        rgba.put_pixel(1, 0, Rgba([200, 0, 0, 255]));
        let flat = flatten_on_white(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(*flat.get_pixel(0, 0), Rgb([255, 255, 255]));
        assert_eq!(*flat.get_pixel(1, 0), Rgb([200, 0, 0]));

        let half = image::RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128]));
        let flat = flatten_on_white(&DynamicImage::ImageRgba8(half));
        assert_eq!(*flat.get_pixel(0, 0), Rgb([127, 127, 127]));
    }

    #[test]
    fn transparent_image_encodes_white() {
        // Fully transparent pixels that store black.
        let rgba = ImageAsset::from(DynamicImage::ImageRgba8(image::RgbaImage::new(16, 16)));
        let out = compress(&rgba, &CompressionBudget::default()).unwrap();
        let decoded = image::load_from_memory(&out.bytes).unwrap().to_rgb8();
        assert!(decoded.pixels().all(|p| p.0.iter().all(|&c| c > 240)));
    }

    #[test]
    fn zero_attempts_still_encodes_once() {
        let budget = CompressionBudget {
            max_attempts: 0,
            max_bytes: 1,
            ..CompressionBudget::default()
        };
        let out = compress(&noisy(8, 8), &budget).unwrap();
        assert_eq!(out.attempt_sizes.len(), 1);
    }
}
