//! Fixed-grid image compositing.
//!
//! Pair mode lays two images side by side at a common height. Grid mode
//! scales each of four images to the same height, center-crops the largest
//! square and places the `side × side` tiles row-major into a 2×2 canvas.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::content::ImageAsset;

const FILTER: FilterType = FilterType::Triangle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridMode {
    HorizontalPair,
    SquareGrid,
}

impl GridMode {
    pub fn required_images(self) -> usize {
        match self {
            Self::HorizontalPair => 2,
            Self::SquareGrid => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollageLayout {
    /// Common height in pair mode.
    pub pair_height: u32,
    /// Tile edge in grid mode.
    pub grid_side: u32,
}

impl Default for CollageLayout {
    fn default() -> Self {
        Self {
            pair_height: 600,
            grid_side: 500,
        }
    }
}

/// Composite `images` in the given mode.
///
/// Returns `None` when fewer usable images than the mode needs are supplied;
/// extra images are ignored.
pub fn compose(
    images: &[ImageAsset],
    mode: GridMode,
    layout: &CollageLayout,
) -> Option<ImageAsset> {
    let usable: Vec<&DynamicImage> = images
        .iter()
        .map(ImageAsset::as_image)
        .filter(|img| img.width() > 0 && img.height() > 0)
        .take(mode.required_images())
        .collect();

    if usable.len() < mode.required_images() {
        tracing::debug!(
            mode = ?mode,
            supplied = usable.len(),
            "Not enough images for collage"
        );
        return None;
    }

    let canvas = match mode {
        GridMode::HorizontalPair => horizontal_pair(&usable, layout.pair_height.max(1)),
        GridMode::SquareGrid => square_grid(&usable, layout.grid_side.max(1)),
    };
    Some(ImageAsset::from(DynamicImage::ImageRgba8(canvas)))
}

/// Scale to `height`, preserving aspect ratio (width rounded, at least 1).
pub fn resize_to_height(image: &DynamicImage, height: u32) -> DynamicImage {
    let (w, h) = image.dimensions();
    let scaled = (u64::from(w) * u64::from(height) + u64::from(h) / 2) / u64::from(h);
    image.resize_exact(scaled.max(1) as u32, height, FILTER)

}

fn horizontal_pair(images: &[&DynamicImage], height: u32) -> RgbaImage {
    let resized: Vec<DynamicImage> = images
        .iter()
        .map(|img| resize_to_height(img, height))
        .collect();
    let width = resized.iter().map(DynamicImage::width).sum();

    let mut canvas = RgbaImage::new(width, height);
    let mut x = 0i64;
    for img in &resized {
        imageops::replace(&mut canvas, &img.to_rgba8(), x, 0);
        x += i64::from(img.width());
    }
    canvas
}

fn square_grid(images: &[&DynamicImage], side: u32) -> RgbaImage {
    let mut canvas = RgbaImage::new(side * 2, side * 2);
    for (index, img) in images.iter().enumerate() {
        let tile = square_tile(img, side);
        let x = (index % 2) as u32 * side;
        let y = (index / 2) as u32 * side;
        imageops::replace(&mut canvas, &tile.to_rgba8(), i64::from(x), i64::from(y));
    }
    canvas
}

/// Largest centered square of the height-scaled image, scaled to `side`.
fn square_tile(image: &DynamicImage, side: u32) -> DynamicImage {
    let resized = resize_to_height(image, side);
    let (w, h) = resized.dimensions();
    let edge = w.min(h);
    let cropped = resized.crop_imm((w - edge) / 2, (h - edge) / 2, edge, edge);
    if edge == side {
        cropped
    } else {
        cropped.resize_exact(side, side, FILTER)
    }
}
