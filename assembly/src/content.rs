//! Catalog records and decoded images handled during one assembly.

use chrono::{DateTime, Datelike, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// A catalog record (one game). Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Stable catalog identifier, used as the dedup key in history.
    pub id: String,
    pub name: String,
    /// Genre-like labels, catalog order.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Platform / origin labels, catalog order.
    #[serde(default)]
    pub platforms: Vec<String>,
    /// Cover image URL. Empty means the item has no usable cover.
    #[serde(default)]
    pub primary_image: String,
    /// Screenshot URLs.
    #[serde(default)]
    pub secondary_images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released: Option<DateTime<Utc>>,
}

impl ContentItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            categories: Vec::new(),
            platforms: Vec::new(),
            primary_image: String::new(),
            secondary_images: Vec::new(),
            released: None,
        }
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms = platforms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_primary_image(mut self, url: impl Into<String>) -> Self {
        self.primary_image = url.into();
        self
    }

    pub fn with_secondary_images<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secondary_images = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_released(mut self, released: DateTime<Utc>) -> Self {
        self.released = Some(released);
        self
    }

    pub fn release_year(&self) -> Option<i32> {
        self.released.map(|ts| ts.year())
    }

    pub fn has_primary_image(&self) -> bool {
        !self.primary_image.trim().is_empty()
    }
}

/// A decoded image. Lives only for the duration of one assembly.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    image: DynamicImage,
}

impl ImageAsset {
    /// Decode raw bytes (JPEG, PNG or WebP).
    pub fn decode(bytes: &[u8]) -> Result<Self, image::ImageError> {
        Ok(Self {
            image: image::load_from_memory(bytes)?,
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_image(&self) -> &DynamicImage {
        &self.image
    }
}

impl From<DynamicImage> for ImageAsset {
    fn from(image: DynamicImage) -> Self {
        Self { image }
    }
}
