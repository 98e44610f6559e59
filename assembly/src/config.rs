use serde::{Deserialize, Serialize};

use crate::caption::CaptionLimits;
use crate::collage::CollageLayout;
use crate::compress::CompressionBudget;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::routine::{default_starter_themes, default_topics, StarterTheme, Topic};
use crate::selector::SelectionLimits;
use crate::tags::TagRules;

/// Assembly tunables. Every field has a default so a partial TOML section
/// deserializes cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub history_capacity: usize,
    /// Catalog items must be released before this year.
    pub retro_cutoff_year: i32,
    pub selection: SelectionLimits,
    pub tags: TagRules,
    pub caption: CaptionLimits,
    pub collage: CollageLayout,
    pub compression: CompressionBudget,
    pub promo: PromoConfig,
    pub starter_themes: Vec<StarterTheme>,
    pub topics: Vec<Topic>,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            retro_cutoff_year: 2006,
            selection: SelectionLimits::default(),
            tags: TagRules::default(),
            caption: CaptionLimits::default(),
            collage: CollageLayout::default(),
            compression: CompressionBudget::default(),
            promo: PromoConfig::default(),
            starter_themes: default_starter_themes(),
            topics: default_topics(),
        }
    }
}

impl AssemblyConfig {
    /// Every problem found, empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.history_capacity == 0 {
            problems.push("history_capacity must be at least 1".to_string());
        }
        if self.selection.page_size == 0 {
            problems.push("selection.page_size must be at least 1".to_string());
        }
        if self.selection.max_attempts == 0 {
            problems.push("selection.max_attempts must be at least 1".to_string());
        }
        if self.compression.max_bytes == 0 {
            problems.push("compression.max_bytes must be at least 1".to_string());
        }
        if self.collage.pair_height == 0 || self.collage.grid_side == 0 {
            problems.push("collage dimensions must be non-zero".to_string());
        }
        if self.tags.max_tags == 0 {
            problems.push("tags.max_tags must be at least 1".to_string());
        }

        let base_len: usize = self
            .tags
            .base_labels
            .iter()
            .map(|label| label.chars().count() + 2)
            .sum();
        if base_len >= self.caption.post_char_limit {
            problems.push(format!(
                "base tags ({base_len} chars) leave no room under the {} char ceiling",
                self.caption.post_char_limit
            ));
        }
        if self.promo.text.chars().count() > self.caption.post_char_limit {
            problems.push(format!(
                "promo.text exceeds the {} char ceiling",
                self.caption.post_char_limit
            ));
        }

        let mut theme_ids: Vec<&str> = self.starter_themes.iter().map(|t| t.id.as_str()).collect();
        theme_ids.sort_unstable();
        if theme_ids.windows(2).any(|w| w[0] == w[1]) {
            problems.push("starter_themes ids must be unique".to_string());
        }
        let mut topic_ids: Vec<&str> = self.topics.iter().map(|t| t.id.as_str()).collect();
        topic_ids.sort_unstable();
        if topic_ids.windows(2).any(|w| w[0] == w[1]) {
            problems.push("topics ids must be unique".to_string());
        }

        problems
    }
}

/// Fixed promotional post and the optional image attached to other posts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromoConfig {
    pub text: String,
    /// URL or local path of the promotional image.
    pub image_url: Option<String>,
    pub attach_to_spotlights: bool,
    pub attach_to_questions: bool,
}

impl Default for PromoConfig {
    fn default() -> Self {
        Self {
            text: "New here? We post retro gaming spotlights, rivalries and starter packs \
                   every week. Follow along and tell us your favourites!"
                .to_string(),
            image_url: None,
            attach_to_spotlights: true,
            attach_to_questions: true,
        }
    }
}
