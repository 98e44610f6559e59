//! Hashtag assembly.
//!
//! Tags are built by a fixed priority cascade, not by scoring:
//!
//! ```text
//! base labels → per item: name label, platform label → theme label
//!   → dedup (first seen wins) → truncate to max_tags
//! ```
//!
//! Name label: the first two tokens of the title before any `:` or dash,
//! alphanumerics only. Out-of-range lengths fall back to a generic label,
//! emitted at most once per post.
//!
//! Platform label: first item platform found in the retro allow-list; else
//! the PC/other label; with no platform data, the catch-all label.

use serde::{Deserialize, Serialize};

use crate::content::ContentItem;

/// Title separators that end the name-label source text.
const NAME_SEPARATORS: [&str; 4] = [":", " - ", "\u{2013}", "\u{2014}"];

/// Ordered, duplicate-free label list. Labels are stored without `#`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    labels: Vec<String>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a label unless it is empty or already present.
    pub fn push(&mut self, label: impl Into<String>) -> bool {
        let label = label.into();
        let label = label.trim_start_matches('#').trim();
        if label.is_empty() || self.labels.iter().any(|l| l == label) {
            return false;
        }
        self.labels.push(label.to_string());
        true
    }

    pub fn truncate(&mut self, max: usize) {
        self.labels.truncate(max);
    }

    /// Drop trailing labels until the rendered form fits `max_chars`.
    pub fn fit_within(&mut self, max_chars: usize) {
        while self.rendered_len() > max_chars && self.labels.pop().is_some() {}
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// `#A #B #C`
    pub fn render(&self) -> String {
        self.labels
            .iter()
            .map(|l| format!("#{l}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn rendered_len(&self) -> usize {
        self.render().chars().count()
    }
}

/// Catalog platform name → hashtag label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformLabel {
    pub platform: String,
    pub label: String,
}

impl PlatformLabel {
    pub fn new(platform: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TagRules {
    /// Always emitted first.
    pub base_labels: Vec<String>,
    pub max_tags: usize,
    /// Leading title tokens used for the name label.
    pub name_tokens: usize,
    pub name_min_len: usize,
    pub name_max_len: usize,
    pub fallback_name_label: String,
    /// Retro platforms eligible for their own label.
    pub retro_platforms: Vec<PlatformLabel>,
    pub pc_label: String,
    pub catch_all_label: String,
}

impl Default for TagRules {
    fn default() -> Self {
        let retro = [
            ("Nintendo Entertainment System", "NES"),
            ("Super Nintendo Entertainment System", "SNES"),
            ("Nintendo 64", "N64"),
            ("Nintendo GameCube", "GameCube"),
            ("Game Boy", "GameBoy"),
            ("Game Boy Color", "GameBoyColor"),
            ("Game Boy Advance", "GBA"),
            ("Sega Master System/Mark III", "MasterSystem"),
            ("Sega Mega Drive/Genesis", "SegaGenesis"),
            ("Sega Saturn", "SegaSaturn"),
            ("Dreamcast", "Dreamcast"),
            ("PlayStation", "PS1"),
            ("PlayStation 2", "PS2"),
            ("Neo Geo AES", "NeoGeo"),
            ("TurboGrafx-16/PC Engine", "TurboGrafx16"),
            ("Atari 2600", "Atari2600"),
            ("Arcade", "Arcade"),
            ("Commodore C64/128/MAX", "C64"),
            ("Amiga", "Amiga"),
            ("DOS", "MSDOS"),
        ];
        Self {
            base_labels: vec!["RetroGaming".to_string()],
            max_tags: 5,
            name_tokens: 2,
            name_min_len: 3,
            name_max_len: 20,
            fallback_name_label: "ClassicGames".to_string(),
            retro_platforms: retro
                .iter()
                .map(|(platform, label)| PlatformLabel::new(*platform, *label))
                .collect(),
            pc_label: "PCGaming".to_string(),
            catch_all_label: "VideoGames".to_string(),
        }
    }
}

pub struct TagAssembler {
    rules: TagRules,
}

impl TagAssembler {
    pub fn new(rules: TagRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &TagRules {
        &self.rules
    }

    /// Build the tag set for a post about `items` with an optional theme label.
    pub fn assemble(&self, items: &[ContentItem], theme: Option<&str>) -> TagSet {
        let mut tags = TagSet::new();
        for label in &self.rules.base_labels {
            tags.push(label.as_str());
        }

        let mut fallback_used = false;
        for item in items {
            match self.name_label(&item.name) {
                Some(label) => {
                    tags.push(label);
                }
                None if !fallback_used => {
                    fallback_used = true;
                    tags.push(self.rules.fallback_name_label.as_str());
                }
                None => {}
            }
            tags.push(self.platform_label(&item.platforms));
        }

        if let Some(theme) = theme {
            tags.push(theme);
        }

        tags.truncate(self.rules.max_tags);
        tags
    }

    /// Name-derived label, or `None` when it falls outside the length bounds.
    pub fn name_label(&self, name: &str) -> Option<String> {
        let head = NAME_SEPARATORS
            .iter()
            .filter_map(|sep| name.find(sep))
            .min()
            .map_or(name, |cut| &name[..cut]);

        let label: String = head
            .split_whitespace()
            .take(self.rules.name_tokens)
            .flat_map(|token| token.chars().filter(|c| c.is_alphanumeric()))
            .collect();

        let len = label.chars().count();
        (self.rules.name_min_len..=self.rules.name_max_len)
            .contains(&len)
            .then_some(label)
    }

    /// First retro platform in catalog order wins; the scan stops there.
    pub fn platform_label(&self, platforms: &[String]) -> &str {
        if platforms.is_empty() {
            return &self.rules.catch_all_label;
        }
        platforms
            .iter()
            .find_map(|platform| {
                self.rules
                    .retro_platforms
                    .iter()
                    .find(|known| known.platform.eq_ignore_ascii_case(platform.trim()))
            })
            .map_or(&self.rules.pc_label, |known| &known.label)
    }
}
