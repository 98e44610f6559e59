//! Routine registry.
//!
//! A routine is one assembly variant bound to a slot id. Adding a post type
//! means adding a registry entry; the pipeline reads everything it needs
//! (item count, grid mode, theme label, prompts, fallback) from here.
//!
//! ## Default registry
//!
//! | Slot      | Routine                |
//! |-----------|------------------------|
//! | 1         | promo                  |
//! | 2, 8      | question               |
//! | 3         | rivalry                |
//! | 4         | spotlight: unpopular   |
//! | 5, 10, 12 | fact                   |
//! | 6         | spotlight: obscure     |
//! | 7         | starter pack           |
//! | 9         | spotlight: aesthetic   |
//! | 11        | spotlight: memory      |

use std::collections::BTreeMap;
use std::fmt;

use rand::seq::SliceRandom;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::caption::{CaptionLimits, CaptionRequest};
use crate::collage::GridMode;
use crate::content::ContentItem;
use crate::history::{HistoryCategory, HistoryStore};
use crate::selector::CatalogFilter;

pub type SlotId = u8;

/// Angle of a single-item spotlight post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Unpopular,
    Obscure,
    Aesthetic,
    Memory,
}

impl Theme {
    pub fn label(self) -> &'static str {
        match self {
            Self::Unpopular => "UnpopularOpinion",
            Self::Obscure => "HiddenGems",
            Self::Aesthetic => "PixelArt",
            Self::Memory => "Nostalgia",
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Unpopular => "unpopular",
            Self::Obscure => "obscure",
            Self::Aesthetic => "aesthetic",
            Self::Memory => "memory",
        }
    }

    fn angle(self) -> &'static str {
        match self {
            Self::Unpopular => "a friendly, slightly contrarian opinion that invites debate",
            Self::Obscure => "why this overlooked game deserves a second look",
            Self::Aesthetic => "its visual style, art direction and atmosphere",
            Self::Memory => "a warm, nostalgic memory of playing it as a kid",
        }
    }

    fn fallback_intro(self) -> &'static str {
        match self {
            Self::Unpopular => "Unpopular opinion: this one deserved more love",
            Self::Obscure => "Hidden gem",
            Self::Aesthetic => "Look at this art style",
            Self::Memory => "Remember this one?",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routine {
    /// Fixed promotional text and image.
    Promo,
    /// Community question on a rotating topic.
    Question,
    /// Two items head to head.
    Rivalry,
    /// One item with a themed angle and screenshots.
    Spotlight(Theme),
    /// One item with a trivia fact.
    Fact,
    /// Four items from a rotating theme in a 2×2 grid.
    StarterPack,
}

impl Routine {
    pub fn name(self) -> String {
        match self {
            Self::Spotlight(theme) => format!("spotlight:{}", theme.keyword()),
            Self::Promo => "promo".to_string(),
            Self::Question => "question".to_string(),
            Self::Rivalry => "rivalry".to_string(),
            Self::Fact => "fact".to_string(),
            Self::StarterPack => "starter_pack".to_string(),
        }
    }

    /// Words that select this routine in a manual override.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Promo => &["promo", "ad", "advert"],
            Self::Question => &["question", "ask"],
            Self::Rivalry => &["rivalry", "versus", "vs"],
            Self::Spotlight(Theme::Unpopular) => &["unpopular"],
            Self::Spotlight(Theme::Obscure) => &["obscure"],
            Self::Spotlight(Theme::Aesthetic) => &["aesthetic"],
            Self::Spotlight(Theme::Memory) => &["memory", "nostalgia"],
            Self::Fact => &["fact", "trivia"],
            Self::StarterPack => &["starter", "starterpack"],
        }
    }

    /// Catalog items the routine needs.
    pub fn item_count(self) -> usize {
        match self {
            Self::Promo | Self::Question => 0,
            Self::Spotlight(_) | Self::Fact => 1,
            Self::Rivalry => 2,
            Self::StarterPack => 4,
        }
    }

    pub fn grid_mode(self) -> Option<GridMode> {
        match self {
            Self::Rivalry => Some(GridMode::HorizontalPair),
            Self::StarterPack => Some(GridMode::SquareGrid),
            _ => None,
        }
    }

    pub fn theme_label(self) -> Option<&'static str> {
        match self {
            Self::Promo => None,
            Self::Question => Some("RetroQuestion"),
            Self::Rivalry => Some("VersusMode"),
            Self::Spotlight(theme) => Some(theme.label()),
            Self::Fact => Some("GamingHistory"),
            Self::StarterPack => Some("StarterPack"),
        }
    }

    /// Screenshots attached after the cover.
    pub fn secondary_images(self) -> usize {
        match self {
            Self::Spotlight(_) => 2,
            _ => 0,
        }
    }
}

impl fmt::Display for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineRegistry {
    entries: BTreeMap<SlotId, Routine>,
}

impl RoutineRegistry {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn with(mut self, slot: SlotId, routine: Routine) -> Self {
        self.register(slot, routine);
        self
    }

    pub fn register(&mut self, slot: SlotId, routine: Routine) {
        self.entries.insert(slot, routine);
    }

    pub fn get(&self, slot: SlotId) -> Option<Routine> {
        self.entries.get(&slot).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotId, Routine)> + '_ {
        self.entries.iter().map(|(slot, routine)| (*slot, *routine))
    }

    /// Slot for the first word of `text` that is a routine keyword. A
    /// routine bound to several slots answers with the lowest one.
    pub fn find_keyword(&self, text: &str) -> Option<SlotId> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .find_map(|word| self.slot_for_keyword(&word))
    }

    fn slot_for_keyword(&self, word: &str) -> Option<SlotId> {
        self.iter()
            .find(|(_, routine)| routine.keywords().contains(&word))
            .map(|(slot, _)| slot)
    }
}

impl Default for RoutineRegistry {
    fn default() -> Self {
        Self::empty()
            .with(1, Routine::Promo)
            .with(2, Routine::Question)
            .with(3, Routine::Rivalry)
            .with(4, Routine::Spotlight(Theme::Unpopular))
            .with(5, Routine::Fact)
            .with(6, Routine::Spotlight(Theme::Obscure))
            .with(7, Routine::StarterPack)
            .with(8, Routine::Question)
            .with(9, Routine::Spotlight(Theme::Aesthetic))
            .with(10, Routine::Fact)
            .with(11, Routine::Spotlight(Theme::Memory))
            .with(12, Routine::Fact)
    }
}

/// Question topic. `question` doubles as the fallback caption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub subject: String,
    pub question: String,
}

impl Topic {
    pub fn new(id: &str, subject: &str, question: &str) -> Self {
        Self {
            id: id.to_string(),
            subject: subject.to_string(),
            question: question.to_string(),
        }
    }
}

const DEFAULT_TOPICS: [[&str; 3]; 10] = [
    [
        "first-console",
        "first console",
        "What was the first console you ever owned?",
    ],
    [
        "hardest-boss",
        "hardest boss",
        "Which retro boss took you the most tries to beat?",
    ],
    [
        "best-soundtrack",
        "best soundtrack",
        "Which 16-bit soundtrack still lives in your head?",
    ],
    [
        "couch-coop",
        "couch co-op",
        "Best couch co-op game of all time? Go.",
    ],
    [
        "rental-store",
        "rental store",
        "What game did you rent over and over from the video store?",
    ],
    [
        "never-finished",
        "unfinished games",
        "Which classic have you never managed to finish?",
    ],
    [
        "box-art",
        "box art",
        "Which game had box art that promised way more than the game?",
    ],
    [
        "cheat-codes",
        "cheat codes",
        "What cheat code do you still know by heart?",
    ],
    [
        "remake-wish",
        "remake wishlist",
        "Which retro game deserves a proper remake?",
    ],
    [
        "mascot",
        "mascots",
        "Who is the greatest platformer mascot?",
    ],
];

pub fn default_topics() -> Vec<Topic> {
    DEFAULT_TOPICS
        .iter()
        .map(|[id, subject, question]| Topic::new(id, subject, question))
        .collect()
}

/// Starter-pack theme with the filter that scopes its catalog query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarterTheme {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub filter: CatalogFilter,
}

impl StarterTheme {
    fn platform(id: &str, title: &str, platform: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            filter: CatalogFilter {
                platforms: vec![platform.to_string()],
                ..CatalogFilter::default()
            },
        }
    }

    fn genre(id: &str, title: &str, genre: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            filter: CatalogFilter {
                categories: vec![genre.to_string()],
                ..CatalogFilter::default()
            },
        }
    }

    /// History key in the `features` category.
    pub fn history_key(&self) -> String {
        format!("starter:{}", self.id)
    }
}

pub fn default_starter_themes() -> Vec<StarterTheme> {
    vec![
        StarterTheme::platform("snes", "SNES", "Super Nintendo Entertainment System"),
        StarterTheme::genre("rpg", "JRPG", "Role-playing (RPG)"),
        StarterTheme::platform("genesis", "Sega Genesis", "Sega Mega Drive/Genesis"),
        StarterTheme::genre("platformer", "Platformer", "Platform"),
        StarterTheme::platform("ps1", "PlayStation", "PlayStation"),
        StarterTheme::genre("fighting", "Fighting Game", "Fighting"),
        StarterTheme::platform("n64", "N64", "Nintendo 64"),
        StarterTheme::genre("shmup", "Shoot 'em Up", "Shooter"),
    ]
}

/// Next starter-pack theme: the first never used, otherwise the least
/// recently used.
pub fn pick_starter_theme<'t>(
    themes: &'t [StarterTheme],
    history: &HistoryStore,
) -> Option<&'t StarterTheme> {
    let last_use =
        |t: &StarterTheme| history.last_position(HistoryCategory::Features, &t.history_key());
    themes
        .iter()
        .find(|t| last_use(t).is_none())
        .or_else(|| themes.iter().min_by_key(|t| last_use(t)))
}

/// Number shown in the starter-pack caption ("Starter Pack #N").
pub fn starter_pack_number(history: &HistoryStore) -> usize {
    history
        .ids(HistoryCategory::Features)
        .filter(|id| id.starts_with("starter:"))
        .count()
        + 1
}

/// Random topic not in the topic history.
pub fn pick_topic<'t>(
    topics: &'t [Topic],
    history: &HistoryStore,
    rng: &mut (dyn RngCore + Send),
) -> Option<&'t Topic> {
    let fresh: Vec<&Topic> = topics
        .iter()
        .filter(|t| !history.has(HistoryCategory::Topics, &t.id))
        .collect();
    if fresh.is_empty() {
        // Every topic used: reuse the one asked longest ago.
        return topics
            .iter()
            .min_by_key(|t| history.last_position(HistoryCategory::Topics, &t.id));
    }
    fresh.choose(&mut *rng).copied()
}

fn year_suffix(item: &ContentItem) -> String {
    item.release_year()
        .map(|y| format!(" ({y})"))
        .unwrap_or_default()
}

fn describe(item: &ContentItem) -> String {
    let mut parts = vec![format!("\"{}\"{}", item.name, year_suffix(item))];
    if !item.categories.is_empty() {
        parts.push(format!("genres: {}", item.categories.join(", ")));
    }
    if !item.platforms.is_empty() {
        parts.push(format!("platforms: {}", item.platforms.join(", ")));
    }
    parts.join("; ")
}

const STYLE_RULES: &str = "Plain text only. No hashtags, no quotation marks, no emojis.";

/// Caption request for a single-item routine (spotlight or fact).
pub fn item_caption_request(
    routine: Routine,
    item: &ContentItem,
    limits: &CaptionLimits,
) -> CaptionRequest {
    let name = &item.name;
    let year = year_suffix(item);
    let (angle, fallback) = match routine {
        Routine::Spotlight(theme) => (
            theme.angle(),
            format!("{}: {name}{year}.", theme.fallback_intro()),
        ),
        _ => (
            "one surprising, true piece of trivia about its development or release",
            format!("Retro fact file: {name}{year}."),
        ),
    };

    CaptionRequest {
        full_prompt: format!(
            "Write a social media post about the retro video game {}. Focus on {angle}. \
             Keep it under {} characters. {STYLE_RULES}",
            describe(item),
            limits.soft_target,
        ),
        short_prompt: format!(
            "In one sentence under {} characters, write about {angle} \
             for the game \"{name}\". {STYLE_RULES}",
            limits.short_target,
        ),
        fallback,
    }
}

pub fn rivalry_caption_request(
    left: &ContentItem,
    right: &ContentItem,
    limits: &CaptionLimits,
) -> CaptionRequest {
    CaptionRequest {
        full_prompt: format!(
            "Write a playful social media post pitting two retro games against each other: \
             {} versus {}. End by asking followers which one wins. \
             Keep it under {} characters. {STYLE_RULES}",
            describe(left),
            describe(right),
            limits.soft_target,
        ),
        short_prompt: format!(
            "In one short sentence under {} characters, ask which is better: \
             \"{}\" or \"{}\". {STYLE_RULES}",
            limits.short_target, left.name, right.name,
        ),
        fallback: format!("{} vs {}. Which one wins?", left.name, right.name),
    }
}

pub fn starter_pack_caption_request(
    theme: &StarterTheme,
    number: usize,
    items: &[ContentItem],
    limits: &CaptionLimits,
) -> CaptionRequest {
    let title = &theme.title;
    let names = items
        .iter()
        .map(|i| i.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    CaptionRequest {
        full_prompt: format!(
            "Write a social media post introducing \"{title} Starter Pack #{number}\": \
             four retro games a newcomer should play first: {names}. \
             Keep it under {} characters. {STYLE_RULES}",
            limits.soft_target,
        ),
        short_prompt: format!(
            "In one sentence under {} characters, introduce a {title} starter pack \
             of four classic games. {STYLE_RULES}",
            limits.short_target,
        ),
        fallback: format!("{title} Starter Pack #{number}: {names}"),
    }
}

pub fn question_caption_request(topic: &Topic, limits: &CaptionLimits) -> CaptionRequest {
    CaptionRequest {
        full_prompt: format!(
            "Write an engaging question for a retro gaming community about {}. \
             Invite people to reply with their answer. \
             Keep it under {} characters. {STYLE_RULES}",
            topic.subject, limits.soft_target,
        ),
        short_prompt: format!(
            "Ask retro gamers one short question about {} in under {} characters. {STYLE_RULES}",
            topic.subject, limits.short_target,
        ),
        fallback: topic.question.clone(),
    }
}
