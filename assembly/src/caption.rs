//! Caption ladder
//!
//! ```text
//! attempt 1: full-context prompt ──fits──▶ done
//!    │ too long / error / empty
//! attempt 2: short constrained prompt ──fits──▶ done
//!    │ too long / error / empty
//! attempt 3: deterministic template, truncated to fit ──▶ done
//! ```
//!
//! "Fits" means the rendered post (caption, blank line, hashtags) is within
//! `post_char_limit` Unicode scalar values. Generator errors never escape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::GenerationError;
use crate::tags::TagSet;

/// Total rungs, the last one being the deterministic fallback.
pub const LADDER_ATTEMPTS: u8 = 3;

const TAG_SEPARATOR: &str = "\n\n";
const ELLIPSIS: char = '\u{2026}';

/// Text-generation collaborator.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionLimits {
    /// Hard ceiling for the rendered post.
    pub post_char_limit: usize,
    /// Length asked for in the full prompt.
    pub soft_target: usize,
    /// Length asked for in the short prompt.
    pub short_target: usize,
    pub max_tokens: u32,
    pub short_max_tokens: u32,
}

impl Default for CaptionLimits {
    fn default() -> Self {
        Self {
            post_char_limit: 300,
            soft_target: 200,
            short_target: 120,
            max_tokens: 120,
            short_max_tokens: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptionSource {
    Generated,
    Fallback,
}

/// Post body plus the rung that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    pub text: String,
    pub attempt: u8,
    pub source: CaptionSource,
}

impl Caption {
    pub fn render(&self, tags: &TagSet) -> String {
        render_post(&self.text, tags)
    }
}

/// Prompts and fallback for one caption, built by the routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionRequest {
    pub full_prompt: String,
    pub short_prompt: String,
    /// Deterministic text from already-known fields.
    pub fallback: String,
}

/// `text + "\n\n" + tags`, omitting the separator when either side is empty.
pub fn render_post(text: &str, tags: &TagSet) -> String {
    let text = text.trim();
    match (text.is_empty(), tags.is_empty()) {
        (_, true) => text.to_string(),
        (true, false) => tags.render(),
        (false, false) => format!("{text}{TAG_SEPARATOR}{}", tags.render()),
    }
}

pub fn rendered_len(text: &str, tags: &TagSet) -> usize {
    render_post(text, tags).chars().count()
}

/// Truncate `text` so that `render_post(text, tags)` fits `limit`.
///
/// Assumes the tags alone fit (see [`TagSet::fit_within`]).
pub fn fit_text(text: &str, tags: &TagSet, limit: usize) -> String {
    let text = text.trim();
    let overhead = if tags.is_empty() {
        0
    } else {
        tags.rendered_len() + TAG_SEPARATOR.chars().count()
    };
    truncate_chars(text, limit.saturating_sub(overhead))
}

fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    if budget == 0 {
        return String::new();
    }
    let mut cut: String = text.chars().take(budget - 1).collect();
    let trimmed_len = cut.trim_end().len();
    cut.truncate(trimmed_len);
    cut.push(ELLIPSIS);
    cut
}

/// Trim whitespace and one layer of wrapping quotes.
fn clean_generated(raw: &str) -> String {
    let text = raw.trim();
    let unquoted = [('"', '"'), ('\u{201c}', '\u{201d}'), ('\'', '\'')]
        .iter()
        .find_map(|(open, close)| {
            text.strip_prefix(*open)
                .and_then(|rest| rest.strip_suffix(*close))
        })
        .unwrap_or(text);
    unquoted.trim().to_string()
}

pub struct CaptionLadder<'a> {
    generator: &'a dyn TextGenerator,
    limits: &'a CaptionLimits,
}

impl<'a> CaptionLadder<'a> {
    pub fn new(generator: &'a dyn TextGenerator, limits: &'a CaptionLimits) -> Self {
        Self { generator, limits }
    }

    /// Walk the ladder. Always returns within [`LADDER_ATTEMPTS`] rungs and
    /// always fits the ceiling when the tags do.
    pub async fn run(&self, request: &CaptionRequest, tags: &TagSet) -> Caption {
        let limit = self.limits.post_char_limit;

        for attempt in 1..LADDER_ATTEMPTS {
            let (prompt, max_tokens) = if attempt == 1 {
                (&request.full_prompt, self.limits.max_tokens)
            } else {
                (&request.short_prompt, self.limits.short_max_tokens)
            };

            let text = match self.generator.generate(prompt, max_tokens).await {
                Ok(raw) => clean_generated(&raw),
                Err(e) => {
                    warn!(attempt, kind = %e.kind(), error = %e, "Caption generation failed");
                    continue;
                }
            };
            if text.is_empty() {
                let e = GenerationError::Empty;
                warn!(attempt, kind = %e.kind(), error = %e, "Caption generation failed");
                continue;
            }

            let len = rendered_len(&text, tags);
            if len <= limit {
                info!(attempt, len, "Caption accepted");
                return Caption {
                    text,
                    attempt,
                    source: CaptionSource::Generated,
                };
            }
            info!(attempt, len, limit, "Caption over budget");
        }

        let text = fit_text(&request.fallback, tags, limit);
        info!(
            attempt = LADDER_ATTEMPTS,
            len = rendered_len(&text, tags),
            "Using fallback caption"
        );
        Caption {
            text,
            attempt: LADDER_ATTEMPTS,
            source: CaptionSource::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted responses and records prompts.
    struct ScriptedGenerator {
        responses: Mutex<VecDeque<Result<String, GenerationError>>>,
        prompts: Mutex<Vec<(String, u32)>>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<Result<String, GenerationError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, GenerationError> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), max_tokens));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(GenerationError::Empty))
        }
    }

    fn request() -> CaptionRequest {
        CaptionRequest {
            full_prompt: "full".into(),
            short_prompt: "short".into(),
            fallback: "Hidden gem: Gunstar Heroes (1993).".into(),
        }
    }

    fn tags() -> TagSet {
        let mut tags = TagSet::new();
        tags.push("RetroGaming");
        tags.push("GunstarHeroes");
        tags
    }

    #[tokio::test]
    async fn first_attempt_that_fits_wins() {
        let generator = ScriptedGenerator::new(vec![Ok("\"Run and gun perfection.\"".into())]);
        let limits = CaptionLimits::default();
        let caption = CaptionLadder::new(&generator, &limits)
            .run(&request(), &tags())
            .await;

        assert_eq!(caption.attempt, 1);
        assert_eq!(caption.source, CaptionSource::Generated);
        assert_eq!(caption.text, "Run and gun perfection.");
        assert_eq!(generator.calls(), 1);
        assert_eq!(
            caption.render(&tags()),
            "Run and gun perfection.\n\n#RetroGaming #GunstarHeroes"
        );
    }

    #[tokio::test]
    async fn overlong_first_attempt_moves_to_short_prompt() {
        let generator =
            ScriptedGenerator::new(vec![Ok("x".repeat(400)), Ok("Short and sweet.".into())]);
        let limits = CaptionLimits::default();
        let caption = CaptionLadder::new(&generator, &limits)
            .run(&request(), &tags())
            .await;

        assert_eq!(caption.attempt, 2);
        assert_eq!(caption.text, "Short and sweet.");
        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts[0], ("full".to_string(), limits.max_tokens));
        assert_eq!(prompts[1], ("short".to_string(), limits.short_max_tokens));
    }

    #[tokio::test]
    async fn errors_fall_through_to_template() {
        let generator = ScriptedGenerator::new(vec![
            Err(GenerationError::Quota("429".into())),
            Err(GenerationError::Request("timeout".into())),
        ]);
        let limits = CaptionLimits::default();
        let caption = CaptionLadder::new(&generator, &limits)
            .run(&request(), &tags())
            .await;

        assert_eq!(caption.attempt, 3);
        assert_eq!(caption.source, CaptionSource::Fallback);
        assert_eq!(caption.text, "Hidden gem: Gunstar Heroes (1993).");
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn empty_output_counts_as_failure() {
        let generator = ScriptedGenerator::new(vec![Ok("   ".into()), Ok("\"\"".into())]);
        let limits = CaptionLimits::default();
        let caption = CaptionLadder::new(&generator, &limits)
            .run(&request(), &tags())
            .await;
        assert_eq!(caption.source, CaptionSource::Fallback);
    }

    #[tokio::test]
    async fn fallback_is_truncated_to_fit() {
        let generator = ScriptedGenerator::new(vec![Ok("y".repeat(500)), Ok("z".repeat(500))]);
        let limits = CaptionLimits::default();
        let mut req = request();
        req.fallback = "w".repeat(1000);
        let caption = CaptionLadder::new(&generator, &limits)
            .run(&req, &tags())
            .await;

        assert_eq!(caption.attempt, 3);
        assert_eq!(rendered_len(&caption.text, &tags()), limits.post_char_limit);
        assert!(caption.text.ends_with(ELLIPSIS));
    }

    #[tokio::test]
    async fn rendered_length_never_exceeds_ceiling() {
        let limits = CaptionLimits {
            post_char_limit: 80,
            ..CaptionLimits::default()
        };
        for len in [10usize, 50, 79, 80, 81, 200] {
            let generator = ScriptedGenerator::new(vec![Ok("a".repeat(len)), Ok("b".repeat(len))]);
            let caption = CaptionLadder::new(&generator, &limits)
                .run(&request(), &tags())
                .await;
            assert!(caption.attempt <= LADDER_ATTEMPTS);
            let len = rendered_len(&caption.text, &tags());
            assert!(len <= limits.post_char_limit);

        }
    }

    #[test]
    fn render_without_tags_has_no_separator() {
        assert_eq!(render_post("  hello ", &TagSet::new()), "hello");
        assert_eq!(render_post("", &tags()), "#RetroGaming #GunstarHeroes");
    }

    #[test]
    fn truncation_counts_scalar_values() {
        let text = "\u{e9}".repeat(10);
        let cut = truncate_chars(&text, 5);
        assert_eq!(cut.chars().count(), 5);
        assert!(cut.ends_with(ELLIPSIS));
    }
}
