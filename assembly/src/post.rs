//! Post assembly and publishing.
//!
//! A run loads history, assembles the routine's payload, validates it, then
//! uploads images and submits the post. History is recorded and persisted
//! only after the publisher accepts the post, so a failed run leaves every
//! selected item eligible for the next one.
//!
//! Image problems never fail a run: a download, decode or encode failure
//! drops that one image and the post goes out with the rest.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::caption::{
    fit_text, render_post, Caption, CaptionLadder, CaptionRequest, CaptionSource, TextGenerator,
};
use crate::collage::compose;
use crate::compress::compress;
use crate::config::AssemblyConfig;
use crate::content::{ContentItem, ImageAsset};
use crate::dispatch::RoutineRunner;
use crate::error::{CollaboratorError, PipelineError, PipelineResult};
use crate::history::{HistoryCategory, HistoryStore};
use crate::routine::{self, Routine, SlotId};
use crate::selector::{CandidateSelector, Catalog, CatalogFilter, DateRange};
use crate::tags::{TagAssembler, TagSet};

/// Publisher limit on attached images.
pub const MAX_POST_IMAGES: usize = 4;

const JPEG_MIME: &str = "image/jpeg";

/// Downloads image bytes by URL.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, CollaboratorError>;
}

/// Publisher-side handle for an uploaded image, passed back verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef(pub serde_json::Value);

#[derive(Debug, Clone, PartialEq)]
pub struct PostImage {
    pub image: ImageRef,
    pub alt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReceipt {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn upload_image(&self, bytes: Vec<u8>, mime: &str) -> Result<ImageRef, CollaboratorError>;

    /// Submit text with at most [`MAX_POST_IMAGES`] uploaded images.
    async fn submit_post(
        &self,
        text: &str,
        images: &[PostImage],
    ) -> Result<PostReceipt, CollaboratorError>;
}

/// Compressed image ready for upload.
#[derive(Debug, Clone)]
pub struct PayloadImage {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub alt: String,
}

/// Everything needed to publish one post and commit its history.
#[derive(Debug, Clone)]
pub struct AssembledPost {
    pub routine: Routine,
    /// Rendered text: caption, blank line, hashtags.
    pub text: String,
    /// `None` for fixed-text posts.
    pub caption: Option<Caption>,
    pub tags: TagSet,
    pub images: Vec<PayloadImage>,
    pub item_ids: Vec<String>,
    /// Recorded only after a successful submission.
    pub history: Vec<(HistoryCategory, String)>,
}

impl AssembledPost {
    pub fn validate(&self, char_limit: usize) -> PipelineResult<()> {
        let len = self.text.chars().count();
        if len > char_limit {
            return Err(PipelineError::InvalidPayload(format!(
                "text is {len} chars, limit {char_limit}"
            )));
        }
        if self.text.trim().is_empty() {
            return Err(PipelineError::InvalidPayload("text is empty".to_string()));
        }
        if self.images.len() > MAX_POST_IMAGES {
            return Err(PipelineError::InvalidPayload(format!(
                "{} images, limit {MAX_POST_IMAGES}",
                self.images.len()
            )));
        }
        if self.images.iter().any(|img| img.bytes.is_empty()) {
            return Err(PipelineError::InvalidPayload(
                "empty image payload".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn Catalog>,
    pub generator: Arc<dyn TextGenerator>,
    pub images: Arc<dyn ImageSource>,
    pub publisher: Arc<dyn Publisher>,
}

/// Summary of one routine run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub routine: Routine,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption_attempt: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption_source: Option<CaptionSource>,
    pub images: usize,
    pub item_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<PostReceipt>,
    pub history_persisted: bool,
    pub dry_run: bool,
}

impl RunOutcome {
    pub fn new(routine: Routine) -> Self {
        Self {
            routine,
            text: String::new(),
            caption_attempt: None,
            caption_source: None,
            images: 0,
            item_ids: Vec::new(),
            receipt: None,
            history_persisted: false,
            dry_run: false,
        }
    }

    fn from_post(post: &AssembledPost) -> Self {
        Self {
            text: post.text.clone(),
            caption_attempt: post.caption.as_ref().map(|c| c.attempt),
            caption_source: post.caption.as_ref().map(|c| c.source),
            images: post.images.len(),
            item_ids: post.item_ids.clone(),
            ..Self::new(post.routine)
        }
    }
}

pub struct Pipeline {
    config: AssemblyConfig,
    collaborators: Collaborators,
    history_path: PathBuf,
    rng: Box<dyn RngCore + Send + Sync>,
    dry_run: bool,
    tags: TagAssembler,
}

impl Pipeline {
    pub fn new(
        config: AssemblyConfig,
        collaborators: Collaborators,
        history_path: impl Into<PathBuf>,
    ) -> Self {
        let tags = TagAssembler::new(config.tags.clone());
        Self {
            config,
            collaborators,
            history_path: history_path.into(),
            rng: Box::new(StdRng::from_entropy()),
            dry_run: false,
            tags,
        }
    }

    pub fn with_rng(mut self, rng: impl RngCore + Send + Sync + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    /// Assemble without publishing or persisting.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    /// Load history, assemble, publish.
    pub async fn run_routine(&mut self, routine: Routine) -> PipelineResult<RunOutcome> {
        let mut history = HistoryStore::load(&self.history_path, self.config.history_capacity);
        let post = self.assemble(routine, &history).await?;
        self.publish(post, &mut history).await
    }

    pub async fn assemble(
        &mut self,
        routine: Routine,
        history: &HistoryStore,
    ) -> PipelineResult<AssembledPost> {
        info!(routine = %routine, "Assembling post");
        match routine {
            Routine::Promo => self.assemble_promo().await,
            Routine::Question => self.assemble_question(history).await,
            Routine::Spotlight(_) | Routine::Fact => self.assemble_single(routine, history).await,
            Routine::Rivalry | Routine::StarterPack => {
                self.assemble_collage(routine, history).await
            }
        }
    }

    /// Validate, upload, submit, then commit history.
    pub async fn publish(
        &self,
        post: AssembledPost,
        history: &mut HistoryStore,
    ) -> PipelineResult<RunOutcome> {
        post.validate(self.config.caption.post_char_limit)?;
        let mut outcome = RunOutcome::from_post(&post);

        if self.dry_run {
            info!(
                routine = %post.routine,
                images = post.images.len(),
                text = %post.text,
                "Dry run, not publishing"
            );
            outcome.dry_run = true;
            return Ok(outcome);
        }

        let publisher = &self.collaborators.publisher;
        let mut uploaded = Vec::with_capacity(post.images.len());
        for image in post.images {
            let handle = publisher
                .upload_image(image.bytes, &image.mime)
                .await
                .map_err(PipelineError::Publish)?;
            uploaded.push(PostImage {
                image: handle,
                alt: image.alt,
            });
        }

        let receipt = publisher
            .submit_post(&post.text, &uploaded)
            .await
            .map_err(PipelineError::Publish)?;
        info!(uri = %receipt.uri, routine = %post.routine, "Post published");

        for (category, id) in post.history {
            history.record(category, [id]);
        }
        outcome.history_persisted = match history.persist() {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Post published but history could not be saved");
                false
            }
        };
        outcome.receipt = Some(receipt);
        Ok(outcome)
    }

    fn retro_filter(&self) -> CatalogFilter {
        CatalogFilter {
            released: Some(DateRange::before_year(self.config.retro_cutoff_year)),
            ..CatalogFilter::default()
        }
    }

    /// Tags for a post, leaving room for at least a short caption.
    fn tags_for(&self, items: &[ContentItem], routine: Routine) -> TagSet {
        let mut tags = self.tags.assemble(items, routine.theme_label());
        let limits = &self.config.caption;
        tags.fit_within(limits.post_char_limit.saturating_sub(limits.short_target));
        tags
    }

    async fn caption(&self, request: &CaptionRequest, tags: &TagSet) -> Caption {
        CaptionLadder::new(self.collaborators.generator.as_ref(), &self.config.caption)
            .run(request, tags)
            .await
    }

    async fn select(
        &mut self,
        wanted: usize,
        filter: &CatalogFilter,
        history: &HistoryStore,
    ) -> PipelineResult<Vec<ContentItem>> {
        let selector = CandidateSelector::new(
            self.collaborators.catalog.as_ref(),
            history,
            &self.config.selection,
        );
        let items = selector.select(wanted, filter, self.rng.as_mut()).await;
        if items.len() < wanted {
            return Err(PipelineError::NoCandidates {
                wanted,
                found: items.len(),
            });
        }
        Ok(items)
    }

    async fn assemble_promo(&mut self) -> PipelineResult<AssembledPost> {
        let tags = self.tags_for(&[], Routine::Promo);
        let text = fit_text(
            &self.config.promo.text,
            &tags,
            self.config.caption.post_char_limit,
        );
        let images = self.promo_image().await.into_iter().collect();

        Ok(AssembledPost {
            routine: Routine::Promo,
            text: render_post(&text, &tags),
            caption: None,
            tags,
            images,
            item_ids: Vec::new(),
            history: Vec::new(),
        })
    }

    async fn assemble_question(&mut self, history: &HistoryStore) -> PipelineResult<AssembledPost> {
        let topic = routine::pick_topic(&self.config.topics, history, self.rng.as_mut())
            .cloned()
            .ok_or_else(|| {
                PipelineError::NothingToPost("question: no topics configured".to_string())
            })?;
        debug!(topic = %topic.id, "Topic picked");

        let tags = self.tags_for(&[], Routine::Question);
        let request = routine::question_caption_request(&topic, &self.config.caption);
        let caption = self.caption(&request, &tags).await;

        let mut images = Vec::new();
        if self.config.promo.attach_to_questions {
            images.extend(self.promo_image().await);
        }

        Ok(AssembledPost {
            routine: Routine::Question,
            text: caption.render(&tags),
            caption: Some(caption),
            tags,
            images,
            item_ids: Vec::new(),
            history: vec![(HistoryCategory::Topics, topic.id)],
        })
    }

    async fn assemble_single(
        &mut self,
        routine: Routine,
        history: &HistoryStore,
    ) -> PipelineResult<AssembledPost> {
        let filter = self.retro_filter();
        let mut picked = self.select(1, &filter, history).await?;
        let Some(candidate) = picked.pop() else {
            return Err(PipelineError::NoCandidates {
                wanted: 1,
                found: 0,
            });
        };

        let item = match self.collaborators.catalog.fetch_detail(&candidate.id).await {
            Ok(detail) => detail,
            Err(e) => {
                warn!(id = %candidate.id, error = %e, "Detail fetch failed, using search record");
                candidate
            }
        };
        info!(id = %item.id, name = %item.name, "Item selected");

        let tags = self.tags_for(std::slice::from_ref(&item), routine);
        let request = routine::item_caption_request(routine, &item, &self.config.caption);
        let caption = self.caption(&request, &tags).await;

        let mut images = Vec::new();
        if item.has_primary_image() {
            let alt = format!("Cover art for {}", item.name);
            images.extend(self.payload_image(&item.primary_image, alt).await);
        }
        for url in item.secondary_images.iter().take(routine.secondary_images()) {
            let alt = format!("Screenshot of {}", item.name);
            images.extend(self.payload_image(url, alt).await);
        }
        if matches!(routine, Routine::Spotlight(_)) && self.config.promo.attach_to_spotlights {
            images.extend(self.promo_image().await);
        }
        images.truncate(MAX_POST_IMAGES);

        Ok(AssembledPost {
            routine,
            text: caption.render(&tags),
            caption: Some(caption),
            tags,
            images,
            item_ids: vec![item.id.clone()],
            history: vec![(HistoryCategory::Items, item.id)],
        })
    }

    async fn assemble_collage(
        &mut self,
        routine: Routine,
        history: &HistoryStore,
    ) -> PipelineResult<AssembledPost> {
        let wanted = routine.item_count();
        let mut filter = self.retro_filter();
        let mut starter = None;
        if routine == Routine::StarterPack {
            let theme = routine::pick_starter_theme(&self.config.starter_themes, history)
                .cloned()
                .ok_or_else(|| {
                    PipelineError::NothingToPost("starter pack: no themes configured".to_string())
                })?;

            info!(theme = %theme.id, "Starter pack theme picked");
            filter = filter.merged(&theme.filter);
            starter = Some((theme, routine::starter_pack_number(history)));
        }

        let items = self.select(wanted, &filter, history).await?;
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        info!(items = ?names, "Items selected");

        let tags = self.tags_for(&items, routine);
        let request = match &starter {
            Some((theme, number)) => {
                routine::starter_pack_caption_request(theme, *number, &items, &self.config.caption)
            }
            None => routine::rivalry_caption_request(&items[0], &items[1], &self.config.caption),
        };
        let caption = self.caption(&request, &tags).await;
        let images = self.collage_images(routine, &items).await;

        let item_ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let mut commit: Vec<(HistoryCategory, String)> = item_ids
            .iter()
            .map(|id| (HistoryCategory::Items, id.clone()))
            .collect();
        if let Some((theme, _)) = &starter {
            commit.push((HistoryCategory::Features, theme.history_key()));
        }

        Ok(AssembledPost {
            routine,
            text: caption.render(&tags),
            caption: Some(caption),
            tags,
            images,
            item_ids,
            history: commit,
        })
    }

    /// One composited image, or the individual covers when too few decode.
    async fn collage_images(&self, routine: Routine, items: &[ContentItem]) -> Vec<PayloadImage> {
        let Some(mode) = routine.grid_mode() else {
            return Vec::new();
        };

        let mut names: Vec<&str> = Vec::with_capacity(items.len());
        let mut assets: Vec<ImageAsset> = Vec::with_capacity(items.len());
        for item in items.iter().filter(|i| i.has_primary_image()) {
            if let Some(asset) = self.decoded_image(&item.primary_image).await {
                names.push(&item.name);
                assets.push(asset);
            }
        }

        if let Some(collage) = compose(&assets, mode, &self.config.collage) {
            let alt = format!("Cover art collage: {}", names.join(", "));
            return self.encode(&collage, alt).into_iter().collect();
        }

        warn!(
            decoded = assets.len(),
            needed = mode.required_images(),
            "Collage skipped, attaching covers individually"
        );
        names
            .iter()
            .zip(&assets)
            .take(MAX_POST_IMAGES)
            .filter_map(|(name, asset)| self.encode(asset, format!("Cover art for {name}")))
            .collect()
    }

    async fn promo_image(&self) -> Option<PayloadImage> {
        let url = self.config.promo.image_url.as_deref()?;
        self.payload_image(url, "Promotional image".to_string())
            .await
    }

    async fn payload_image(&self, url: &str, alt: String) -> Option<PayloadImage> {
        let asset = self.decoded_image(url).await?;
        self.encode(&asset, alt)
    }

    async fn decoded_image(&self, url: &str) -> Option<ImageAsset> {
        let bytes = match self.collaborators.images.fetch(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(url, error = %e, "Image download failed, dropping image");
                return None;
            }
        };
        match ImageAsset::decode(&bytes) {
            Ok(asset) => Some(asset),
            Err(e) => {
                warn!(url, error = %e, "Image decode failed, dropping image");
                None
            }
        }
    }

    fn encode(&self, asset: &ImageAsset, alt: String) -> Option<PayloadImage> {
        match compress(asset, &self.config.compression) {
            Ok(out) => {
                debug!(
                    size = out.bytes.len(),
                    quality = out.quality,
                    "Image encoded"
                );

                Some(PayloadImage {
                    bytes: out.bytes,
                    mime: JPEG_MIME.to_string(),
                    alt,
                })
            }
            Err(e) => {
                warn!(error = %e, "Image encode failed, dropping image");
                None
            }
        }
    }
}

#[async_trait]
impl RoutineRunner for Pipeline {
    async fn run(&mut self, slot: SlotId, routine: Routine) -> PipelineResult<RunOutcome> {
        debug!(slot, routine = %routine, dry_run = self.dry_run, "Running routine");
        self.run_routine(routine).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(text: &str, images: usize) -> AssembledPost {
        AssembledPost {
            routine: Routine::Fact,
            text: text.to_string(),
            caption: None,
            tags: TagSet::new(),
            images: (0..images)
                .map(|_| PayloadImage {
                    bytes: vec![0xFF, 0xD8],
                    mime: JPEG_MIME.to_string(),
                    alt: String::new(),
                })
                .collect(),
            item_ids: Vec::new(),
            history: Vec::new(),
        }
    }

    #[test]
    fn validation_limits() {
        assert!(post("hello", 4).validate(300).is_ok());
        assert!(post("hello", 5).validate(300).is_err());
        assert!(post(&"x".repeat(301), 0).validate(300).is_err());
        assert!(post("   ", 0).validate(300).is_err());

        let mut empty_image = post("hello", 1);
        empty_image.images[0].bytes.clear();
        let err = empty_image.validate(300).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn outcome_copies_caption_fields() {
        let mut p = post("text", 2);
        p.caption = Some(Caption {
            text: "text".into(),
            attempt: 2,
            source: CaptionSource::Generated,
        });
        p.item_ids = vec!["7".into()];
        let outcome = RunOutcome::from_post(&p);
        assert_eq!(outcome.caption_attempt, Some(2));
        assert_eq!(outcome.images, 2);
        assert_eq!(outcome.item_ids, vec!["7".to_string()]);
        assert!(outcome.receipt.is_none());
    }
}
