//! End-to-end pipeline runs against in-process collaborators.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

use assembly::{
    AssemblyConfig, Catalog, CatalogFilter, CollaboratorError, CollageLayout, Collaborators,
    ContentItem, DispatchOutcome, DispatchRequest, Dispatcher, GenerationError, HistoryCategory,
    HistoryStore, ImageRef, ImageSource, Pipeline, PipelineError, PostImage, PostReceipt,
    Publisher, Routine, RoutineRegistry, ScheduleTable, TextGenerator, Theme,
};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use mockall::mock;
use rand::rngs::StdRng;
use rand::SeedableRng;

struct FakeCatalog {
    items: Vec<ContentItem>,
    queries: Mutex<Vec<CatalogFilter>>,
}

impl FakeCatalog {
    fn new(items: Vec<ContentItem>) -> Self {
        Self {
            items,
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn query(
        &self,
        filter: &CatalogFilter,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<ContentItem>, CollaboratorError> {
        self.queries.lock().unwrap().push(filter.clone());
        Ok(self
            .items
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_detail(&self, id: &str) -> Result<ContentItem, CollaboratorError> {
        self.items
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| CollaboratorError::status("catalog", 404, id))
    }
}

struct FixedGenerator(Result<String, ()>);

#[async_trait]
impl TextGenerator for FixedGenerator {
    async fn generate(&self, _prompt: &str, _max_tokens: u32) -> Result<String, GenerationError> {
        self.0
            .clone()
            .map_err(|_| GenerationError::Request("offline".into()))
    }
}

#[derive(Default)]
struct FakeImages {
    by_url: HashMap<String, Vec<u8>>,
}

impl FakeImages {
    fn with(mut self, url: &str, w: u32, h: u32) -> Self {
        self.by_url.insert(url.to_string(), png(w, h));
        self
    }
}

#[async_trait]
impl ImageSource for FakeImages {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, CollaboratorError> {
        self.by_url
            .get(url)
            .cloned()
            .ok_or_else(|| CollaboratorError::status("images", 404, url))
    }
}

#[derive(Default)]
struct RecordingPublisher {
    uploads: Mutex<Vec<Vec<u8>>>,
    posts: Mutex<Vec<(String, Vec<PostImage>)>>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn upload_image(
        &self,
        bytes: Vec<u8>,
        mime: &str,
    ) -> Result<ImageRef, CollaboratorError> {
        assert_eq!(mime, "image/jpeg");
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(bytes);
        Ok(ImageRef(serde_json::json!({ "blob": uploads.len() })))
    }

    async fn submit_post(
        &self,
        text: &str,
        images: &[PostImage],
    ) -> Result<PostReceipt, CollaboratorError> {
        let mut posts = self.posts.lock().unwrap();
        posts.push((text.to_string(), images.to_vec()));
        Ok(PostReceipt {
            uri: format!("at://test/post/{}", posts.len()),
            cid: None,
        })
    }
}

mock! {
    pub Publisher {}

    #[async_trait]
    impl Publisher for Publisher {
        async fn upload_image(
            &self,
            bytes: Vec<u8>,
            mime: &str,
        ) -> Result<ImageRef, CollaboratorError>;
        async fn submit_post(
            &self,
            text: &str,
            images: &[PostImage],
        ) -> Result<PostReceipt, CollaboratorError>;
    }
}

fn png(w: u32, h: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([40, 120, 200])));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn game(id: &str, name: &str) -> ContentItem {
    ContentItem::new(id, name)
        .with_platforms(["Super Nintendo Entertainment System"])
        .with_primary_image(format!("https://img/{id}/cover.png"))
        .with_secondary_images([
            format!("https://img/{id}/shot1.png"),
            format!("https://img/{id}/shot2.png"),
        ])
}

fn images_for(items: &[ContentItem]) -> FakeImages {
    items.iter().fold(FakeImages::default(), |acc, item| {
        let acc = acc.with(&item.primary_image, 40, 30);
        item.secondary_images
            .iter()
            .fold(acc, |acc, url| acc.with(url, 64, 48))
    })
}

fn config() -> AssemblyConfig {
    let mut config = AssemblyConfig::default();
    config.selection.max_offset = 0;
    config.selection.max_attempts = 3;
    config.collage = CollageLayout {
        pair_height: 60,
        grid_side: 40,
    };
    config
}

fn pipeline(
    items: &[ContentItem],
    publisher: Arc<dyn Publisher>,
    generator: FixedGenerator,
    history: &Path,
) -> Pipeline {
    let collaborators = Collaborators {
        catalog: Arc::new(FakeCatalog::new(items.to_vec())),
        generator: Arc::new(generator),
        images: Arc::new(images_for(items)),
        publisher,
    };
    let pipeline = Pipeline::new(config(), collaborators, history);
    pipeline.with_rng(StdRng::seed_from_u64(7))
}

fn caption_ok() -> FixedGenerator {
    FixedGenerator(Ok("A sixteen-bit classic worth replaying.".to_string()))
}

#[tokio::test]
async fn fact_post_publishes_cover_and_records_item() {
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join("history.json");
    let items = vec![game("42", "Gunstar Heroes")];
    let publisher = Arc::new(RecordingPublisher::default());

    let mut pipeline = pipeline(&items, publisher.clone(), caption_ok(), &history_path);
    let outcome = pipeline.run_routine(Routine::Fact).await.unwrap();

    assert_eq!(outcome.item_ids, vec!["42".to_string()]);
    assert_eq!(outcome.images, 1);
    assert_eq!(outcome.caption_attempt, Some(1));
    assert!(outcome.history_persisted);
    assert!(outcome.receipt.is_some());

    let posts = publisher.posts.lock().unwrap();
    assert_eq!(posts.len(), 1);
    let (text, images) = &posts[0];
    let lead = "A sixteen-bit classic worth replaying.\n\n#RetroGaming";
    assert!(text.starts_with(lead));
    assert!(text.contains("#GunstarHeroes"));
    assert!(text.contains("#SNES"));
    assert!(text.chars().count() <= 300);
    assert_eq!(images[0].alt, "Cover art for Gunstar Heroes");

    let stored = HistoryStore::load(&history_path, 100);
    assert!(stored.has(HistoryCategory::Items, "42"));
}

#[tokio::test]
async fn spotlight_attaches_screenshots() {
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join("h.json");
    let items = vec![game("7", "Secret of Mana")];
    let publisher = Arc::new(RecordingPublisher::default());

    let mut pipeline = pipeline(&items, publisher.clone(), caption_ok(), &history_path);
    let outcome = pipeline
        .run_routine(Routine::Spotlight(Theme::Obscure))
        .await
        .unwrap();

    assert_eq!(outcome.images, 3);
    let posts = publisher.posts.lock().unwrap();
    assert!(posts[0].0.contains("#HiddenGems"));
}

#[tokio::test]
async fn publish_failure_leaves_item_selectable() {
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join("history.json");
    let items = vec![game("42", "Gunstar Heroes")];

    let mut failing = MockPublisher::new();
    failing
        .expect_upload_image()
        .times(1)
        .returning(|_, _| Ok(ImageRef(serde_json::json!({ "blob": "x" }))));
    failing
        .expect_submit_post()
        .times(1)
        .returning(|_, _| Err(CollaboratorError::status("bluesky", 502, "bad gateway")));

    let mut first = pipeline(&items, Arc::new(failing), caption_ok(), &history_path);
    let err = first.run_routine(Routine::Fact).await.unwrap_err();
    assert!(matches!(err, PipelineError::Publish(_)));
    assert!(!history_path.exists());

    let publisher = Arc::new(RecordingPublisher::default());
    let mut second = pipeline(&items, publisher.clone(), caption_ok(), &history_path);
    let outcome = second.run_routine(Routine::Fact).await.unwrap();
    assert_eq!(outcome.item_ids, vec!["42".to_string()]);

    let mut third = pipeline(&items, publisher, caption_ok(), &history_path);
    let err = third.run_routine(Routine::Fact).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::NoCandidates {
            wanted: 1,
            found: 0,
        }
    ));
}

#[tokio::test]
async fn dry_run_never_touches_publisher_or_history() {
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join("history.json");
    let items = vec![game("1", "Contra")];

    let mut publisher = MockPublisher::new();
    publisher.expect_upload_image().times(0);
    publisher.expect_submit_post().times(0);

    let pipeline = pipeline(&items, Arc::new(publisher), caption_ok(), &history_path);
    let mut pipeline = pipeline.dry_run(true);
    let outcome = pipeline.run_routine(Routine::Fact).await.unwrap();

    assert!(outcome.dry_run);
    assert!(!outcome.history_persisted);
    assert!(!history_path.exists());
}

#[tokio::test]
async fn rivalry_posts_one_pair_collage() {
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join("h.json");
    let items = vec![game("1", "Street Fighter II"), game("2", "Mortal Kombat")];
    let publisher = Arc::new(RecordingPublisher::default());

    let mut pipeline = pipeline(&items, publisher.clone(), caption_ok(), &history_path);
    let outcome = pipeline.run_routine(Routine::Rivalry).await.unwrap();

    assert_eq!(outcome.images, 1);
    assert_eq!(outcome.item_ids.len(), 2);

    // Two 40x30 covers at height 60 → 80 + 80 wide.
    let uploads = publisher.uploads.lock().unwrap();
    let uploaded = image::load_from_memory(&uploads[0]).unwrap();
    assert_eq!((uploaded.width(), uploaded.height()), (160, 60));
    let posts = publisher.posts.lock().unwrap();
    assert!(posts[0].0.contains("#VersusMode"));
}

#[tokio::test]
async fn starter_pack_uses_grid_and_rotates_theme() {
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join("h.json");
    let items: Vec<ContentItem> = (1..=4)
        .map(|n| game(&n.to_string(), &format!("Game {n}")))
        .collect();
    let publisher = Arc::new(RecordingPublisher::default());

    let offline = FixedGenerator(Err(()));
    let mut pipeline = pipeline(&items, publisher.clone(), offline, &history_path);
    let outcome = pipeline.run_routine(Routine::StarterPack).await.unwrap();

    assert_eq!(outcome.images, 1);
    assert_eq!(outcome.caption_attempt, Some(3));
    let uploads = publisher.uploads.lock().unwrap();
    let uploaded = image::load_from_memory(&uploads[0]).unwrap();
    assert_eq!((uploaded.width(), uploaded.height()), (80, 80));

    let text = &publisher.posts.lock().unwrap()[0].0;
    assert!(text.starts_with("SNES Starter Pack #1: Game "), "{text}");
    assert!((1..=4).all(|n| text.contains(&format!("Game {n}"))));

    let stored = HistoryStore::load(&history_path, 100);
    assert!(stored.has(HistoryCategory::Features, "starter:snes"));
    assert_eq!(stored.len(HistoryCategory::Items), 4);
}

#[tokio::test]
async fn short_selection_fails_without_publishing() {
    let dir = tempfile::tempdir().unwrap();
    let items = vec![game("1", "Solo")];
    let mut publisher = MockPublisher::new();
    publisher.expect_submit_post().times(0);

    let history_path = dir.path().join("h.json");
    let mut pipeline = pipeline(&items, Arc::new(publisher), caption_ok(), &history_path);
    let err = pipeline.run_routine(Routine::Rivalry).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::NoCandidates {
            wanted: 2,
            found: 1,
        }
    ));
}

#[tokio::test]
async fn missing_cover_still_posts_text() {
    let dir = tempfile::tempdir().unwrap();
    let items = vec![game("9", "Lost Vikings")];
    let publisher = Arc::new(RecordingPublisher::default());
    let collaborators = Collaborators {
        catalog: Arc::new(FakeCatalog::new(items.clone())),
        generator: Arc::new(caption_ok()),
        images: Arc::new(FakeImages::default()),
        publisher: publisher.clone(),
    };

    let pipeline = Pipeline::new(config(), collaborators, dir.path().join("h.json"));
    let mut pipeline = pipeline.with_rng(StdRng::seed_from_u64(1));

    let outcome = pipeline.run_routine(Routine::Fact).await.unwrap();
    assert_eq!(outcome.images, 0);
    assert_eq!(publisher.posts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn question_records_topic() {
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join("h.json");
    let publisher = Arc::new(RecordingPublisher::default());

    let offline = FixedGenerator(Err(()));
    let mut pipeline = pipeline(&[], publisher.clone(), offline, &history_path);
    let outcome = pipeline.run_routine(Routine::Question).await.unwrap();
    assert!(outcome.item_ids.is_empty());

    let stored = HistoryStore::load(&history_path, 100);
    assert_eq!(stored.len(HistoryCategory::Topics), 1);
    let posts = publisher.posts.lock().unwrap();
    assert!(posts[0].0.ends_with("#RetroQuestion"));
}

#[tokio::test]
async fn dispatcher_drives_scheduled_rivalry() {
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join("h.json");
    let items = vec![
        game("1", "Sonic the Hedgehog"),
        game("2", "Super Mario World"),
    ];
    let publisher = Arc::new(RecordingPublisher::default());
    let mut pipeline = pipeline(&items, publisher.clone(), caption_ok(), &history_path);


    let dispatcher = Dispatcher::new(ScheduleTable::default(), RoutineRegistry::default());
    let request = DispatchRequest {
        weekday: 1,
        hour: 10,
        ..Default::default()
    };
    let report = dispatcher.dispatch(request, &mut pipeline).await;

    match report.outcome {
        DispatchOutcome::Completed { slot, run } => {
            assert_eq!(slot, 3);
            assert_eq!(run.routine, Routine::Rivalry);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(publisher.posts.lock().unwrap().len(), 1);
}
