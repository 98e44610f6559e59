//! AT-protocol publisher.
//!
//! One session per process (`createSession`), then `uploadBlob` per image
//! and a single `createRecord` for the post. Hashtags in the text become
//! tag facets addressed by UTF-8 byte offsets.

use std::sync::LazyLock;

use assembly::{CollaboratorError, ImageRef, PostImage, PostReceipt, Publisher};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use super::{join_url, parse_error, request_error, status_error};
use crate::config::PublisherSettings;

const SERVICE: &str = "bluesky";
const POST_COLLECTION: &str = "app.bsky.feed.post";

static HASHTAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)(#([\p{L}\p{N}_]+))").expect("HASHTAG_RE regex should compile")
});

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    did: String,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    blob: Value,
}

pub struct BlueskyPublisher {
    client: reqwest::Client,
    base_url: String,
    handle: String,
    password: String,
    session: OnceCell<Session>,
}

impl BlueskyPublisher {
    pub fn new(client: reqwest::Client, settings: &PublisherSettings) -> Self {
        Self {
            client,
            base_url: settings.base_url.clone(),
            handle: settings.handle.clone(),
            password: settings.password.clone(),
            session: OnceCell::new(),
        }
    }

    fn xrpc(&self, method: &str) -> String {
        join_url(&self.base_url, &format!("xrpc/{method}"))
    }

    async fn session(&self) -> Result<&Session, CollaboratorError> {
        self.session.get_or_try_init(|| self.create_session()).await
    }

    async fn create_session(&self) -> Result<Session, CollaboratorError> {
        let response = self
            .client
            .post(self.xrpc("com.atproto.server.createSession"))
            .json(&json!({ "identifier": self.handle, "password": self.password }))
            .send()
            .await
            .map_err(|e| request_error(SERVICE, e))?;
        if !response.status().is_success() {
            return Err(status_error(SERVICE, response).await);
        }
        let session: Session = response
            .json()
            .await
            .map_err(|e| parse_error(SERVICE, e))?;
        tracing::info!(handle = %self.handle, did = %session.did, "Publisher session created");
        Ok(session)
    }
}

#[async_trait]
impl Publisher for BlueskyPublisher {
    async fn upload_image(
        &self,
        bytes: Vec<u8>,
        mime: &str,
    ) -> Result<ImageRef, CollaboratorError> {
        let session = self.session().await?;
        let size = bytes.len();
        let response = self
            .client
            .post(self.xrpc("com.atproto.repo.uploadBlob"))
            .bearer_auth(&session.access_jwt)
            .header("Content-Type", mime)
            .body(bytes)
            .send()
            .await
            .map_err(|e| request_error(SERVICE, e))?;
        if !response.status().is_success() {
            return Err(status_error(SERVICE, response).await);
        }
        let uploaded: BlobResponse = response
            .json()
            .await
            .map_err(|e| parse_error(SERVICE, e))?;
        tracing::debug!(size, "Image blob uploaded");
        Ok(ImageRef(uploaded.blob))
    }

    async fn submit_post(
        &self,
        text: &str,
        images: &[PostImage],
    ) -> Result<PostReceipt, CollaboratorError> {

        let session = self.session().await?;
        let record = post_record(text, images, Utc::now());
        let response = self
            .client
            .post(self.xrpc("com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_jwt)
            .json(&json!({
                "repo": session.did,
                "collection": POST_COLLECTION,
                "record": record,
            }))
            .send()
            .await
            .map_err(|e| request_error(SERVICE, e))?;
        if !response.status().is_success() {
            return Err(status_error(SERVICE, response).await);
        }
        response.json().await.map_err(|e| parse_error(SERVICE, e))
    }
}

/// `app.bsky.feed.post` record with optional facets and image embed.
pub fn post_record(text: &str, images: &[PostImage], created_at: DateTime<Utc>) -> Value {
    let mut record = json!({
        "$type": POST_COLLECTION,
        "text": text,
        "createdAt": created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    });

    let facets = hashtag_facets(text);
    if !facets.is_empty() {
        record["facets"] = Value::Array(facets);
    }
    if !images.is_empty() {
        let images: Vec<Value> = images
            .iter()
            .map(|img| json!({ "alt": img.alt, "image": img.image.0 }))
            .collect();
        record["embed"] = json!({ "$type": "app.bsky.embed.images", "images": images });
    }
    record
}

/// Tag facets for every `#label` that starts the text or follows whitespace.
pub fn hashtag_facets(text: &str) -> Vec<Value> {
    HASHTAG_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(1)?;
            let tag = caps.get(2)?;
            Some(json!({
                "index": { "byteStart": whole.start(), "byteEnd": whole.end() },
                "features": [{ "$type": "app.bsky.richtext.facet#tag", "tag": tag.as_str() }],
            }))
        })
        .collect()
}
