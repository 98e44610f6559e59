//! IGDB-style catalog over `POST {base}/games` with a plain-text query body.

use assembly::{Catalog, CatalogFilter, CollaboratorError, ContentItem};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;

use super::{join_url, parse_error, request_error, status_error};
use crate::config::CatalogSettings;

const SERVICE: &str = "catalog";
const COVER_SIZE: &str = "t_cover_big";
const SCREENSHOT_SIZE: &str = "t_screenshot_big";
const IMAGE_BASE: &str = "https://images.igdb.com/igdb/image/upload";
const SEARCH_FIELDS: &str = "id,name,genres.name,platforms.name,cover.image_id,first_release_date";

pub struct IgdbCatalog {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    token: String,
}

impl IgdbCatalog {
    pub fn new(client: reqwest::Client, settings: &CatalogSettings) -> Self {
        Self {
            client,
            base_url: settings.base_url.clone(),
            client_id: settings.client_id.clone(),
            token: settings.token.clone(),
        }
    }

    async fn games(&self, body: String) -> Result<Vec<IgdbGame>, CollaboratorError> {
        tracing::debug!(query = %body, "Catalog query");
        let response = self
            .client
            .post(join_url(&self.base_url, "games"))
            .header("Client-ID", &self.client_id)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| request_error(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(status_error(SERVICE, response).await);
        }
        response
            .json::<Vec<IgdbGame>>()
            .await
            .map_err(|e| parse_error(SERVICE, e))
    }
}

#[async_trait]
impl Catalog for IgdbCatalog {
    async fn query(
        &self,
        filter: &CatalogFilter,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<ContentItem>, CollaboratorError> {
        let games = self.games(search_query(filter, offset, limit)).await?;
        Ok(games.into_iter().map(ContentItem::from).collect())
    }

    async fn fetch_detail(&self, id: &str) -> Result<ContentItem, CollaboratorError> {
        let numeric: u64 = id
            .parse()
            .map_err(|_| CollaboratorError::parse(SERVICE, format!("non-numeric id {id:?}")))?;
        let body =
            format!("fields {SEARCH_FIELDS},screenshots.image_id; where id = {numeric}; limit 1;");
        self.games(body)
            .await?
            .into_iter()
            .next()
            .map(ContentItem::from)
            .ok_or_else(|| CollaboratorError::status(SERVICE, 404, format!("game {id} not found")))
    }
}

fn quoted_list(labels: &[String]) -> String {
    labels
        .iter()
        .map(|l| format!("\"{}\"", l.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Query body for one page of games with a cover.
pub fn search_query(filter: &CatalogFilter, offset: u32, limit: u32) -> String {
    let mut clauses = vec!["cover != null".to_string()];
    if let Some(range) = &filter.released {
        if let Some(from) = range.from {
            clauses.push(format!("first_release_date >= {}", from.timestamp()));
        }
        if let Some(until) = range.until {
            clauses.push(format!("first_release_date < {}", until.timestamp()));
        }
    }
    if !filter.categories.is_empty() {
        let genres = quoted_list(&filter.categories);
        clauses.push(format!("genres.name = ({genres})"));
    }
    if !filter.platforms.is_empty() {
        let platforms = quoted_list(&filter.platforms);
        clauses.push(format!("platforms.name = ({platforms})"));
    }
    format!(
        "fields {SEARCH_FIELDS}; where {}; limit {limit}; offset {offset};",
        clauses.join(" & ")
    )
}

fn image_url(size: &str, image_id: &str) -> String {
    format!("{IMAGE_BASE}/{size}/{image_id}.jpg")
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ImageId {
    image_id: String,
}

#[derive(Debug, Deserialize)]
struct IgdbGame {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    genres: Vec<Named>,
    #[serde(default)]
    platforms: Vec<Named>,
    cover: Option<ImageId>,
    #[serde(default)]
    screenshots: Vec<ImageId>,
    first_release_date: Option<i64>,
}

impl From<IgdbGame> for ContentItem {
    fn from(game: IgdbGame) -> Self {
        let mut item = ContentItem::new(game.id.to_string(), game.name)
            .with_categories(game.genres.into_iter().map(|g| g.name))
            .with_platforms(game.platforms.into_iter().map(|p| p.name))
            .with_secondary_images(
                game.screenshots
                    .iter()
                    .map(|s| image_url(SCREENSHOT_SIZE, &s.image_id)),
            );
        if let Some(cover) = game.cover {
            item = item.with_primary_image(image_url(COVER_SIZE, &cover.image_id));
        }
        if let Some(released) = game
            .first_release_date
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        {
            item = item.with_released(released);
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assembly::DateRange;

    #[test]
    fn query_includes_every_filter_clause() {
        let filter = CatalogFilter {
            categories: vec!["Platform".into()],
            platforms: vec![
                "Super Nintendo Entertainment System".into(),
                "Say \"hi\"".into(),
            ],
            released: Some(DateRange::before_year(2006)),
        };
        let q = search_query(&filter, 100, 50);
        assert!(q.starts_with("fields id,name,"));
        let released = "where cover != null & first_release_date < 1136073600";
        assert!(q.contains(released));
        assert!(q.contains("genres.name = (\"Platform\")"));
        let platforms =
            "platforms.name = (\"Super Nintendo Entertainment System\",\"Say \\\"hi\\\"\")";
        assert!(q.contains(platforms));
        assert!(q.ends_with("limit 50; offset 100;"));
    }

    #[test]
    fn game_record_maps_to_content_item() {
        let raw = r#"[{
            "id": 1234,
            "name": "Gunstar Heroes",
            "genres": [{"id": 5, "name": "Shooter"}],
            "platforms": [{"id": 29, "name": "Sega Mega Drive/Genesis"}],
            "cover": {"id": 9, "image_id": "co1abc"},
            "screenshots": [{"id": 1, "image_id": "sc1"}, {"id": 2, "image_id": "sc2"}],
            "first_release_date": 747619200
        }]"#;
        let games: Vec<IgdbGame> = serde_json::from_str(raw).unwrap();
        let item = ContentItem::from(games.into_iter().next().unwrap());

        assert_eq!(item.id, "1234");
        assert_eq!(item.categories, vec!["Shooter".to_string()]);
        assert_eq!(
            item.primary_image,
            "https://images.igdb.com/igdb/image/upload/t_cover_big/co1abc.jpg"
        );
        assert_eq!(item.secondary_images.len(), 2);
        let first_shot = &item.secondary_images[0];
        assert!(first_shot.contains("/t_screenshot_big/sc1.jpg"));

        assert_eq!(item.release_year(), Some(1993));
    }

    #[test]
    fn sparse_record_still_maps() {
        let games: Vec<IgdbGame> = serde_json::from_str(r#"[{"id": 7}]"#).unwrap();
        let item = ContentItem::from(games.into_iter().next().unwrap());
        assert!(!item.has_primary_image());
        assert!(item.released.is_none());
    }
}
