//! Candidate selection against the catalog.
//!
//! Each attempt asks for one random page, shuffles it and keeps items that
//! have a cover, are not in the item history and were not already picked.
//! Attempts are bounded; a short or empty result is a normal outcome, never
//! an error. A page that comes back empty lowers the offset ceiling so later
//! attempts stay inside narrow result sets.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::content::ContentItem;
use crate::error::CollaboratorError;
use crate::history::{HistoryCategory, HistoryStore};

/// Release window, both ends optional, `until` exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Everything released before January 1st of `year`.
    pub fn before_year(year: i32) -> Self {
        Self {
            from: None,
            until: Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single(),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| ts >= from) && self.until.map_or(true, |until| ts < until)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogFilter {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released: Option<DateRange>,
}

impl CatalogFilter {
    /// Combine two filters; `other` adds labels and overrides the date range.
    pub fn merged(&self, other: &CatalogFilter) -> CatalogFilter {
        let mut merged = self.clone();
        merged.categories.extend(other.categories.iter().cloned());
        merged.platforms.extend(other.platforms.iter().cloned());
        if other.released.is_some() {
            merged.released = other.released.clone();
        }
        merged
    }
}

/// Catalog collaborator.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn query(
        &self,
        filter: &CatalogFilter,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<ContentItem>, CollaboratorError>;

    /// Full record with screenshots and categories.
    async fn fetch_detail(&self, id: &str) -> Result<ContentItem, CollaboratorError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionLimits {
    pub max_attempts: u32,
    pub page_size: u32,
    /// Highest page offset drawn.
    pub max_offset: u32,
}

impl Default for SelectionLimits {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            page_size: 50,
            max_offset: 500,
        }
    }
}

pub struct CandidateSelector<'a> {
    catalog: &'a dyn Catalog,
    history: &'a HistoryStore,
    limits: &'a SelectionLimits,
}

impl<'a> CandidateSelector<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        history: &'a HistoryStore,
        limits: &'a SelectionLimits,
    ) -> Self {
        Self {
            catalog,
            history,
            limits,
        }
    }

    /// Collect up to `wanted` unused items. May return fewer.
    pub async fn select(
        &self,
        wanted: usize,
        filter: &CatalogFilter,
        rng: &mut (dyn RngCore + Send),
    ) -> Vec<ContentItem> {
        let mut chosen: Vec<ContentItem> = Vec::with_capacity(wanted);
        if wanted == 0 {
            return chosen;
        }

        let page_size = self.limits.page_size.max(1);
        let mut offset_ceiling = self.limits.max_offset;
        let mut seen: HashSet<String> = HashSet::new();

        for attempt in 1..=self.limits.max_attempts {
            let offset = random_offset(&mut *rng, offset_ceiling, page_size);
            let mut batch = match self.catalog.query(filter, offset, page_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(attempt, offset, error = %e, "Catalog query failed");
                    continue;
                }
            };

            if batch.is_empty() && offset > 0 {
                offset_ceiling = offset - page_size.min(offset);
            }

            batch.shuffle(&mut *rng);
            for item in batch {
                if chosen.len() == wanted {
                    break;
                }
                if !item.has_primary_image()
                    || self.history.has(HistoryCategory::Items, &item.id)
                    || !seen.insert(item.id.clone())
                {
                    continue;
                }
                chosen.push(item);
            }

            debug!(
                attempt,
                offset,
                found = chosen.len(),
                wanted,
                "Candidate page scanned"
            );
            if chosen.len() == wanted {
                break;
            }
        }

        if chosen.len() < wanted {
            warn!(
                found = chosen.len(),
                wanted,
                attempts = self.limits.max_attempts,
                "Candidate selection came back short"
            );
        }
        chosen
    }
}

/// Uniform page-aligned offset in `0..=ceiling`.
fn random_offset(rng: &mut (dyn RngCore + Send), ceiling: u32, page_size: u32) -> u32 {
    let pages = ceiling / page_size;
    rng.gen_range(0..=pages) * page_size
}
