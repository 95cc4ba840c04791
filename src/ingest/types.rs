// src/ingest/types.rs
// Contract for the per-platform fetchers. Real clients live outside this
// crate; `FixtureProvider` serves demos and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One raw item as a platform hands it over, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedItem {
    /// Platform-native id, unique within the source.
    pub natural_key: String,
    pub text: String,
    pub author: Option<String>,
    pub url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub location: Option<String>,
    pub age_range: Option<String>,
    pub gender: Option<String>,
}

/// Opaque producer of platform content. Implementations signal transient
/// failures (retried) distinctly from configuration errors (not retried)
/// via [`crate::error::PipelineError`].
#[async_trait]
pub trait SourceProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch up to `limit` items matching `keywords` published since
    /// `since`.
    async fn fetch(
        &self,
        keywords: &[String],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FetchedItem>>;
}

/// Canned provider. Returns its items filtered by `since` and capped at
/// `limit`; keyword matching is the upstream platform's job in real
/// providers, so the fixture skips it too.
#[derive(Debug, Clone, Default)]
pub struct FixtureProvider {
    name: String,
    items: Vec<FetchedItem>,
}

impl FixtureProvider {
    pub fn new(name: impl Into<String>, items: Vec<FetchedItem>) -> Self {
        Self {
            name: name.into(),
            items,
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }
}

#[async_trait]
impl SourceProvider for FixtureProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        _keywords: &[String],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FetchedItem>> {
        Ok(self
            .items
            .iter()
            .filter(|it| it.published_at >= since)
            .take(limit)
            .cloned()
            .collect())
    }
}
