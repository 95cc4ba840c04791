// src/model.rs
// Domain types shared across the pipeline. `TopicSegment` is the core
// time-series unit; its identity is the full 6-tuple key, which is what
// makes re-running an analysis pass idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Sentinel for demographic fields the platform did not provide.
/// Grouping keys never contain an absent value.
pub const UNKNOWN: &str = "unknown";

/// Watch configuration: what to look for and where. CRUD for these lives
/// outside this service; we only read them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watch {
    pub id: Uuid,
    pub name: String,
    pub keywords: Vec<String>,
    pub platforms: Vec<String>,
    pub active: bool,
}

/// NLP output for one piece of text. Produced by an opaque tagger; the
/// pipeline only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tags {
    pub entities: Vec<String>,
    pub keywords: Vec<String>,
    /// In [-1, 1].
    pub sentiment: f64,
    pub sentiment_label: String,
}

/// One normalized piece of platform content. Unique per
/// `(source, natural_key)`; ingestion dedups on that pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub watch_id: Uuid,
    pub source: String,
    /// Platform-native id (video id, post fullname, status id, ...).
    pub natural_key: String,
    pub text: String,
    pub author: Option<String>,
    pub url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub location: Option<String>,
    pub age_range: Option<String>,
    pub gender: Option<String>,
    pub tags: Option<Tags>,
}

impl ContentRecord {
    pub fn dedup_key(&self) -> (String, String) {
        (self.source.clone(), self.natural_key.clone())
    }
}

/// One topic occurrence extracted from a tagged record. The analytics
/// engine counts these; demographics stay optional here and are
/// normalized to [`UNKNOWN`] at grouping time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMention {
    pub topic: String,
    pub source: String,
    pub location: Option<String>,
    pub age_range: Option<String>,
    pub gender: Option<String>,
    pub sentiment: f64,
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Composite identity of a segment: one demographic slice of one topic in
/// one time window. Append-only; a past window's key is never written again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentKey {
    pub window_start: DateTime<Utc>,
    pub topic: String,
    pub source: String,
    pub location: String,
    pub age_range: String,
    pub gender: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSegment {
    pub key: SegmentKey,
    pub volume: u64,
    /// Relative change vs the previous equal-length window. May be negative.
    pub growth_rate: f64,
    pub sentiment_avg: f64,
    pub is_trending: bool,
    pub alert_sent: bool,
    /// Top keywords seen in the group, used by the validation reconciler.
    pub keywords: Vec<String>,
}

/// Cross-check of one trending segment against the external interest
/// signal. Immutable after creation; survives segment deletion with a
/// detached key, for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendValidation {
    pub id: Uuid,
    /// None once the parent segment has been purged.
    pub segment_key: Option<SegmentKey>,
    pub topic: String,
    /// Mean normalized interest in [0, 1].
    pub match_index: f64,
    pub validated: bool,
    pub also_external: bool,
    /// Trending on the monitored platforms but absent externally.
    pub platform_only: bool,
    /// Raw interest series per keyword, as returned by the signal.
    pub series: HashMap<String, Vec<f64>>,
    pub validated_at: DateTime<Utc>,
}

/// Normalize an optional demographic field for grouping.
pub fn demographic_or_unknown(v: Option<&str>) -> String {
    match v {
        Some(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => UNKNOWN.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_demographics_normalize_to_unknown() {
        assert_eq!(demographic_or_unknown(None), UNKNOWN);
        assert_eq!(demographic_or_unknown(Some("  ")), UNKNOWN);
        assert_eq!(demographic_or_unknown(Some("18-24")), "18-24");
    }
}
