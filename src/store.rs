// src/store.rs
// Persistence seam. The engine behind it is out of scope; the trait pins
// down exactly the query patterns the pipeline needs, and `MemStore`
// implements them in memory for the service and its tests. All writes the
// pipeline performs are insert-if-absent, which is what makes re-running
// any stage safe.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{ContentRecord, SegmentKey, TopicMention, TopicSegment, TrendValidation, Watch};

#[derive(Debug, Clone, Default)]
pub struct SegmentFilter {
    pub source: Option<String>,
    pub location: Option<String>,
    pub active_only: bool,
    pub since: Option<DateTime<Utc>>,
    pub skip: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PurgeStats {
    pub content_removed: usize,
    pub mentions_removed: usize,
    pub segments_removed: usize,
    pub validations_detached: usize,
}

#[async_trait]
pub trait Store: Send + Sync {
    // Watch configs (read side only; CRUD lives elsewhere).
    async fn upsert_watch(&self, watch: Watch);
    async fn watch(&self, id: Uuid) -> Option<Watch>;
    async fn watches(&self, active_only: bool) -> Vec<Watch>;

    /// Insert unless `(source, natural_key)` already exists. Returns
    /// whether a row was written.
    async fn insert_content_if_absent(&self, record: ContentRecord) -> bool;

    async fn insert_mentions(&self, mentions: Vec<TopicMention>);

    /// Mentions with `created_at` in `[start, end)`.
    async fn mentions_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<TopicMention>;

    /// Count mentions of one topic on one platform in `[start, end)` —
    /// the prior-window lookup of the analytics pass.
    async fn count_mentions(
        &self,
        topic: &str,
        source: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> u64;

    /// Insert unless the 6-tuple key already exists. Past windows are
    /// never rewritten.
    async fn insert_segment_if_absent(&self, segment: TopicSegment) -> bool;

    /// Filtered, paginated listing, newest window first. Returns
    /// `(total_matching, page)`.
    async fn list_segments(&self, filter: &SegmentFilter) -> (usize, Vec<TopicSegment>);

    /// Trending segments with no validation yet, oldest window first, at
    /// most `limit`.
    async fn trending_unvalidated(&self, limit: usize) -> Vec<TopicSegment>;

    async fn insert_validation(&self, validation: TrendValidation);

    async fn validations(&self) -> Vec<TrendValidation>;

    /// Retention: drop content/mentions/segments older than `cutoff`.
    /// Validations of purged segments are detached (key set to `None`),
    /// never deleted.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> PurgeStats;
}

#[derive(Debug, Default)]
struct MemState {
    watches: HashMap<Uuid, Watch>,
    content: HashMap<(String, String), ContentRecord>,
    mentions: Vec<TopicMention>,
    segments: HashMap<SegmentKey, TopicSegment>,
    validations: Vec<TrendValidation>,
}

/// In-memory store. Fine for a single process; everything behind one
/// mutex, no await points while locked.
#[derive(Debug, Default)]
pub struct MemStore {
    inner: Mutex<MemState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_count(&self) -> usize {
        self.inner.lock().expect("store mutex poisoned").content.len()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn upsert_watch(&self, watch: Watch) {
        let mut s = self.inner.lock().expect("store mutex poisoned");
        s.watches.insert(watch.id, watch);
    }

    async fn watch(&self, id: Uuid) -> Option<Watch> {
        let s = self.inner.lock().expect("store mutex poisoned");
        s.watches.get(&id).cloned()
    }

    async fn watches(&self, active_only: bool) -> Vec<Watch> {
        let s = self.inner.lock().expect("store mutex poisoned");
        let mut out: Vec<Watch> = s
            .watches
            .values()
            .filter(|w| !active_only || w.active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    async fn insert_content_if_absent(&self, record: ContentRecord) -> bool {
        let mut s = self.inner.lock().expect("store mutex poisoned");
        let key = record.dedup_key();
        if s.content.contains_key(&key) {
            return false;
        }
        s.content.insert(key, record);
        true
    }

    async fn insert_mentions(&self, mentions: Vec<TopicMention>) {
        let mut s = self.inner.lock().expect("store mutex poisoned");
        s.mentions.extend(mentions);
    }

    async fn mentions_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<TopicMention> {
        let s = self.inner.lock().expect("store mutex poisoned");
        s.mentions
            .iter()
            .filter(|m| m.created_at >= start && m.created_at < end)
            .cloned()
            .collect()
    }

    async fn count_mentions(
        &self,
        topic: &str,
        source: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> u64 {
        let s = self.inner.lock().expect("store mutex poisoned");
        s.mentions
            .iter()
            .filter(|m| {
                m.topic == topic
                    && m.source == source
                    && m.created_at >= start
                    && m.created_at < end
            })
            .count() as u64
    }

    async fn insert_segment_if_absent(&self, segment: TopicSegment) -> bool {
        let mut s = self.inner.lock().expect("store mutex poisoned");
        if s.segments.contains_key(&segment.key) {
            return false;
        }
        s.segments.insert(segment.key.clone(), segment);
        true
    }

    async fn list_segments(&self, filter: &SegmentFilter) -> (usize, Vec<TopicSegment>) {
        let s = self.inner.lock().expect("store mutex poisoned");
        let mut rows: Vec<TopicSegment> = s
            .segments
            .values()
            .filter(|seg| {
                filter
                    .source
                    .as_deref()
                    .is_none_or(|src| seg.key.source.eq_ignore_ascii_case(src))
                    && filter.location.as_deref().is_none_or(|loc| {
                        seg.key.location.to_lowercase().contains(&loc.to_lowercase())
                    })
                    && (!filter.active_only || seg.is_trending)
                    && filter.since.is_none_or(|t| seg.key.window_start >= t)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.key.window_start.cmp(&a.key.window_start));
        let total = rows.len();
        let limit = if filter.limit == 0 { total } else { filter.limit };
        let page = rows.into_iter().skip(filter.skip).take(limit).collect();
        (total, page)
    }

    async fn trending_unvalidated(&self, limit: usize) -> Vec<TopicSegment> {
        let s = self.inner.lock().expect("store mutex poisoned");
        let mut rows: Vec<TopicSegment> = s
            .segments
            .values()
            .filter(|seg| {
                seg.is_trending
                    && !s
                        .validations
                        .iter()
                        .any(|v| v.segment_key.as_ref() == Some(&seg.key))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.key.window_start.cmp(&b.key.window_start));
        rows.truncate(limit);
        rows
    }

    async fn insert_validation(&self, validation: TrendValidation) {
        let mut s = self.inner.lock().expect("store mutex poisoned");
        s.validations.push(validation);
    }

    async fn validations(&self) -> Vec<TrendValidation> {
        let s = self.inner.lock().expect("store mutex poisoned");
        s.validations.clone()
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> PurgeStats {
        let mut s = self.inner.lock().expect("store mutex poisoned");
        let mut stats = PurgeStats::default();

        let before = s.content.len();
        s.content.retain(|_, c| c.published_at >= cutoff);
        stats.content_removed = before - s.content.len();

        let before = s.mentions.len();
        s.mentions.retain(|m| m.created_at >= cutoff);
        stats.mentions_removed = before - s.mentions.len();

        let removed_keys: Vec<SegmentKey> = s
            .segments
            .keys()
            .filter(|k| k.window_start < cutoff)
            .cloned()
            .collect();
        for k in &removed_keys {
            s.segments.remove(k);
        }
        stats.segments_removed = removed_keys.len();

        for v in s.validations.iter_mut() {
            if let Some(key) = &v.segment_key {
                if removed_keys.contains(key) {
                    v.segment_key = None;
                    stats.validations_detached += 1;
                }
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn seg(window_start: DateTime<Utc>, topic: &str, trending: bool) -> TopicSegment {
        TopicSegment {
            key: SegmentKey {
                window_start,
                topic: topic.into(),
                source: "reddit".into(),
                location: "unknown".into(),
                age_range: "unknown".into(),
                gender: "unknown".into(),
            },
            volume: 12,
            growth_rate: 0.6,
            sentiment_avg: 0.1,
            is_trending: trending,
            alert_sent: false,
            keywords: vec![topic.into()],
        }
    }

    #[tokio::test]
    async fn segment_insert_is_keyed_on_full_tuple() {
        let store = MemStore::new();
        let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        assert!(store.insert_segment_if_absent(seg(t0, "a", true)).await);
        // Same key again: skipped, first write wins.
        assert!(!store.insert_segment_if_absent(seg(t0, "a", false)).await);
        // Different window: new row.
        let t1 = Utc.with_ymd_and_hms(2026, 8, 1, 11, 0, 0).unwrap();
        assert!(store.insert_segment_if_absent(seg(t1, "a", true)).await);
    }

    #[tokio::test]
    async fn purge_detaches_but_keeps_validations() {
        let store = MemStore::new();
        let old = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        let fresh = Utc.with_ymd_and_hms(2026, 8, 20, 0, 0, 0).unwrap();
        let old_seg = seg(old, "stale", true);
        store.insert_segment_if_absent(old_seg.clone()).await;
        store.insert_segment_if_absent(seg(fresh, "live", true)).await;
        store
            .insert_validation(TrendValidation {
                id: Uuid::new_v4(),
                segment_key: Some(old_seg.key.clone()),
                topic: "stale".into(),
                match_index: 0.8,
                validated: true,
                also_external: true,
                platform_only: false,
                series: HashMap::new(),
                validated_at: fresh,
            })
            .await;

        let cutoff = Utc.with_ymd_and_hms(2026, 8, 10, 0, 0, 0).unwrap();
        let stats = store.purge_before(cutoff).await;
        assert_eq!(stats.segments_removed, 1);
        assert_eq!(stats.validations_detached, 1);

        let vs = store.validations().await;
        assert_eq!(vs.len(), 1);
        assert!(vs[0].segment_key.is_none());
    }

    #[tokio::test]
    async fn listing_filters_and_paginates() {
        let store = MemStore::new();
        let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        for i in 0..5 {
            store
                .insert_segment_if_absent(seg(t0, &format!("t{i}"), i % 2 == 0))
                .await;
        }
        let (total, page) = store
            .list_segments(&SegmentFilter {
                active_only: true,
                limit: 2,
                ..Default::default()
            })
            .await;
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
    }
}
