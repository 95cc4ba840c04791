// src/analyze/mod.rs
//! Windowed trend analytics: group tagged mentions into demographic
//! segments, compare against the previous window, classify trending.
//!
//! The pass is append-only and idempotent: segments are keyed on the full
//! `(window_start, topic, source, location, age_range, gender)` tuple and
//! inserted with skip-if-exists semantics, so re-running a pass over the
//! same window never double-counts and never rewrites history.

pub mod aggregate;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::model::{demographic_or_unknown, SegmentKey, TopicMention, TopicSegment};
use crate::store::Store;

const MAX_SEGMENT_KEYWORDS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct AnalyticsCfg {
    pub window: Duration,
    pub min_mentions: u64,
    pub growth_threshold: f64,
}

impl From<&Settings> for AnalyticsCfg {
    fn from(s: &Settings) -> Self {
        Self {
            window: s.window(),
            min_mentions: s.min_mentions,
            growth_threshold: s.growth_threshold,
        }
    }
}

/// Floor `now` to the start of its window. Window boundaries are fixed by
/// wall-clock time so two passes over the same period agree on the key.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let w = window.as_secs() as i64;
    let ts = now.timestamp();
    Utc.timestamp_opt(ts - ts.rem_euclid(w), 0).unwrap()
}

/// Period-over-period growth. First appearance counts as 100% growth;
/// an empty prior window with an empty current one is flat.
pub fn growth_rate(volume: u64, prior: u64) -> f64 {
    if prior > 0 {
        (volume as f64 - prior as f64) / prior as f64
    } else if volume > 0 {
        1.0
    } else {
        0.0
    }
}

/// Both conditions must hold. The volume floor keeps low-volume noise
/// from trending on percentage growth alone.
pub fn is_trending(volume: u64, growth: f64, cfg: &AnalyticsCfg) -> bool {
    volume >= cfg.min_mentions && growth >= cfg.growth_threshold
}

/// Grouping key within one window. Demographics are already normalized;
/// `unknown` is a real bucket, never an absent one.
pub type GroupKey = (String, String, String, String, String);

#[derive(Debug, Default, Clone)]
pub struct GroupAcc {
    pub volume: u64,
    pub sentiment_sum: f64,
    pub keywords: Vec<String>,
}

pub fn group_mentions(mentions: &[TopicMention]) -> HashMap<GroupKey, GroupAcc> {
    let mut groups: HashMap<GroupKey, GroupAcc> = HashMap::new();
    for m in mentions {
        let key = (
            m.topic.clone(),
            m.source.clone(),
            demographic_or_unknown(m.location.as_deref()),
            demographic_or_unknown(m.age_range.as_deref()),
            demographic_or_unknown(m.gender.as_deref()),
        );
        let acc = groups.entry(key).or_default();
        acc.volume += 1;
        acc.sentiment_sum += m.sentiment;
        for kw in &m.keywords {
            if !acc.keywords.contains(kw) && acc.keywords.len() < MAX_SEGMENT_KEYWORDS {
                acc.keywords.push(kw.clone());
            }
        }
    }
    groups
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub groups: usize,
    pub segments_created: usize,
    pub trending: usize,
    pub skipped: usize,
}

/// One analytics pass over the window containing `now`. A malformed
/// group is logged and skipped; it never aborts the pass.
pub async fn run_analysis(
    store: &dyn Store,
    cfg: &AnalyticsCfg,
    now: DateTime<Utc>,
) -> AnalysisReport {
    let ws = window_start(now, cfg.window);
    let window = chrono::Duration::from_std(cfg.window).expect("window fits in chrono range");
    let we = ws + window;
    let prior_start = ws - window;

    let mentions = store.mentions_between(ws, we).await;
    let groups = group_mentions(&mentions);
    let mut report = AnalysisReport {
        groups: groups.len(),
        ..Default::default()
    };

    for ((topic, source, location, age_range, gender), acc) in groups {
        let sentiment_avg = acc.sentiment_sum / acc.volume as f64;
        if !sentiment_avg.is_finite() || !(-1.0..=1.0).contains(&sentiment_avg) {
            tracing::warn!(
                topic,
                source,
                sentiment = sentiment_avg,
                "malformed sentiment, skipping group"
            );
            counter!("analysis_groups_skipped_total").increment(1);
            report.skipped += 1;
            continue;
        }

        let prior = store.count_mentions(&topic, &source, prior_start, ws).await;
        let growth = growth_rate(acc.volume, prior);
        let trending = is_trending(acc.volume, growth, cfg);

        let segment = TopicSegment {
            key: SegmentKey {
                window_start: ws,
                topic,
                source,
                location,
                age_range,
                gender,
            },
            volume: acc.volume,
            growth_rate: growth,
            sentiment_avg,
            is_trending: trending,
            alert_sent: false,
            keywords: acc.keywords,
        };

        if store.insert_segment_if_absent(segment).await {
            report.segments_created += 1;
            if trending {
                report.trending += 1;
            }
        }
    }

    counter!("analysis_segments_total").increment(report.segments_created as u64);
    gauge!("analysis_last_run_ts").set(now.timestamp() as f64);
    tracing::info!(
        groups = report.groups,
        created = report.segments_created,
        trending = report.trending,
        skipped = report.skipped,
        window_start = %ws,
        "analysis pass finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use chrono::TimeZone;

    fn cfg() -> AnalyticsCfg {
        AnalyticsCfg {
            window: Duration::from_secs(3600),
            min_mentions: 10,
            growth_threshold: 0.5,
        }
    }

    fn mention(topic: &str, at: DateTime<Utc>) -> TopicMention {
        TopicMention {
            topic: topic.into(),
            source: "reddit".into(),
            location: None,
            age_range: Some("18-24".into()),
            gender: None,
            sentiment: 0.2,
            keywords: vec![topic.into()],
            created_at: at,
        }
    }

    #[test]
    fn growth_rate_matches_contract() {
        assert_eq!(growth_rate(5, 0), 1.0);
        assert_eq!(growth_rate(15, 10), 0.5);
        assert_eq!(growth_rate(0, 10), -1.0);
        assert_eq!(growth_rate(0, 0), 0.0);
    }

    #[test]
    fn trending_needs_both_volume_and_growth() {
        let c = cfg();
        assert!(is_trending(12, 0.6, &c));
        // Volume floor not met, however explosive the growth.
        assert!(!is_trending(5, 5.0, &c));
        // Growth floor not met, however large the volume.
        assert!(!is_trending(100, 0.2, &c));
    }

    #[test]
    fn window_start_floors_to_the_hour() {
        let now = Utc.with_ymd_and_hms(2026, 8, 30, 14, 37, 11).unwrap();
        let ws = window_start(now, Duration::from_secs(3600));
        assert_eq!(ws, Utc.with_ymd_and_hms(2026, 8, 30, 14, 0, 0).unwrap());
    }

    #[test]
    fn grouping_normalizes_missing_demographics() {
        let now = Utc::now();
        let groups = group_mentions(&[mention("ai", now), mention("ai", now)]);
        assert_eq!(groups.len(), 1);
        let ((_, _, loc, age, gender), acc) = groups.into_iter().next().unwrap();
        assert_eq!(loc, "unknown");
        assert_eq!(age, "18-24");
        assert_eq!(gender, "unknown");
        assert_eq!(acc.volume, 2);
    }

    #[tokio::test]
    async fn rerunning_a_pass_is_idempotent() {
        let store = MemStore::new();
        let now = Utc.with_ymd_and_hms(2026, 8, 30, 14, 30, 0).unwrap();
        let in_window = Utc.with_ymd_and_hms(2026, 8, 30, 14, 10, 0).unwrap();
        store
            .insert_mentions((0..12).map(|_| mention("ai", in_window)).collect())
            .await;

        let first = run_analysis(&store, &cfg(), now).await;
        assert_eq!(first.segments_created, 1);
        assert_eq!(first.trending, 1); // prior window empty: growth 1.0

        let second = run_analysis(&store, &cfg(), now).await;
        assert_eq!(second.groups, 1);
        assert_eq!(second.segments_created, 0);
    }

    #[tokio::test]
    async fn prior_window_volume_drives_growth() {
        let store = MemStore::new();
        let prior_at = Utc.with_ymd_and_hms(2026, 8, 30, 13, 30, 0).unwrap();
        let cur_at = Utc.with_ymd_and_hms(2026, 8, 30, 14, 10, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 8, 30, 14, 45, 0).unwrap();

        store
            .insert_mentions((0..10).map(|_| mention("ai", prior_at)).collect())
            .await;
        store
            .insert_mentions((0..15).map(|_| mention("ai", cur_at)).collect())
            .await;

        run_analysis(&store, &cfg(), now).await;
        let (_, segs) = store.list_segments(&Default::default()).await;
        assert_eq!(segs.len(), 1);
        assert!((segs[0].growth_rate - 0.5).abs() < 1e-9);
        assert!(segs[0].is_trending);
    }

    #[tokio::test]
    async fn malformed_sentiment_skips_only_its_group() {
        let store = MemStore::new();
        let at = Utc.with_ymd_and_hms(2026, 8, 30, 14, 10, 0).unwrap();
        let now = at;
        let mut bad = mention("corrupt", at);
        bad.sentiment = f64::NAN;
        store.insert_mentions(vec![bad, mention("fine", at)]).await;

        let report = run_analysis(&store, &cfg(), now).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.segments_created, 1);
        let (_, segs) = store.list_segments(&Default::default()).await;
        assert_eq!(segs[0].key.topic, "fine");
    }
}
