// src/analyze/aggregate.rs
// Read-time projections over flat segment rows: the cross-platform
// top-N rollup and the 4-level demographic tree. Storage stays flat;
// these never touch it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::TopicSegment;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedTopic {
    pub topic: String,
    pub platforms: Vec<String>,
    pub locations: Vec<String>,
    pub total_volume: u64,
    pub avg_growth: f64,
    pub avg_sentiment: f64,
    pub keywords: Vec<String>,
}

/// Roll segments up by topic across platforms: volumes sum, growth and
/// sentiment average, ordering is by summed volume descending, top `n`.
pub fn aggregate_topics(segments: &[TopicSegment], n: usize) -> Vec<AggregatedTopic> {
    #[derive(Default)]
    struct Acc {
        platforms: Vec<String>,
        locations: Vec<String>,
        volume: u64,
        growth_sum: f64,
        sentiment_sum: f64,
        count: u64,
        keywords: Vec<String>,
    }

    // BTreeMap keeps ties in deterministic (alphabetical) order.
    let mut topics: BTreeMap<String, Acc> = BTreeMap::new();
    for seg in segments {
        let acc = topics.entry(seg.key.topic.clone()).or_default();
        if !acc.platforms.contains(&seg.key.source) {
            acc.platforms.push(seg.key.source.clone());
        }
        if !acc.locations.contains(&seg.key.location) {
            acc.locations.push(seg.key.location.clone());
        }
        acc.volume += seg.volume;
        acc.growth_sum += seg.growth_rate;
        acc.sentiment_sum += seg.sentiment_avg;
        acc.count += 1;
        for kw in &seg.keywords {
            if !acc.keywords.contains(kw) {
                acc.keywords.push(kw.clone());
            }
        }
    }

    let mut out: Vec<AggregatedTopic> = topics
        .into_iter()
        .map(|(topic, acc)| AggregatedTopic {
            topic,
            platforms: acc.platforms,
            locations: acc.locations,
            total_volume: acc.volume,
            avg_growth: acc.growth_sum / acc.count as f64,
            avg_sentiment: acc.sentiment_sum / acc.count as f64,
            keywords: acc.keywords,
        })
        .collect();
    out.sort_by(|a, b| b.total_volume.cmp(&a.total_volume));
    out.truncate(n);
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicLeaf {
    pub topic: String,
    pub volume: u64,
    pub growth_rate: f64,
    pub sentiment_avg: f64,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenderNode {
    pub gender: String,
    pub topics: Vec<TopicLeaf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgeNode {
    pub age_range: String,
    pub genders: Vec<GenderNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationNode {
    pub location: String,
    pub age_ranges: Vec<AgeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformNode {
    pub source: String,
    pub locations: Vec<LocationNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendTree {
    pub total_segments: usize,
    pub platforms: Vec<PlatformNode>,
}

/// Project flat rows into `source → location → age_range → gender →
/// [topics]`. Built fresh per request; nothing here is shared or cached.
pub fn hierarchy(segments: &[TopicSegment]) -> TrendTree {
    type GenderMap = BTreeMap<String, Vec<TopicLeaf>>;
    type AgeMap = BTreeMap<String, GenderMap>;
    type LocationMap = BTreeMap<String, AgeMap>;
    let mut tree: BTreeMap<String, LocationMap> = BTreeMap::new();

    for seg in segments {
        tree.entry(seg.key.source.clone())
            .or_default()
            .entry(seg.key.location.clone())
            .or_default()
            .entry(seg.key.age_range.clone())
            .or_default()
            .entry(seg.key.gender.clone())
            .or_default()
            .push(TopicLeaf {
                topic: seg.key.topic.clone(),
                volume: seg.volume,
                growth_rate: seg.growth_rate,
                sentiment_avg: seg.sentiment_avg,
                keywords: seg.keywords.clone(),
            });
    }

    let platforms = tree
        .into_iter()
        .map(|(source, locations)| PlatformNode {
            source,
            locations: locations
                .into_iter()
                .map(|(location, ages)| LocationNode {
                    location,
                    age_ranges: ages
                        .into_iter()
                        .map(|(age_range, genders)| AgeNode {
                            age_range,
                            genders: genders
                                .into_iter()
                                .map(|(gender, mut topics)| {
                                    topics.sort_by(|a, b| b.volume.cmp(&a.volume));
                                    GenderNode { gender, topics }
                                })
                                .collect(),
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect();

    TrendTree {
        total_segments: segments.len(),
        platforms,
    }
}
