// src/validate.rs
// External-signal reconciliation. For each newly trending segment we ask
// the external interest source about the segment's top keywords and
// record whether the outside world agrees. A trend strong enough to flag
// internally but invisible externally is the gap-analysis signal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::model::{TopicSegment, TrendValidation};
use crate::ratelimit::RateLimiter;
use crate::store::Store;

/// Interest series per keyword on the source's native 0–100 scale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterestSeries {
    pub series: HashMap<String, Vec<f64>>,
}

/// External trend signal (Google-Trends-shaped). One query per segment.
#[async_trait]
pub trait TrendSignal: Send + Sync {
    async fn query_interest(&self, keywords: &[String], window: &str) -> Result<InterestSeries>;
}

/// HTTP implementation of the signal contract: `GET
/// {base}/interest?kw=a,b&window=...` returning `{"series": {...}}`.
pub struct HttpTrendSignal {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTrendSignal {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TrendSignal for HttpTrendSignal {
    async fn query_interest(&self, keywords: &[String], window: &str) -> Result<InterestSeries> {
        let url = format!(
            "{}/interest?kw={}&window={}",
            self.base_url.trim_end_matches('/'),
            keywords.join(","),
            window
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::transient(format!("interest query: {e}")))?;
        if !resp.status().is_success() {
            return Err(PipelineError::transient(format!(
                "interest query returned {}",
                resp.status()
            )));
        }
        resp.json::<InterestSeries>()
            .await
            .map_err(|e| PipelineError::transient(format!("interest body: {e}")))
    }
}

/// Mean normalized interest across every point of every keyword series,
/// mapped from the 0–100 scale into [0, 1]. Empty series mean zero
/// external interest.
pub fn match_index(series: &InterestSeries) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for points in series.series.values() {
        for p in points {
            sum += p;
            n += 1;
        }
    }
    if n == 0 {
        0.0
    } else {
        (sum / n as f64 / 100.0).clamp(0.0, 1.0)
    }
}

/// Build the immutable validation record for one segment.
pub fn reconcile(segment: &TopicSegment, series: InterestSeries, threshold: f64) -> TrendValidation {
    let idx = match_index(&series);
    let validated = idx > threshold;
    let also_external = validated;
    TrendValidation {
        id: Uuid::new_v4(),
        segment_key: Some(segment.key.clone()),
        topic: segment.key.topic.clone(),
        match_index: idx,
        validated,
        also_external,
        platform_only: segment.is_trending && !also_external,
        series: series.series,
        validated_at: Utc::now(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationCfg {
    pub batch_size: usize,
    pub match_threshold: f64,
    pub keyword_limit: usize,
    pub wait_budget: Duration,
}

impl From<&Settings> for ValidationCfg {
    fn from(s: &Settings) -> Self {
        Self {
            batch_size: s.validation_batch_size,
            match_threshold: s.match_threshold,
            keyword_limit: s.validation_keywords,
            wait_budget: s.batch_deadline(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub examined: usize,
    pub written: usize,
    pub skipped: usize,
}

/// One reconciliation pass: a bounded batch of trending segments that
/// have no validation yet. A transient failure on one segment is logged
/// and skipped (it gets retried next pass); a blown rate-limit wait ends
/// the pass early, leaving the rest for later.
pub async fn run_validation(
    store: &dyn Store,
    signal: &dyn TrendSignal,
    limiter: Arc<RateLimiter>,
    cfg: &ValidationCfg,
    interest_window: &str,
) -> ValidationReport {
    let pending = store.trending_unvalidated(cfg.batch_size).await;
    let mut report = ValidationReport {
        examined: pending.len(),
        ..Default::default()
    };

    for segment in pending {
        let mut keywords: Vec<String> = segment
            .keywords
            .iter()
            .take(cfg.keyword_limit)
            .cloned()
            .collect();
        if keywords.is_empty() {
            keywords.push(segment.key.topic.clone());
        }

        if !limiter.acquire(Some(cfg.wait_budget)).await {
            tracing::warn!(
                topic = %segment.key.topic,
                "rate-limit wait exceeded, deferring rest of validation batch"
            );
            break;
        }

        match signal.query_interest(&keywords, interest_window).await {
            Ok(series) => {
                let validation = reconcile(&segment, series, cfg.match_threshold);
                if validation.platform_only {
                    counter!("validation_platform_only_total").increment(1);
                }
                tracing::info!(
                    topic = %segment.key.topic,
                    match_index = validation.match_index,
                    validated = validation.validated,
                    platform_only = validation.platform_only,
                    "segment reconciled"
                );
                store.insert_validation(validation).await;
                report.written += 1;
            }
            Err(e) => {
                tracing::warn!(topic = %segment.key.topic, error = %e, "validation query failed, skipping segment");
                report.skipped += 1;
            }
        }
    }

    counter!("validations_written_total").increment(report.written as u64);
    gauge!("validation_last_run_ts").set(Utc::now().timestamp() as f64);
    report
}
