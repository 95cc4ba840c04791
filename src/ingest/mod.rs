// src/ingest/mod.rs
// Collection pipeline: fan out one child task per platform, each
// rate-limited and retried, then persist fetched items idempotently and
// extract topic mentions from whatever was actually new. Partial failure
// is the normal case: every source reports its own outcome.

pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::executor::{run_batch, run_with_retry, BatchOutcome, ChildFuture, RetryPolicy, TaskStatus};
use crate::ingest::types::{FetchedItem, SourceProvider};
use crate::model::{ContentRecord, TopicMention, Watch};
use crate::nlp::{topics_for, Tagger};
use crate::ratelimit::RateLimiterRegistry;
use crate::store::Store;

/// Everything a collection run needs. Cheap to clone; all Arcs.
#[derive(Clone)]
pub struct CollectCtx {
    pub store: Arc<dyn Store>,
    pub tagger: Arc<dyn Tagger>,
    pub providers: Arc<HashMap<String, Arc<dyn SourceProvider>>>,
    pub limiters: Arc<RateLimiterRegistry>,
    pub settings: Arc<Settings>,
}

/// Per-source result of one collection child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source: String,
    pub found: usize,
    pub saved: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: String,
    pub status: TaskStatus,
    pub found: usize,
    pub saved: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSummary {
    pub watch_id: uuid::Uuid,
    pub watch_name: String,
    pub deadline_exceeded: bool,
    pub sources: Vec<SourceReport>,
}

/// Normalize platform text: decode HTML entities, strip markup, collapse
/// whitespace, cap the length. Mastodon-style sources ship raw HTML.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > 2000 {
        out = out.chars().take(2000).collect();
    }
    out
}

fn to_record(watch: &Watch, source: &str, item: FetchedItem, text: String) -> ContentRecord {
    ContentRecord {
        watch_id: watch.id,
        source: source.to_string(),
        natural_key: item.natural_key,
        text,
        author: item.author,
        url: item.url,
        published_at: item.published_at,
        location: item.location,
        age_range: item.age_range,
        gender: item.gender,
        tags: None,
    }
}

/// Persist one fetch result set. Insert-if-absent on
/// `(source, natural_key)` makes re-runs and overlapping windows safe;
/// tagging and mention extraction happen only for rows actually written,
/// so mentions are never double-counted either.
pub async fn persist_items(
    store: &dyn Store,
    tagger: &dyn Tagger,
    watch: &Watch,
    source: &str,
    items: Vec<FetchedItem>,
) -> SourceSummary {
    let found = items.len();
    let mut saved = 0usize;
    let now = Utc::now();

    for item in items {
        let text = normalize_text(&item.text);
        if text.is_empty() {
            continue;
        }
        let mut record = to_record(watch, source, item, text);
        let tags = tagger.tag(&record.text);
        record.tags = Some(tags.clone());

        if store.insert_content_if_absent(record.clone()).await {
            saved += 1;
            let mentions: Vec<TopicMention> = topics_for(&tags)
                .into_iter()
                .map(|topic| TopicMention {
                    topic,
                    source: source.to_string(),
                    location: record.location.clone(),
                    age_range: record.age_range.clone(),
                    gender: record.gender.clone(),
                    sentiment: tags.sentiment,
                    keywords: tags.keywords.clone(),
                    created_at: now,
                })
                .collect();
            if !mentions.is_empty() {
                store.insert_mentions(mentions).await;
            }
        } else {
            counter!("ingest_duplicates_total").increment(1);
        }
    }

    counter!("ingest_found_total").increment(found as u64);
    counter!("ingest_saved_total").increment(saved as u64);
    tracing::info!(
        source,
        watch = %watch.name,
        found,
        saved,
        "collection finished for source"
    );

    SourceSummary {
        source: source.to_string(),
        found,
        saved,
    }
}

/// One child: acquire the source's token, fetch, persist. The rate-limit
/// wait happens before the external call and consumes no retry; a wait
/// that outlives the deadline is a timeout outcome, not a failure.
async fn collect_source(ctx: CollectCtx, watch: Watch, source: String) -> Result<SourceSummary> {
    let provider = ctx
        .providers
        .get(&source)
        .cloned()
        .ok_or_else(|| PipelineError::config(format!("no provider configured for '{source}'")))?;

    let rl_cfg = ctx.settings.rate_limit_for(&source);
    let limiter = ctx.limiters.limiter(
        &source,
        rl_cfg.capacity,
        Duration::from_secs(rl_cfg.period_secs),
    )?;

    let since = Utc::now() - chrono::Duration::hours(i64::from(ctx.settings.hours_back));
    let limit = ctx.settings.fetch_limit;
    let policy = RetryPolicy::new(ctx.settings.retry_base(), ctx.settings.max_retries);
    let wait_budget = ctx.settings.batch_deadline();
    let label = format!("collect:{}:{}", watch.name, source);

    run_with_retry(&label, policy, |_attempt| {
        let ctx = ctx.clone();
        let watch = watch.clone();
        let provider = Arc::clone(&provider);
        let limiter = Arc::clone(&limiter);
        let source = source.clone();
        async move {
            if !limiter.acquire(Some(wait_budget)).await {
                return Err(PipelineError::Timeout(wait_budget));
            }
            let items = provider.fetch(&watch.keywords, since, limit).await?;
            Ok(persist_items(ctx.store.as_ref(), ctx.tagger.as_ref(), &watch, &source, items).await)
        }
    })
    .await
}

fn watch_summary(watch: &Watch, batch: BatchOutcome<SourceSummary>) -> WatchSummary {
    let mut sources: Vec<SourceReport> = batch
        .outcomes
        .iter()
        .map(|o| match &o.result {
            Ok(s) => SourceReport {
                source: s.source.clone(),
                status: TaskStatus::Succeeded,
                found: s.found,
                saved: s.saved,
                error: None,
            },
            Err(e) => SourceReport {
                source: o.name.clone(),
                status: o.status(),
                found: 0,
                saved: 0,
                error: Some(e.to_string()),
            },
        })
        .collect();
    sources.sort_by(|a, b| a.source.cmp(&b.source));
    WatchSummary {
        watch_id: watch.id,
        watch_name: watch.name.clone(),
        deadline_exceeded: batch.deadline_exceeded,
        sources,
    }
}

/// Collect one watch across all of its platforms concurrently, under the
/// configured batch deadline.
pub async fn collect_watch(ctx: &CollectCtx, watch: &Watch) -> WatchSummary {
    let children: Vec<(String, ChildFuture<SourceSummary>)> = watch
        .platforms
        .iter()
        .map(|platform| {
            let fut: ChildFuture<SourceSummary> = Box::pin(collect_source(
                ctx.clone(),
                watch.clone(),
                platform.clone(),
            ));
            (platform.clone(), fut)
        })
        .collect();

    let batch = run_batch(ctx.settings.batch_deadline(), children).await;
    watch_summary(watch, batch)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectAllSummary {
    pub total_watches: usize,
    pub deadline_exceeded: bool,
    pub watches: Vec<WatchSummary>,
}

/// Collect every active watch, watches fanned out in parallel as well.
pub async fn collect_all(ctx: &CollectCtx) -> CollectAllSummary {
    let watches = ctx.store.watches(true).await;
    let total_watches = watches.len();

    let children: Vec<(String, ChildFuture<WatchSummary>)> = watches
        .into_iter()
        .map(|watch| {
            let ctx = ctx.clone();
            let name = watch.name.clone();
            let fut: ChildFuture<WatchSummary> =
                Box::pin(async move { Ok(collect_watch(&ctx, &watch).await) });
            (name, fut)
        })
        .collect();

    let batch = run_batch(ctx.settings.batch_deadline(), children).await;
    let deadline_exceeded =
        batch.deadline_exceeded || batch.outcomes.iter().any(|o| match &o.result {
            Ok(w) => w.deadline_exceeded,
            Err(_) => false,
        });
    let watches = batch
        .outcomes
        .into_iter()
        .filter_map(|o| o.result.ok())
        .collect();

    CollectAllSummary {
        total_watches,
        deadline_exceeded,
        watches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_markup_and_collapses_whitespace() {
        let s = "  <p>Big&nbsp;news!</p>\n<a href=\"x\">link</a>  ";
        assert_eq!(normalize_text(s), "Big news! link");
    }

    #[test]
    fn normalize_caps_length() {
        let s = "a".repeat(5000);
        assert_eq!(normalize_text(&s).chars().count(), 2000);
    }
}
