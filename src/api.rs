use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::analyze::aggregate::{aggregate_topics, hierarchy, AggregatedTopic, TrendTree};
use crate::config::Settings;
use crate::executor::{TaskRecord, TaskRegistry};
use crate::ingest::{self, types::SourceProvider, CollectCtx};
use crate::model::{SegmentKey, TopicSegment};
use crate::nlp::Tagger;
use crate::ratelimit::RateLimiterRegistry;
use crate::store::{SegmentFilter, Store};
use crate::validate::TrendSignal;

#[derive(Clone)]
pub struct AppState {
    pub ctx: CollectCtx,
    /// None disables the validation stage (no signal configured).
    pub signal: Option<Arc<dyn TrendSignal>>,
    pub tasks: Arc<TaskRegistry>,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<dyn Store>,
        tagger: Arc<dyn Tagger>,
        providers: HashMap<String, Arc<dyn SourceProvider>>,
        signal: Option<Arc<dyn TrendSignal>>,
    ) -> Self {
        Self {
            ctx: CollectCtx {
                store,
                tagger,
                providers: Arc::new(providers),
                limiters: Arc::new(RateLimiterRegistry::new()),
                settings,
            },
            signal,
            tasks: Arc::new(TaskRegistry::new()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/collect/watch/{id}", post(trigger_watch))
        .route("/collect/all", post(trigger_all))
        .route("/tasks/{id}", get(task_status))
        .route("/trends", get(list_trends))
        .route("/trends/aggregated", get(aggregated_trends))
        .route("/trends/hierarchy", get(trend_hierarchy))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct Accepted {
    task_id: Uuid,
    status: &'static str,
    watch_id: Option<Uuid>,
    watch_name: Option<String>,
    platforms: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

fn not_found(msg: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (StatusCode::NOT_FOUND, Json(ApiError { error: msg.into() }))
}

/// Dispatch collection for one watch. Returns immediately with a task
/// handle; completion is observed via `GET /tasks/{id}`.
async fn trigger_watch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Accepted>), (StatusCode, Json<ApiError>)> {
    let watch = state
        .ctx
        .store
        .watch(id)
        .await
        .ok_or_else(|| not_found(format!("watch {id} not found")))?;
    if !watch.active {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: format!("watch '{}' is inactive", watch.name),
            }),
        ));
    }

    let task_id = state.tasks.create(format!("collect:{}", watch.name));
    let (watch_id, watch_name) = (watch.id, watch.name.clone());
    let platforms = watch.platforms.clone();
    let (ctx, tasks) = (state.ctx.clone(), Arc::clone(&state.tasks));
    tokio::spawn(async move {
        tasks.mark_running(task_id);
        let summary = ingest::collect_watch(&ctx, &watch).await;
        let value = serde_json::to_value(&summary).unwrap_or_default();
        if summary.deadline_exceeded {
            tasks.mark_timed_out(task_id, value);
        } else if summary.sources.iter().all(|s| s.error.is_some()) && !summary.sources.is_empty() {
            tasks.mark_failed(task_id, "all sources failed");
        } else {
            tasks.mark_succeeded(task_id, value);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            task_id,
            status: "accepted",
            watch_id: Some(watch_id),
            watch_name: Some(watch_name),
            platforms,
        }),
    ))
}

/// Dispatch collection for every active watch.
async fn trigger_all(State(state): State<AppState>) -> (StatusCode, Json<Accepted>) {
    let task_id = state.tasks.create("collect:all");
    let (ctx, tasks) = (state.ctx.clone(), Arc::clone(&state.tasks));
    tokio::spawn(async move {
        tasks.mark_running(task_id);
        let summary = ingest::collect_all(&ctx).await;
        let value = serde_json::to_value(&summary).unwrap_or_default();
        if summary.deadline_exceeded {
            tasks.mark_timed_out(task_id, value);
        } else {
            tasks.mark_succeeded(task_id, value);
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(Accepted {
            task_id,
            status: "accepted",
            watch_id: None,
            watch_name: None,
            platforms: Vec::new(),
        }),
    )
}

async fn task_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskRecord>, (StatusCode, Json<ApiError>)> {
    state
        .tasks
        .get(id)
        .map(Json)
        .ok_or_else(|| not_found(format!("task {id} not found")))
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct TrendQuery {
    source: Option<String>,
    location: Option<String>,
    active_only: bool,
    hours_back: u32,
    skip: usize,
    limit: usize,
}

impl Default for TrendQuery {
    fn default() -> Self {
        Self {
            source: None,
            location: None,
            active_only: true,
            hours_back: 24,
            skip: 0,
            limit: 50,
        }
    }
}

#[derive(Debug, Serialize)]
struct TrendItem {
    #[serde(flatten)]
    segment: TopicSegment,
    /// Reconciliation verdict, when one exists.
    validated: Option<bool>,
}

#[derive(Debug, Serialize)]
struct TrendListResponse {
    total: usize,
    items: Vec<TrendItem>,
}

fn since_for(hours_back: u32) -> DateTime<Utc> {
    // Clamp to 7 days, same bound the query parameters advertise.
    let hours = hours_back.clamp(1, 168);
    Utc::now() - chrono::Duration::hours(i64::from(hours))
}

async fn list_trends(
    State(state): State<AppState>,
    Query(q): Query<TrendQuery>,
) -> Json<TrendListResponse> {
    let filter = SegmentFilter {
        source: q.source,
        location: q.location,
        active_only: q.active_only,
        since: Some(since_for(q.hours_back)),
        skip: q.skip,
        limit: q.limit.clamp(1, 100),
    };
    let (total, segments) = state.ctx.store.list_segments(&filter).await;

    // Join validations in one sweep rather than per row.
    let validations = state.ctx.store.validations().await;
    let by_key: HashMap<&SegmentKey, bool> = validations
        .iter()
        .filter_map(|v| v.segment_key.as_ref().map(|k| (k, v.validated)))
        .collect();

    let items = segments
        .into_iter()
        .map(|segment| {
            let validated = by_key.get(&segment.key).copied();
            TrendItem { segment, validated }
        })
        .collect();

    Json(TrendListResponse { total, items })
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct AggregateQuery {
    hours_back: u32,
    top_n: usize,
}

impl Default for AggregateQuery {
    fn default() -> Self {
        Self {
            hours_back: 24,
            top_n: 10,
        }
    }
}

async fn trending_since(state: &AppState, hours_back: u32) -> Vec<TopicSegment> {
    let filter = SegmentFilter {
        active_only: true,
        since: Some(since_for(hours_back)),
        ..Default::default()
    };
    state.ctx.store.list_segments(&filter).await.1
}

async fn aggregated_trends(
    State(state): State<AppState>,
    Query(q): Query<AggregateQuery>,
) -> Json<Vec<AggregatedTopic>> {
    let segments = trending_since(&state, q.hours_back).await;
    Json(aggregate_topics(&segments, q.top_n.clamp(1, 50)))
}

async fn trend_hierarchy(
    State(state): State<AppState>,
    Query(q): Query<AggregateQuery>,
) -> Json<TrendTree> {
    let segments = trending_since(&state, q.hours_back).await;
    Json(hierarchy(&segments))
}
