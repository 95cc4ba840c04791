// src/scheduler.rs
// Periodic stage loops. Each stage runs on its own cadence and never
// waits on another; a slow collection sweep does not delay the next
// analysis pass — both just work with whatever is committed when they
// fire. A failed tick is logged; the loop keeps going.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::gauge;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::analyze::{run_analysis, AnalyticsCfg};
use crate::api::AppState;
use crate::config::{Settings, EXTERNAL_SIGNAL};
use crate::ingest;
use crate::validate::{run_validation, ValidationCfg};

fn interval(secs: u64) -> tokio::time::Interval {
    let mut i = tokio::time::interval(Duration::from_secs(secs.max(1)));
    i.set_missed_tick_behavior(MissedTickBehavior::Delay);
    i
}

/// Spawn all stage loops. Handles are returned so a caller that wants a
/// clean shutdown can abort them; the binary just lets them run.
pub fn spawn_stages(state: AppState) -> Vec<JoinHandle<()>> {
    let settings = Arc::clone(&state.ctx.settings);
    let mut handles = Vec::new();

    handles.push(spawn_collection(state.clone(), &settings));
    handles.push(spawn_analysis(state.clone(), &settings));
    if state.signal.is_some() {
        handles.push(spawn_validation(state.clone(), &settings));
    } else {
        tracing::warn!("no external signal configured, validation stage disabled");
    }
    handles.push(spawn_cleanup(state, &settings));
    handles
}

fn spawn_collection(state: AppState, settings: &Settings) -> JoinHandle<()> {
    let mut ticker = interval(settings.collect_interval_secs);
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            let summary = ingest::collect_all(&state.ctx).await;
            gauge!("collect_last_run_ts").set(Utc::now().timestamp() as f64);
            tracing::info!(
                target: "scheduler",
                watches = summary.total_watches,
                deadline_exceeded = summary.deadline_exceeded,
                "collection sweep finished"
            );
        }
    })
}

fn spawn_analysis(state: AppState, settings: &Settings) -> JoinHandle<()> {
    let mut ticker = interval(settings.analyze_interval_secs);
    let cfg = AnalyticsCfg::from(settings);
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            let report = run_analysis(state.ctx.store.as_ref(), &cfg, Utc::now()).await;
            tracing::info!(
                target: "scheduler",
                segments = report.segments_created,
                trending = report.trending,
                "analysis tick finished"
            );
        }
    })
}

fn spawn_validation(state: AppState, settings: &Settings) -> JoinHandle<()> {
    let mut ticker = interval(settings.validate_interval_secs);
    let cfg = ValidationCfg::from(settings);
    let rl_cfg = settings.rate_limit_for(EXTERNAL_SIGNAL);
    let interest_window = settings.validation_window.clone();
    tokio::spawn(async move {
        let signal = match &state.signal {
            Some(s) => Arc::clone(s),
            None => return,
        };
        let limiter = match state.ctx.limiters.limiter(
            EXTERNAL_SIGNAL,
            rl_cfg.capacity,
            Duration::from_secs(rl_cfg.period_secs),
        ) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, "validation stage cannot start");
                return;
            }
        };
        loop {
            ticker.tick().await;
            let report = run_validation(
                state.ctx.store.as_ref(),
                signal.as_ref(),
                Arc::clone(&limiter),
                &cfg,
                &interest_window,
            )
            .await;
            tracing::info!(
                target: "scheduler",
                examined = report.examined,
                written = report.written,
                skipped = report.skipped,
                "validation tick finished"
            );
        }
    })
}

fn spawn_cleanup(state: AppState, settings: &Settings) -> JoinHandle<()> {
    let mut ticker = interval(settings.cleanup_interval_secs);
    let retention = chrono::Duration::days(i64::from(settings.retention_days));
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - retention;
            let stats = state.ctx.store.purge_before(cutoff).await;
            tracing::info!(
                target: "scheduler",
                content = stats.content_removed,
                segments = stats.segments_removed,
                detached = stats.validations_detached,
                "retention cleanup finished"
            );
        }
    })
}
