use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Initialize the Prometheus recorder and register every series the
    /// pipeline emits, so they all show up on /metrics from the start.
    pub fn init() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("prometheus: install recorder");
        describe_all();
        Self { handle }
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time registration; callable from tests without a recorder.
pub fn describe_all() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_found_total", "Items returned by source fetches.");
        describe_counter!("ingest_saved_total", "New content rows written after dedup.");
        describe_counter!(
            "ingest_duplicates_total",
            "Fetched items dropped because their natural key already existed."
        );
        describe_counter!("tasks_retries_total", "Transient task failures that were retried.");
        describe_counter!("tasks_failed_total", "Tasks that exhausted retries or hit fatal errors.");
        describe_counter!("tasks_batch_timeouts_total", "Fan-out batches that blew their deadline.");
        describe_counter!("analysis_segments_total", "Topic segments written by analysis passes.");
        describe_counter!(
            "analysis_groups_skipped_total",
            "Groups dropped from an analysis pass for malformed data."
        );
        describe_counter!("validations_written_total", "Trend validations recorded.");
        describe_counter!(
            "validation_platform_only_total",
            "Trends confirmed internally but absent from the external signal."
        );
        describe_gauge!("analysis_last_run_ts", "Unix ts of the last analysis pass.");
        describe_gauge!("validation_last_run_ts", "Unix ts of the last validation pass.");
        describe_gauge!("collect_last_run_ts", "Unix ts of the last collection sweep.");
    });
}
