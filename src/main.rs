//! trendscope — Binary Entrypoint
//! Loads settings, wires the pipeline services, spawns the stage
//! scheduler, and serves the HTTP API.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trendscope::api::{self, AppState};
use trendscope::config::Settings;
use trendscope::ingest::types::{FixtureProvider, SourceProvider};
use trendscope::metrics::Metrics;
use trendscope::nlp::LexiconTagger;
use trendscope::scheduler;
use trendscope::store::{MemStore, Store};
use trendscope::validate::{HttpTrendSignal, TrendSignal};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trendscope=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Arc::new(Settings::load().context("loading settings")?);
    let metrics = Metrics::init();

    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let watches = settings.seed_watches();
    for w in &watches {
        store.upsert_watch(w.clone()).await;
    }
    tracing::info!(watches = watches.len(), "watch configs seeded");

    // One provider per platform any watch references. Real platform
    // clients implement `SourceProvider` and register here; the stubs
    // keep the pipeline running end to end without credentials.
    let mut providers: HashMap<String, Arc<dyn SourceProvider>> = HashMap::new();
    for w in &watches {
        for platform in &w.platforms {
            providers
                .entry(platform.clone())
                .or_insert_with(|| Arc::new(FixtureProvider::empty(platform.clone())));
        }
    }

    let signal: Option<Arc<dyn TrendSignal>> = if settings.signal_url.is_empty() {
        None
    } else {
        Some(Arc::new(HttpTrendSignal::new(settings.signal_url.clone())))
    };

    let state = AppState::new(
        Arc::clone(&settings),
        store,
        Arc::new(LexiconTagger::new()),
        providers,
        signal,
    );

    let _stages = scheduler::spawn_stages(state.clone());

    let app = api::router(state).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    tracing::info!(addr = %settings.bind_addr, "trendscope listening");
    axum::serve(listener, app).await.context("serving http")?;
    Ok(())
}
