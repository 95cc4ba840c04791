// tests/ingest_dedup.rs
// Idempotent ingestion: re-fetching content that is already stored must
// not create duplicate rows, so retries and overlapping schedule windows
// are safe.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use trendscope::ingest::persist_items;
use trendscope::ingest::types::FetchedItem;
use trendscope::model::{ContentRecord, Watch};
use trendscope::nlp::LexiconTagger;
use trendscope::store::{MemStore, Store};

fn watch() -> Watch {
    Watch {
        id: Uuid::new_v4(),
        name: "launch".into(),
        keywords: vec!["launch".into()],
        platforms: vec!["reddit".into()],
        active: true,
    }
}

fn item(key: &str) -> FetchedItem {
    FetchedItem {
        natural_key: key.to_string(),
        text: format!("post {key} about the big launch"),
        author: Some("u/someone".into()),
        url: None,
        published_at: Utc::now() - Duration::hours(1),
        location: None,
        age_range: None,
        gender: None,
    }
}

fn existing(watch: &Watch, key: &str) -> ContentRecord {
    ContentRecord {
        watch_id: watch.id,
        source: "reddit".into(),
        natural_key: key.to_string(),
        text: "already here".into(),
        author: None,
        url: None,
        published_at: Utc::now() - Duration::hours(2),
        location: None,
        age_range: None,
        gender: None,
        tags: None,
    }
}

#[tokio::test]
async fn ten_fetched_three_present_saves_exactly_seven() {
    let store = Arc::new(MemStore::new());
    let tagger = LexiconTagger::new();
    let w = watch();

    for key in ["k0", "k1", "k2"] {
        assert!(store.insert_content_if_absent(existing(&w, key)).await);
    }

    let items: Vec<FetchedItem> = (0..10).map(|i| item(&format!("k{i}"))).collect();
    let summary = persist_items(store.as_ref(), &tagger, &w, "reddit", items).await;

    assert_eq!(summary.found, 10);
    assert_eq!(summary.saved, 7);
    assert_eq!(store.content_count(), 10);
}

#[tokio::test]
async fn rerunning_the_same_fetch_saves_nothing_new() {
    let store = Arc::new(MemStore::new());
    let tagger = LexiconTagger::new();
    let w = watch();
    let items: Vec<FetchedItem> = (0..5).map(|i| item(&format!("k{i}"))).collect();

    let first = persist_items(store.as_ref(), &tagger, &w, "reddit", items.clone()).await;
    assert_eq!(first.saved, 5);

    let second = persist_items(store.as_ref(), &tagger, &w, "reddit", items).await;
    assert_eq!(second.found, 5);
    assert_eq!(second.saved, 0);
    assert_eq!(store.content_count(), 5);

    // Mentions were extracted once per record, not once per run.
    let mentions = store
        .mentions_between(Utc::now() - Duration::hours(1), Utc::now() + Duration::hours(1))
        .await;
    let per_key = mentions.len();
    assert!(per_key >= 5, "each saved record yields at least one mention");
}

#[tokio::test]
async fn same_natural_key_on_different_sources_is_not_a_duplicate() {
    let store = Arc::new(MemStore::new());
    let tagger = LexiconTagger::new();
    let w = watch();

    persist_items(store.as_ref(), &tagger, &w, "reddit", vec![item("shared")]).await;
    let summary = persist_items(store.as_ref(), &tagger, &w, "youtube", vec![item("shared")]).await;

    assert_eq!(summary.saved, 1);
    assert_eq!(store.content_count(), 2);
}
