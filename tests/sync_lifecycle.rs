//! Integration tests for the sync lifecycle: download, persist, index, diff.
//!
//! Each test runs a wiremock provider and an in-memory SQLite database, and
//! drives everything through `CatalogEngine` the way the CLI does.

use std::sync::Arc;
use std::time::Duration;

use catalog_sync::navigation::ContentFilterSettings;
use catalog_sync::storage::{ContentType, Database};
use catalog_sync::sync::SyncPhase;
use catalog_sync::util::validate_catalog_url;
use catalog_sync::{CatalogEngine, ContentDiff, EngineOptions, HttpCatalogClient, SyncState, TriggerOutcome};
use secrecy::SecretString;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LIVE_CATALOG: &str = r#"{
    "categories": [
        {"category_id": "1", "category_name": "EN | News", "parent_id": 0},
        {"category_id": "2", "category_name": "EN | Sports", "parent_id": 0},
        {"category_id": "3", "category_name": "FR | Cinema", "parent_id": 0}
    ],
    "items": [
        {"stream_id": 101, "name": "BBC News", "category_id": "1", "num": 1},
        {"stream_id": 102, "name": "Sky News", "category_id": "1", "num": 2},
        {"stream_id": 201, "name": "Eurosport", "category_id": "2", "num": 3},
        {"stream_id": 301, "name": "Canal+ Cinema", "category_id": "3", "num": 4}
    ]
}"#;

fn client_for(server: &MockServer) -> HttpCatalogClient {
    let base = validate_catalog_url(&format!("{}/api", server.uri())).unwrap();
    HttpCatalogClient::new(reqwest::Client::new(), base)
        .with_api_token(Some(SecretString::from("secret-token")))
        .with_retry_delay(Duration::from_millis(1))
}

fn options() -> EngineOptions {
    let mut options = EngineOptions {
        batch_size: 2,
        ..Default::default()
    };
    for ct in ContentType::ALL {
        options.default_filters.insert(
            ct,
            ContentFilterSettings {
                separator: "|".to_string(),
                ..Default::default()
            },
        );
    }
    options
}

async fn start_engine(server: &MockServer) -> (CatalogEngine, Database) {
    let db = Database::open(":memory:").await.unwrap();
    let engine = CatalogEngine::new(db.clone(), Arc::new(client_for(server)), options())
        .await
        .unwrap();
    (engine, db)
}

async fn sync_now(engine: &CatalogEngine, ct: ContentType) -> SyncState {
    assert_eq!(engine.trigger_sync(ct, true).await, TriggerOutcome::Started);
    engine.wait_for_sync(ct).await;
    let state = engine.observe_sync_state(ct).borrow().clone();
    state
}

// ============================================================================
// Successful Sync
// ============================================================================

#[tokio::test]
async fn test_http_sync_populates_store_and_tree() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/live"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LIVE_CATALOG))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, db) = start_engine(&server).await;
    let state = sync_now(&engine, ContentType::Live).await;
    assert!(matches!(state, SyncState::Success { item_count: 4, .. }));
    assert_eq!(state.overall_progress(), Some(100.0));

    let tree = engine.get_navigation_tree(ContentType::Live).await.unwrap();
    let groups: Vec<(&str, usize)> = tree
        .groups
        .iter()
        .map(|g| (g.name.as_str(), g.count()))
        .collect();
    assert_eq!(groups, vec![("EN", 2), ("FR", 1)]);

    let news = tree.group("EN").unwrap().category("EN | News").unwrap();
    assert_eq!(news.item_count, 2);

    let items = engine.list_items(ContentType::Live, "1", None).await.unwrap();
    let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["BBC News", "Sky News"]);

    let meta = db.sync_metadata(ContentType::Live).await.unwrap();
    assert!(meta.has_cached_data());
    assert_eq!(meta.item_count, 4);
    assert_eq!(meta.last_error, None);
}

#[tokio::test]
async fn test_rejected_rows_end_in_partial_success() {
    let server = MockServer::start().await;
    let body = r#"{
        "categories": [{"category_id": "1", "category_name": "EN | News"}],
        "items": [
            {"stream_id": 1, "name": "Good", "category_id": "1"},
            {"stream_id": -5, "name": "Negative id", "category_id": "1"},
            {"stream_id": 2, "name": "Also good", "category_id": "1"}
        ]
    }"#;
    Mock::given(method("GET"))
        .and(path("/api/movies"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let (engine, db) = start_engine(&server).await;
    match sync_now(&engine, ContentType::Movies).await {
        SyncState::PartialSuccess {
            success_count,
            failed_count,
            ..
        } => {
            assert_eq!(success_count, 2);
            assert_eq!(failed_count, 1);
        }
        other => panic!("expected PartialSuccess, got {:?}", other),
    }
    assert_eq!(db.item_count(ContentType::Movies).await.unwrap(), 2);

    // The stored rows are indexed and navigable.
    let tree = engine.get_navigation_tree(ContentType::Movies).await.unwrap();
    assert_eq!(tree.categories().map(|c| c.item_count).sum::<u64>(), 2);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_first_sync_failure_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/series"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (engine, db) = start_engine(&server).await;
    let state = sync_now(&engine, ContentType::Series).await;

    assert!(matches!(
        state,
        SyncState::Error {
            phase: SyncPhase::Fetching,
            has_cached_data: false,
            ..
        }
    ));
    let message = state.surfaced_error().unwrap();
    assert!(message.contains("fetching"));

    let meta = db.sync_metadata(ContentType::Series).await.unwrap();
    assert!(meta.last_error.is_some());
}

#[tokio::test]
async fn test_failure_with_cache_keeps_previous_catalog() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/live"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LIVE_CATALOG))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/live"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"items\": [oops"))
        .mount(&server)
        .await;

    let (engine, db) = start_engine(&server).await;
    assert!(matches!(
        sync_now(&engine, ContentType::Live).await,
        SyncState::Success { .. }
    ));
    let before = engine.get_navigation_tree(ContentType::Live).await.unwrap();

    let state = sync_now(&engine, ContentType::Live).await;
    assert!(matches!(
        state,
        SyncState::Error {
            phase: SyncPhase::Parsing,
            has_cached_data: true,
            ..
        }
    ));
    assert_eq!(state.surfaced_error(), None);

    let after = engine.get_navigation_tree(ContentType::Live).await.unwrap();
    assert_eq!(*after, *before);
    assert_eq!(db.item_count(ContentType::Live).await.unwrap(), 4);
}

// ============================================================================
// Diffs
// ============================================================================

#[tokio::test]
async fn test_resync_emits_item_count_changes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/live"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LIVE_CATALOG))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let grown = r#"{
        "categories": [
            {"category_id": "1", "category_name": "EN | News"},
            {"category_id": "2", "category_name": "EN | Sports"},
            {"category_id": "3", "category_name": "FR | Cinema"}
        ],
        "items": [
            {"stream_id": 101, "name": "BBC News", "category_id": "1"},
            {"stream_id": 102, "name": "Sky News", "category_id": "1"},
            {"stream_id": 103, "name": "CNN", "category_id": "1"},
            {"stream_id": 301, "name": "Canal+ Cinema", "category_id": "3"}
        ]
    }"#;
    Mock::given(method("GET"))
        .and(path("/api/live"))
        .respond_with(ResponseTemplate::new(200).set_body_string(grown))
        .mount(&server)
        .await;

    let (engine, _db) = start_engine(&server).await;
    sync_now(&engine, ContentType::Live).await;

    let mut diffs = engine.subscribe_content_diffs();
    sync_now(&engine, ContentType::Live).await;

    assert_eq!(
        diffs.recv().await.unwrap(),
        vec![
            ContentDiff::ItemsAddedToCategory {
                content_type: ContentType::Live,
                category_id: "1".into(),
                delta: 1
            },
            ContentDiff::ItemsRemovedFromCategory {
                content_type: ContentType::Live,
                category_id: "2".into(),
                delta: 1
            },
        ]
    );
}

#[tokio::test]
async fn test_unchanged_resync_emits_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/live"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LIVE_CATALOG))
        .mount(&server)
        .await;

    let (engine, _db) = start_engine(&server).await;
    sync_now(&engine, ContentType::Live).await;

    let mut diffs = engine.subscribe_content_diffs();
    sync_now(&engine, ContentType::Live).await;

    let waited = tokio::time::timeout(Duration::from_millis(100), diffs.recv()).await;
    assert!(waited.is_err(), "no diffs expected, got {:?}", waited);
}
