//! Error handling tests for the course store.

use course_store::{
    Category, CourseChanges, CourseId, MemoryTransport, Method, Reply, RetryPolicy, Store,
    StoreConfig, StoreError, StoreState, Transport,
};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn catalog() -> Value {
    json!({"payload": {
        "1": {"id": 1, "category": "BEGINNER", "description": "Angular Core Deep Dive"},
        "2": {"id": 2, "category": "ADVANCED", "description": "RxJs In Practice"}
    }})
}

fn test_store(config: StoreConfig) -> (Arc<MemoryTransport>, Store) {
    let memory = Arc::new(MemoryTransport::new());
    memory.route(Method::Get, "/api/courses", Reply::json(catalog()));
    memory.route(Method::Put, "/api/courses/1", Reply::status(200));
    let store = Store::new(Arc::clone(&memory) as Arc<dyn Transport>, config);
    (memory, store)
}

async fn wait_initialized(store: &Store) {
    let mut courses = store.collection().attach();
    while let Some(Ok(_)) = courses.next().await {
        if store.state() == StoreState::Initialized {
            return;
        }
    }
}

async fn initialized_store() -> (Arc<MemoryTransport>, Store) {
    let (memory, store) = test_store(StoreConfig::default());
    store.init();
    wait_initialized(&store).await;
    (memory, store)
}

// --- Save Errors ---

#[tokio::test(start_paused = true)]
async fn test_save_unknown_course() {
    let (memory, store) = initialized_store().await;
    let mut courses = store.collection().attach();
    courses.drain_ready();

    let result = store.save(CourseId(99), &CourseChanges::new().description("X"));
    assert_eq!(result.err(), Some(StoreError::NotFound(CourseId(99))));

    // Nothing new published, nothing sent
    assert_eq!(courses.try_next(), None);
    assert!(!courses.is_terminated());
    assert_eq!(memory.request_count(Method::Put, "/api/courses/99"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_save_before_init_is_not_found() {
    let (_memory, store) = test_store(StoreConfig::default());

    let result = store.save(CourseId(1), &CourseChanges::new().description("X"));
    assert!(matches!(result, Err(StoreError::NotFound(CourseId(1)))));
}

#[tokio::test(start_paused = true)]
async fn test_save_rejects_invalid_changes() {
    let (memory, store) = initialized_store().await;
    let before = store.snapshot();

    let renumbered = store.save(CourseId(1), &CourseChanges::new().set("id", 5));
    assert!(matches!(renumbered, Err(StoreError::InvalidChanges(_))));

    let bad_category = store.save(CourseId(1), &CourseChanges::new().set("category", "EXPERT"));
    assert!(matches!(bad_category, Err(StoreError::InvalidChanges(_))));

    assert_eq!(store.snapshot(), before);
    assert_eq!(memory.request_count(Method::Put, "/api/courses/1"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_put_keeps_local_changes() {
    let (memory, store) = initialized_store().await;
    memory.route(Method::Put, "/api/courses/1", Reply::status(500));
    let mut courses = store.collection().attach();
    courses.drain_ready();

    let persisted = store
        .save(CourseId(1), &CourseChanges::new().description("X"))
        .unwrap();

    let result = persisted.attach().completion().await;
    assert_eq!(
        result,
        Err(StoreError::HttpStatus {
            status: 500,
            url: "/api/courses/1".into()
        })
    );

    // No rollback, and the failure never reaches the collection
    assert_eq!(store.snapshot().get(CourseId(1)).unwrap().description, "X");
    let emitted = courses.drain_ready();
    assert_eq!(emitted.len(), 1);
    assert!(emitted[0].is_ok());
    assert!(!courses.is_terminated());
}

#[tokio::test(start_paused = true)]
async fn test_put_failure_replayed_to_late_observers() {
    let (memory, store) = initialized_store().await;
    memory.route(Method::Put, "/api/courses/1", Reply::transport_error("connection reset"));

    let persisted = store
        .save(CourseId(1), &CourseChanges::new().category(Category::Advanced))
        .unwrap();
    let first = persisted.attach().completion().await;
    assert_eq!(first, Err(StoreError::Transport("connection reset".into())));

    let late = persisted.attach().completion().await;
    assert_eq!(late, first);
    assert_eq!(memory.request_count(Method::Put, "/api/courses/1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_put_sent_without_observer() {
    let (memory, store) = initialized_store().await;

    drop(store.save(CourseId(1), &CourseChanges::new().description("X")).unwrap());
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(memory.request_count(Method::Put, "/api/courses/1"), 1);
    assert_eq!(memory.completed(), 2);
}

// --- Fetch Errors ---

#[tokio::test(start_paused = true)]
async fn test_fetch_failures_retried_silently() {
    let config = StoreConfig {
        retry: RetryPolicy::fixed(Duration::from_secs(2)),
        ..Default::default()
    };
    let (memory, store) = test_store(config);
    memory.script(
        Method::Get,
        "/api/courses",
        [
            Reply::status(500),
            Reply::transport_error("offline"),
            Reply::raw(200, b"<html>".to_vec()),
        ],
    );

    let start = Instant::now();
    let mut courses = store.collection().attach();
    assert!(courses.try_next().unwrap().unwrap().is_empty());

    store.init();
    let loaded = courses.next().await.unwrap().unwrap();
    assert_eq!(loaded.len(), 2);
    assert!(start.elapsed() >= Duration::from_secs(6));
    assert_eq!(memory.request_count(Method::Get, "/api/courses"), 4);
    assert_eq!(store.state(), StoreState::Initialized);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_retry_gives_up_quietly() {
    let config = StoreConfig {
        retry: RetryPolicy::fixed(Duration::from_secs(1)).with_max_retries(2),
        ..Default::default()
    };
    let (memory, store) = test_store(config);
    memory.route(Method::Get, "/api/courses", Reply::status(503));

    let mut courses = store.collection().attach();
    courses.drain_ready();

    assert!(store.init());
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(memory.request_count(Method::Get, "/api/courses"), 3);
    assert_eq!(store.state(), StoreState::Uninitialized);
    assert_eq!(courses.try_next(), None);
    assert!(!courses.is_terminated());

    // The loader finished without initializing, so init may run again
    memory.route(Method::Get, "/api/courses", Reply::json(catalog()));
    assert!(store.init());
    assert_eq!(courses.next().await.unwrap().unwrap().len(), 2);
    assert_eq!(store.state(), StoreState::Initialized);
}

// --- Error Values ---

#[test]
fn test_error_messages() {
    let status = StoreError::HttpStatus {
        status: 404,
        url: "/api/courses/3".into(),
    };
    assert!(status.to_string().contains("Request failed with status code: 404"));
    assert_eq!(status.status(), Some(404));

    let not_found = StoreError::NotFound(CourseId(3));
    assert!(not_found.to_string().contains('3'));
    assert_eq!(not_found.status(), None);

    let exhausted = StoreError::RetriesExhausted {
        attempts: 3,
        last: Box::new(status),
    };
    assert!(exhausted.to_string().contains("404"));
}

#[test]
fn test_serde_errors_convert() {
    let error: StoreError = serde_json::from_str::<Value>("{").unwrap_err().into();
    assert!(matches!(error, StoreError::Serialization(_)));
}
