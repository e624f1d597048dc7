//! Integration tests for the sync engine.

use offsync_engine::{
    Completion, Dispatched, Method, MockReply, MockTransport, RetryConfig, StatePersistence,
    SyncConfig, SyncEngine, SyncEvent, WarmUpOutcome, WriteMethod, QUEUE_CORRUPT_PREFIX,
    QUEUE_KEY,
};
use offsync_storage::{FileStore, InMemoryStore, KvStore};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;

const WAIT: Duration = Duration::from_secs(5);

fn config() -> SyncConfig {
    SyncConfig::new()
        .with_retry(RetryConfig::no_backoff())
        .with_essential_resources(Vec::<String>::new())
        .with_refresh_on_reconnect(false)
}

fn open(
    config: SyncConfig,
    transport: &Arc<MockTransport>,
    store: Arc<dyn KvStore>,
) -> SyncEngine<Arc<MockTransport>> {
    SyncEngine::open(config, Arc::clone(transport), store)
}

/// Collects events until one matches `done`, returning everything seen.
async fn events_until<F>(events: &mut broadcast::Receiver<SyncEvent>, mut done: F) -> Vec<SyncEvent>
where
    F: FnMut(&SyncEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        let mut seen = Vec::new();
        loop {
            match events.recv().await {
                Ok(event) => {
                    let finished = done(&event);
                    seen.push(event);
                    if finished {
                        return seen;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn is_drained(event: &SyncEvent) -> bool {
    matches!(event, SyncEvent::Drained { .. })
}

fn posted(transport: &MockTransport) -> Vec<String> {
    transport
        .call_log()
        .into_iter()
        .filter(|(method, _)| *method == Method::Post)
        .map(|(_, target)| target)
        .collect()
}

#[tokio::test]
async fn queue_is_fifo_with_head_retry() {
    let transport = Arc::new(MockTransport::new());
    transport.push_reply(Method::Post, "/a", MockReply::fail("connection reset"));
    for target in ["/a", "/b", "/c"] {
        transport.set_reply(Method::Post, target, MockReply::status(201, json!({})));
    }
    let engine = open(
        config().with_start_online(false),
        &transport,
        Arc::new(InMemoryStore::new()),
    );

    let mut handles = Vec::new();
    for target in ["/a", "/b", "/c"] {
        let dispatched = engine
            .dispatch(Method::Post, target, Some(json!({"target": target})))
            .await
            .unwrap();
        assert_eq!(dispatched.status(), 202);
        handles.push(dispatched.into_accepted().unwrap());
    }
    assert_eq!(engine.pending().len(), 3);
    assert_eq!(transport.call_count(), 0);

    let mut events = engine.subscribe();
    assert!(engine.set_online(true, true));
    events_until(&mut events, is_drained).await;

    assert_eq!(posted(&transport), ["/a", "/a", "/b", "/c"]);
    assert!(engine.pending().is_empty());
    assert!(engine.state().last_synced_at.is_some());

    for handle in handles {
        let id = handle.id();
        assert_eq!(
            handle.completion().await,
            Some(Completion::Completed { id, status: 201 })
        );
    }
}

#[tokio::test]
async fn retry_exhaustion_drops_and_reports_once() {
    let transport = Arc::new(MockTransport::new());
    transport.set_reply(Method::Put, "/items/1", MockReply::fail("connection refused"));
    let engine = open(
        config().with_start_online(false),
        &transport,
        Arc::new(InMemoryStore::new()),
    );

    let accepted = engine
        .enqueue(WriteMethod::Put, "/items/1", Some(json!({"name": "x"})))
        .unwrap();
    let id = accepted.id();

    let mut events = engine.subscribe();
    engine.set_online(true, false);
    let seen = events_until(&mut events, is_drained).await;

    let failures: Vec<&SyncEvent> = seen
        .iter()
        .filter(|event| matches!(event, SyncEvent::Operation(Completion::Failed { .. })))
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(engine.pending().is_empty());
    assert_eq!(transport.call_count(), 3);

    match accepted.completion().await {
        Some(Completion::Failed {
            id: failed,
            attempts,
            ..
        }) => {
            assert_eq!(failed, id);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn cache_read_through_serves_offline() {
    let transport = Arc::new(MockTransport::new());
    transport.set_reply(Method::Get, "/r", MockReply::status(200, json!({"v": 1})));
    let engine = open(config(), &transport, Arc::new(InMemoryStore::new()));

    let first = engine.get("/r").await.unwrap();
    assert!(matches!(first, Dispatched::Live(_)));

    engine.set_online(false, false);
    let second = engine.get("/r").await.unwrap();
    assert!(matches!(second, Dispatched::Cached(_)));
    assert_eq!(second.status(), 200);
    assert_eq!(second.response().body, first.response().body);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn cache_identity_ignores_transient_params() {
    let transport = Arc::new(MockTransport::new());
    transport.set_reply(
        Method::Get,
        "/items?page=2&_=1700000000",
        MockReply::status(200, json!(["a"])),
    );
    let engine = open(config(), &transport, Arc::new(InMemoryStore::new()));

    engine.get("/items?page=2&_=1700000000").await.unwrap();
    engine.set_online(false, false);

    assert!(matches!(
        engine.get("/items?_=1&page=2").await.unwrap(),
        Dispatched::Cached(_)
    ));
    assert!(matches!(
        engine.get("/items?page=3").await.unwrap(),
        Dispatched::Unavailable
    ));
}

#[tokio::test]
async fn url_valued_query_does_not_alias_another_resource() {
    let login = "/login?next=https://shop.example/items";
    let transport = Arc::new(MockTransport::new());
    transport.set_reply(Method::Get, "/items", MockReply::status(200, json!({"items": [1]})));
    transport.set_reply(Method::Post, login, MockReply::status(200, json!({})));
    let engine = open(config(), &transport, Arc::new(InMemoryStore::new()));

    engine.get("/items").await.unwrap();
    let signed_in = engine.dispatch(Method::Post, login, None).await.unwrap();
    assert_eq!(signed_in.status(), 200);
    assert_eq!(engine.cache().len(), 1);

    engine.set_online(false, false);
    assert!(matches!(
        engine.get(login).await.unwrap(),
        Dispatched::Unavailable
    ));
    assert!(matches!(
        engine.get("/items").await.unwrap(),
        Dispatched::Cached(_)
    ));
}

#[tokio::test]
async fn successful_write_invalidates_collection() {
    let transport = Arc::new(MockTransport::new());
    transport.set_reply(Method::Get, "/items/1", MockReply::status(200, json!({"id": 1})));
    transport.set_reply(Method::Get, "/items/2", MockReply::status(200, json!({"id": 2})));
    transport.set_reply(Method::Get, "/other", MockReply::status(200, json!({})));
    transport.set_reply(Method::Post, "/items", MockReply::status(201, json!({"id": 3})));
    let engine = open(config(), &transport, Arc::new(InMemoryStore::new()));

    engine.get("/items/1").await.unwrap();
    engine.get("/items/2").await.unwrap();
    engine.get("/other").await.unwrap();
    assert_eq!(engine.cache().len(), 3);

    let mut events = engine.subscribe();
    let created = engine
        .dispatch(Method::Post, "/items", Some(json!({"name": "new"})))
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    assert_eq!(engine.cache().len(), 1);

    match events.try_recv().unwrap() {
        SyncEvent::Invalidated { scope, evicted } => {
            assert_eq!(scope.to_string(), "/items");
            assert_eq!(evicted, 2);
        }
        other => panic!("expected invalidation, got {other:?}"),
    }

    engine.set_online(false, false);
    for target in ["/items/1", "/items/2"] {
        let dispatched = engine.get(target).await.unwrap();
        assert_eq!(dispatched.status(), 503);
        assert!(dispatched.response().is_offline_sentinel());
    }
}

#[tokio::test]
async fn concurrent_warm_up_runs_once() {
    let transport = Arc::new(MockTransport::new());
    transport.set_delay(Some(Duration::from_millis(20)));
    transport.set_reply(Method::Get, "/api/a", MockReply::status(200, json!({"a": 1})));
    transport.set_reply(Method::Get, "/api/b", MockReply::status(200, json!({"b": 2})));
    let store: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
    let engine = open(
        config().with_essential_resources(["/api/a", "/api/b"]),
        &transport,
        Arc::clone(&store),
    );

    let (first, second) = tokio::join!(engine.warm_up(), engine.warm_up());

    let report = match (first, second) {
        (WarmUpOutcome::Completed(report), WarmUpOutcome::AlreadyRunning)
        | (WarmUpOutcome::AlreadyRunning, WarmUpOutcome::Completed(report)) => report,
        other => panic!("expected exactly one warm-up, got {other:?}"),
    };
    assert_eq!(report.fetched, 2);
    assert_eq!(transport.call_count(), 2);
    assert_eq!(engine.cache().len(), 2);
    assert_eq!(engine.last_warm_up(), Some(report.completed_at));
    assert_eq!(
        StatePersistence::new(store).last_warm_up(),
        Some(report.completed_at)
    );
}

#[tokio::test]
async fn repeated_offline_report_warms_up_once() {
    let transport = Arc::new(MockTransport::new());
    transport.set_reply(Method::Get, "/api/a", MockReply::status(200, json!({})));
    let engine = open(
        config().with_essential_resources(["/api/a"]),
        &transport,
        Arc::new(InMemoryStore::new()),
    );

    let transitions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&transitions);
    engine.on_transition(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut events = engine.subscribe();
    assert!(engine.set_online(false, true));
    assert!(!engine.set_online(false, true));

    events_until(&mut events, |event| matches!(event, SyncEvent::WarmUp(_))).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let extra_warm_ups = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|event| matches!(event, SyncEvent::WarmUp(_)))
        .count();
    assert_eq!(extra_warm_ups, 0);
    assert_eq!(transport.call_count(), 1);
    assert_eq!(transitions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reconnect_refreshes_cache_after_drain() {
    let transport = Arc::new(MockTransport::new());
    transport.set_reply(Method::Get, "/api/a", MockReply::status(200, json!({"fresh": true})));
    transport.set_reply(Method::Delete, "/api/a/1", MockReply::status(204, json!(null)));
    let engine = open(
        config()
            .with_start_online(false)
            .with_essential_resources(["/api/a"])
            .with_refresh_on_reconnect(true),
        &transport,
        Arc::new(InMemoryStore::new()),
    );

    engine.enqueue(WriteMethod::Delete, "/api/a/1", None).unwrap();
    let mut events = engine.subscribe();
    engine.set_online(true, true);

    events_until(&mut events, |event| matches!(event, SyncEvent::WarmUp(_))).await;
    assert_eq!(
        transport.call_log(),
        vec![
            (Method::Delete, "/api/a/1".to_string()),
            (Method::Get, "/api/a".to_string()),
        ]
    );
    assert_eq!(engine.cache().len(), 1);
}

#[tokio::test]
async fn transport_failure_falls_back_while_online() {
    let transport = Arc::new(MockTransport::new());
    transport.set_reply(Method::Get, "/r", MockReply::status(200, json!({"v": 1})));
    transport.set_reply(Method::Post, "/items", MockReply::status(201, json!({})));
    let engine = open(
        config().with_retry(RetryConfig::new(Duration::from_millis(50)).with_jitter(false)),
        &transport,
        Arc::new(InMemoryStore::new()),
    );

    engine.get("/r").await.unwrap();
    transport.set_connected(false);

    let cached = engine.get("/r").await.unwrap();
    assert!(matches!(cached, Dispatched::Cached(_)));

    let queued = engine
        .dispatch(Method::Post, "/items", Some(json!({"name": "x"})))
        .await
        .unwrap()
        .into_accepted()
        .expect("write should be queued");
    assert!(engine.is_online());
    assert_eq!(engine.pending().len(), 1);

    transport.set_connected(true);
    let completion = tokio::time::timeout(WAIT, queued.completion())
        .await
        .expect("timed out waiting for delivery");
    assert!(completion.unwrap().is_completed());
    assert!(engine.pending().is_empty());
}

#[tokio::test]
async fn queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(MockTransport::new());

    {
        let store: Arc<dyn KvStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let engine = open(config().with_start_online(false), &transport, store);
        engine
            .enqueue(WriteMethod::Post, "/a", Some(json!({"n": 1})))
            .unwrap();
        engine.enqueue(WriteMethod::Patch, "/b/1", None).unwrap();
        engine.close().await.unwrap();
    }

    let store: Arc<dyn KvStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    let engine = open(config().with_start_online(false), &transport, store);
    let pending = engine.pending();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].target, "/a");
    assert_eq!(pending[0].body, Some(json!({"n": 1})));
    assert_eq!(pending[1].method, WriteMethod::Patch);
    assert!(pending.iter().all(|op| op.attempts == 0));
}

#[tokio::test]
async fn restored_queue_drains_when_opened_online() {
    let store: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
    let transport = Arc::new(MockTransport::new());
    transport.set_reply(Method::Post, "/a", MockReply::status(201, json!({})));

    let offline = open(config().with_start_online(false), &transport, Arc::clone(&store));
    offline.enqueue(WriteMethod::Post, "/a", None).unwrap();
    offline.close().await.unwrap();
    drop(offline);

    let engine = open(config(), &transport, store);
    tokio::time::timeout(WAIT, async {
        while !engine.pending().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue was not drained");
    assert_eq!(posted(&transport), ["/a"]);
}

#[tokio::test]
async fn unavailable_store_degrades_to_memory() {
    let store = Arc::new(InMemoryStore::new());
    store.set_available(false);
    let transport = Arc::new(MockTransport::new());
    let engine = open(config().with_start_online(false), &transport, store);

    let accepted = engine.enqueue(WriteMethod::Post, "/a", None).unwrap();
    assert_eq!(engine.pending().len(), 1);
    assert_eq!(engine.pending()[0].id, accepted.id());
}

#[tokio::test]
async fn corrupt_queue_partition_survives_enqueue() {
    let corrupt = br#"[{"target": "/a", "trunc"#;
    let store = Arc::new(InMemoryStore::new());
    store.set(QUEUE_KEY, corrupt).unwrap();
    let transport = Arc::new(MockTransport::new());

    let engine = open(config().with_start_online(false), &transport, store.clone());
    assert!(engine.pending().is_empty());
    engine.enqueue(WriteMethod::Post, "/b", None).unwrap();

    let preserved: Vec<String> = store
        .keys()
        .unwrap()
        .into_iter()
        .filter(|key| key.starts_with(QUEUE_CORRUPT_PREFIX))
        .collect();
    assert_eq!(preserved.len(), 1);
    assert_eq!(store.get(&preserved[0]).unwrap(), Some(corrupt.to_vec()));

    let queued = StatePersistence::new(store).try_load_queue().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].target, "/b");
}

#[tokio::test]
async fn follows_environment_signal() {
    let transport = Arc::new(MockTransport::new());
    let engine = open(config(), &transport, Arc::new(InMemoryStore::new()));
    let mut events = engine.subscribe();

    let (signal, receiver) = watch::channel(true);
    let follower = engine.follow_signal(receiver);

    signal.send(false).unwrap();
    events_until(&mut events, |event| {
        matches!(event, SyncEvent::Connectivity { online: false })
    })
    .await;
    assert!(!engine.is_online());

    signal.send(true).unwrap();
    events_until(&mut events, |event| {
        matches!(event, SyncEvent::Connectivity { online: true })
    })
    .await;
    assert!(engine.is_online());

    drop(signal);
    tokio::time::timeout(WAIT, follower)
        .await
        .expect("follower did not stop")
        .unwrap();
}
