use axum::http::StatusCode;
use reqwest::Client;
use serde_json::json;
use shared::domain::AuthMode;

use super::*;
use crate::{
    resolver::Resolver,
    session::{MemoryTokenStore, SessionManager},
    test_support::{FakeBackend, Reply},
    timeline::MergePolicy,
};

const FETCH_SHARED: &str = "GET /api/messages/global";
const LIST_USERS: &str = "GET /api/users";

async fn signed_in_scheduler(backend: &FakeBackend, interval: Duration) -> Scheduler {
    backend
        .on("POST /api/login", Reply::ok(json!({ "token": "tok", "username": "alice" })))
        .await;
    backend.on(FETCH_SHARED, Reply::ok(json!([]))).await;
    backend.on(LIST_USERS, Reply::ok(json!([]))).await;

    let (events, _) = broadcast::channel(256);
    let session = Arc::new(SessionManager::new(
        Resolver::new(Client::new(), backend.url.clone()),
        Arc::new(MemoryTokenStore::new()),
        events.clone(),
    ));
    session
        .authenticate("alice", "pw", AuthMode::Login)
        .await
        .expect("login");
    backend.clear_hits().await;

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&session),
        MergePolicy::default(),
        events.clone(),
    ));
    let directory = Arc::new(Directory::new(session, events.clone()));
    Scheduler::new(reconciler, directory, interval, events)
}

#[tokio::test]
async fn first_cycle_runs_immediately_and_refreshes_both_views() {
    let backend = FakeBackend::spawn().await;
    let scheduler = signed_in_scheduler(&backend, Duration::from_secs(60)).await;

    scheduler.start(ConversationContext::Shared).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(backend.hit_keys().await, vec![FETCH_SHARED, LIST_USERS]);
    assert!(scheduler.is_running().await);
    scheduler.stop().await;
}

#[tokio::test]
async fn cycles_repeat_on_the_interval() {
    let backend = FakeBackend::spawn().await;
    let scheduler = signed_in_scheduler(&backend, Duration::from_millis(50)).await;

    scheduler.start(ConversationContext::Shared).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    scheduler.stop().await;

    assert!(backend.count(FETCH_SHARED).await >= 3);
}

#[tokio::test]
async fn stop_is_idempotent_and_halts_polling() {
    let backend = FakeBackend::spawn().await;
    let scheduler = signed_in_scheduler(&backend, Duration::from_millis(20)).await;

    scheduler.stop().await;
    scheduler.start(ConversationContext::Shared).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.stop().await;
    scheduler.stop().await;
    assert!(!scheduler.is_running().await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = backend.hits().await.len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(backend.hits().await.len(), settled);
}

#[tokio::test]
async fn restarting_replaces_the_previous_poller() {
    let backend = FakeBackend::spawn().await;
    backend
        .on("GET /api/messages?peer=42", Reply::ok(json!([])))
        .await;
    let scheduler = signed_in_scheduler(&backend, Duration::from_millis(30)).await;

    scheduler.start(ConversationContext::Shared).await;
    scheduler
        .start(ConversationContext::direct_to("42", "Bob"))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    backend.clear_hits().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    scheduler.stop().await;

    let keys = backend.hit_keys().await;
    assert!(keys.iter().any(|key| key == "GET /api/messages?peer=42"));
    assert!(!keys.iter().any(|key| key == FETCH_SHARED));
}

#[tokio::test]
async fn failing_timeline_fetch_does_not_stop_roster_refresh() {
    let backend = FakeBackend::spawn().await;
    let scheduler = signed_in_scheduler(&backend, Duration::from_millis(40)).await;
    for key in [
        FETCH_SHARED,
        "GET /api/global/messages",
        "GET /messages/global",
        "GET /api/room?room=global",
    ] {
        backend
            .on(key, Reply::detail(StatusCode::INTERNAL_SERVER_ERROR, "down"))
            .await;
    }
    backend
        .on(LIST_USERS, Reply::ok(json!([{ "username": "bob" }])))
        .await;

    scheduler.start(ConversationContext::Shared).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(scheduler.is_running().await);
    assert!(backend.count(LIST_USERS).await >= 2);
    assert_eq!(scheduler.directory.entries().await.len(), 1);
    scheduler.stop().await;
}

#[tokio::test]
async fn resume_keeps_context_and_waits_one_interval() {
    let backend = FakeBackend::spawn().await;
    let scheduler = signed_in_scheduler(&backend, Duration::from_millis(200)).await;
    scheduler
        .reconciler
        .switch_context(ConversationContext::Shared)
        .await
        .expect("fetch");
    backend.clear_hits().await;

    assert!(scheduler.resume().await);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(backend.hits().await.is_empty());

    tokio::time::sleep(Duration::from_millis(250)).await;
    scheduler.stop().await;
    assert!(backend.count(FETCH_SHARED).await >= 1);
    assert_eq!(
        scheduler.reconciler.active_context().await,
        Some(ConversationContext::Shared)
    );
}

#[tokio::test]
async fn dropping_the_scheduler_cancels_polling() {
    let backend = FakeBackend::spawn().await;
    let scheduler = signed_in_scheduler(&backend, Duration::from_millis(20)).await;

    scheduler.start(ConversationContext::Shared).await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    drop(scheduler);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = backend.hits().await.len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(backend.hits().await.len(), settled);
}

#[tokio::test]
async fn failing_streak_reports_one_error_until_polls_recover() {
    let backend = FakeBackend::spawn().await;
    let scheduler = signed_in_scheduler(&backend, Duration::from_millis(40)).await;
    let failing = [
        FETCH_SHARED,
        "GET /api/global/messages",
        "GET /messages/global",
        "GET /api/room?room=global",
    ];
    for key in failing {
        backend
            .on(key, Reply::detail(StatusCode::INTERNAL_SERVER_ERROR, "down"))
            .await;
    }
    let mut events = scheduler.events.subscribe();

    scheduler.start(ConversationContext::Shared).await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(backend.count(FETCH_SHARED).await >= 3);

    backend.on(FETCH_SHARED, Reply::ok(json!([]))).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    backend
        .on(FETCH_SHARED, Reply::detail(StatusCode::INTERNAL_SERVER_ERROR, "down"))
        .await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    scheduler.stop().await;

    let mut errors = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ClientEvent::Error(_)) {
            errors += 1;
        }
    }
    assert_eq!(errors, 2);
}
