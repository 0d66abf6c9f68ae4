// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Race Detection Tests for session-vault
//!
//! These tests verify that concurrent turns for one session are serialized
//! (no lost updates) while turns for different sessions run in parallel.
//! They are designed to detect data races when run with ThreadSanitizer (TSAN).
//!
//! # Running with ThreadSanitizer
//!
//! ```bash
//! # On Linux with nightly Rust:
//! RUSTFLAGS="-Z sanitizer=thread" cargo +nightly test --target x86_64-unknown-linux-gnu --test race_detection_test
//! ```
//!
//! # Test Categories
//!
//! - Same-session serialization (load → save is never interleaved)
//! - Cross-session parallelism
//! - Cross-session isolation under load

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use session_vault::{
    EngineSettings, Field, InMemoryStore, KeyHierarchy, MasterKey, OutboundDirective, Result, SessionManager,
    SessionRecord, SessionStore,
};

// Test configuration
const CONCURRENCY_LEVEL: usize = 16;
const STORE_LATENCY_MS: u64 = 5;
const TEST_TIMEOUT_SECS: u64 = 30;

/// In-memory store with artificial latency on every call, to widen the
/// window between load and save. Tracks how many calls overlap.
struct SlowStore {
    inner: InMemoryStore,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SlowStore {
    fn new(latency: Duration) -> Self {
        Self {
            inner: InMemoryStore::new(),
            latency,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    async fn delay(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for SlowStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.delay().await;
        self.inner.get(session_id).await
    }

    async fn put(&self, session_id: &str, record: &SessionRecord, ttl: Duration) -> Result<()> {
        self.delay().await;
        self.inner.put(session_id, record, ttl).await
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.delay().await;
        self.inner.delete(session_id).await
    }

    fn name(&self) -> &'static str {
        "slow-memory"
    }
}

fn manager(store: Arc<SlowStore>) -> Arc<SessionManager> {
    Arc::new(
        SessionManager::new(KeyHierarchy::new(MasterKey::generate()), store, EngineSettings::default())
            .expect("valid settings"),
    )
}

/// A distinct two-character CJK name per index.
fn name_for(index: usize) -> String {
    let second = char::from_u32(0x4e00 + index as u32).expect("CJK code point");
    format!("陳{}", second)
}

// =============================================================================
// SAME-SESSION SERIALIZATION
// =============================================================================

/// Every task answers the pending "name" prompt at once. Exactly one of them
/// may fill it; the rest must see the updated session and be validated
/// against the next field. Without serialization several tasks would load
/// the same state and each "fill" the name, silently overwriting each other.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_turns_same_session_no_lost_update() {
    let store = Arc::new(SlowStore::new(Duration::from_millis(STORE_LATENCY_MS)));
    let manager = manager(store.clone());
    manager.handle_turn("U1", "start").await;

    let result = timeout(Duration::from_secs(TEST_TIMEOUT_SECS), async {
        let mut handles = Vec::new();
        for i in 0..CONCURRENCY_LEVEL {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.handle_turn("U1", &name_for(i)).await }));
        }
        let mut directives = Vec::new();
        for handle in handles {
            directives.push(handle.await.expect("Task panicked"));
        }
        directives
    })
    .await;

    let directives = result.expect("Test timed out - possible deadlock");
    let advanced = directives
        .iter()
        .filter(|d| **d == OutboundDirective::PromptField { field: Field::BirthDate })
        .count();
    let rejected = directives
        .iter()
        .filter(|d| matches!(d, OutboundDirective::ValidationError { field: Field::BirthDate, .. }))
        .count();

    assert_eq!(advanced, 1, "exactly one turn may fill the name");
    assert_eq!(rejected, CONCURRENCY_LEVEL - 1);

    let loaded = manager.load_or_create("U1").await.unwrap();
    assert_eq!(loaded.state.collected_fields.len(), 1);
    assert!(loaded.state.collected_fields.contains_key(&Field::Name));
}

/// Date and time race each other. Whichever order wins, the final state
/// must agree with the directives that were handed out.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_fields_stay_consistent() {
    let store = Arc::new(SlowStore::new(Duration::from_millis(STORE_LATENCY_MS)));
    let manager = manager(store.clone());
    manager.handle_turn("U1", "start").await;
    manager.handle_turn("U1", "陳美麗").await;

    let date = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.handle_turn("U1", "1991-08-20").await })
    };
    let time = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.handle_turn("U1", "09:00").await })
    };
    let date = date.await.expect("Task panicked");
    let time = time.await.expect("Task panicked");

    let loaded = manager.load_or_create("U1").await.unwrap();
    assert_eq!(loaded.state.collected_fields[&Field::BirthDate], "1991-08-20");
    assert_eq!(date, OutboundDirective::PromptField { field: Field::BirthTime });

    match time {
        // Time arrived after the date: profile complete.
        OutboundDirective::Ready => {
            assert_eq!(loaded.state.collected_fields[&Field::BirthTime], "09:00");
        }
        // Time arrived first and was rejected as a date.
        OutboundDirective::ValidationError { field: Field::BirthDate, .. } => {
            assert!(!loaded.state.collected_fields.contains_key(&Field::BirthTime));
        }
        other => panic!("unexpected directive for the time turn: {:?}", other),
    }
}

// =============================================================================
// CROSS-SESSION PARALLELISM
// =============================================================================

/// Turns for different sessions must not queue behind each other.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_sessions_run_in_parallel() {
    let latency = Duration::from_millis(50);
    let store = Arc::new(SlowStore::new(latency));
    let manager = manager(store.clone());

    let started = Instant::now();
    let mut handles = Vec::new();
    for i in 0..CONCURRENCY_LEVEL {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move { manager.handle_turn(&format!("U{}", i), "start").await }));
    }
    for handle in handles {
        assert_eq!(
            handle.await.expect("Task panicked"),
            OutboundDirective::PromptField { field: Field::Name }
        );
    }
    let elapsed = started.elapsed();

    // Serialized, each turn costs a get and a put: CONCURRENCY_LEVEL * 100ms.
    assert!(
        elapsed < latency * CONCURRENCY_LEVEL as u32,
        "sessions appear to be serialized: {:?}",
        elapsed
    );
    assert!(store.max_in_flight.load(Ordering::SeqCst) > 1);
}

/// Many sessions filling their profiles at the same time keep their own data.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_are_isolated() {
    let store = Arc::new(SlowStore::new(Duration::from_millis(1)));
    let manager = manager(store.clone());

    let result = timeout(Duration::from_secs(TEST_TIMEOUT_SECS), async {
        let mut handles = Vec::new();
        for i in 0..CONCURRENCY_LEVEL {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                let session = format!("U{}", i);
                for text in ["start", name_for(i).as_str(), "1991-08-20", "09:00"] {
                    manager.handle_turn(&session, text).await;
                }
            }));
        }
        for handle in handles {
            handle.await.expect("Task panicked");
        }
    })
    .await;
    result.expect("Test timed out - possible deadlock");

    for i in 0..CONCURRENCY_LEVEL {
        let loaded = manager.load_or_create(&format!("U{}", i)).await.unwrap();
        assert_eq!(loaded.state.collected_fields[&Field::Name], name_for(i));
        assert_eq!(loaded.state.collected_fields.len(), 3);
    }
}
