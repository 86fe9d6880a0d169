//! End-to-end loopback tests
//!
//! Drive the public surface the way an embedder would: start push, start
//! pull, watch the receiving side connect, and assert the lifecycle
//! invariants on the way down.

mod support;

use std::sync::Arc;
use std::time::Duration;

use loopshare::{RoleState, SessionConfig, SessionManager};
use tokio_test::assert_ok;
use support::{CollectSink, TestScreenSource};

async fn wait_for_push_idle(manager: &SessionManager) {
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while manager.push_state().await != RoleState::Idle {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "push role never returned to idle");
}

#[tokio::test]
async fn full_push_pull_cycle_connects_and_renders_the_senders_stream() {
    support::init_logging();

    let source = Arc::new(TestScreenSource::new());
    let (sink, mut rendered) = CollectSink::new();
    let manager = SessionManager::new(SessionConfig::default(), source.clone(), sink)
        .await
        .unwrap();

    manager.start_push().await.unwrap();
    assert_eq!(manager.push_state().await, RoleState::Active);

    manager.start_pull().await.unwrap();
    assert_eq!(manager.pull_state().await, RoleState::Active);

    // The receiving endpoint must actually connect
    let mut connectivity = manager.pull_connectivity().await;
    let connected = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            if connectivity.borrow_and_update().is_established() {
                break;
            }
            if connectivity.changed().await.is_err() {
                panic!("connectivity channel closed before connecting");
            }
        }
    })
    .await;
    assert!(connected.is_ok(), "receiver never reached connected");

    // The sink receives a non-null stream whose identity matches the one
    // the sender attached
    let stream = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            if let Some(stream) = rendered.borrow_and_update().clone() {
                break stream;
            }
            if rendered.changed().await.is_err() {
                panic!("sink channel closed before a stream arrived");
            }
        }
    })
    .await
    .expect("no remote stream was rendered");

    assert_eq!(stream.stream_id, source.stream_id(0));
    assert!(!stream.tracks.is_empty());

    manager.stop_pull().await.unwrap();
    manager.stop_push().await.unwrap();

    assert_eq!(manager.push_state().await, RoleState::Idle);
    assert_eq!(manager.pull_state().await, RoleState::Idle);
    // Exactly one stop per owned track, and the sink was cleared
    assert_eq!(source.stop_count(0), 1);
    assert!(rendered.borrow().is_none());
}

#[tokio::test]
async fn start_push_without_capture_capability_fails_visibly() {
    support::init_logging();

    let source = Arc::new(TestScreenSource::new());
    source.set_available(false);
    let (sink, _rendered) = CollectSink::new();
    let manager = SessionManager::new(SessionConfig::default(), source.clone(), sink)
        .await
        .unwrap();

    let err = manager.start_push().await.unwrap_err();
    assert!(err.is_capability_error(), "unexpected error: {}", err);
    assert_eq!(manager.push_state().await, RoleState::Idle);
    assert_eq!(source.capture_count(), 0);
    assert_eq!(manager.push_generation().await, 1);
}

#[tokio::test]
async fn stopping_idle_roles_is_a_safe_noop() {
    support::init_logging();

    let source = Arc::new(TestScreenSource::new());
    let (sink, _rendered) = CollectSink::new();
    let manager = SessionManager::new(SessionConfig::default(), source, sink)
        .await
        .unwrap();

    tokio_test::assert_ok!(manager.stop_push().await);
    tokio_test::assert_ok!(manager.stop_pull().await);
    tokio_test::assert_ok!(manager.stop_push().await);

    assert_eq!(manager.push_state().await, RoleState::Idle);
    assert_eq!(manager.pull_state().await, RoleState::Idle);
    assert_eq!(manager.push_generation().await, 1);
    assert_eq!(manager.pull_generation().await, 1);
}

#[tokio::test]
async fn external_capture_end_tears_the_push_role_down() {
    support::init_logging();

    let source = Arc::new(TestScreenSource::new());
    let (sink, _rendered) = CollectSink::new();
    let manager = SessionManager::new(SessionConfig::default(), source.clone(), sink)
        .await
        .unwrap();

    manager.start_push().await.unwrap();
    assert_eq!(manager.push_state().await, RoleState::Active);

    // The user hit the platform's own "stop sharing"
    source.signal_ended(0);

    wait_for_push_idle(&manager).await;
    assert_eq!(source.stop_count(0), 1);
    assert_eq!(manager.push_generation().await, 2);
}

#[tokio::test]
async fn restarting_an_active_push_stops_the_old_session_first() {
    support::init_logging();

    let source = Arc::new(TestScreenSource::new());
    let (sink, _rendered) = CollectSink::new();
    let manager = SessionManager::new(SessionConfig::default(), source.clone(), sink)
        .await
        .unwrap();

    manager.start_push().await.unwrap();
    manager.start_push().await.unwrap();

    assert_eq!(manager.push_state().await, RoleState::Active);
    assert_eq!(source.capture_count(), 2);
    assert_eq!(source.stop_count(0), 1);
    assert_eq!(source.stop_count(1), 0);
    assert_eq!(manager.push_generation().await, 2);

    manager.stop_push().await.unwrap();
    assert_eq!(source.stop_count(1), 1);
    assert_eq!(manager.push_generation().await, 3);
}
