//! Integration tests for the tracker, the JSON store, and scope binding
//!
//! These tests drive the public API the way an application does: a tracker
//! over a file store, a scope binder as listener, and restarts in between.
//! Unit tests for individual components live in their module files.

use session_tracker::cli::{AppConfig, ConfigDiscovery};
use session_tracker::{
    DefaultTransitions, JsonFileStore, LoginOutcome, RecordingListener, ScopeBinder,
    SessionEvent, SessionId, SessionRecord, SessionState, SessionStore, SessionTracker,
    TrackerConfig, TrackerError, TrackerNotification,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

#[derive(Debug)]
struct Cart {
    owner: String,
}

fn id(value: &str) -> SessionId {
    SessionId::new(value).unwrap()
}

fn open_app(path: &Path, config: TrackerConfig) -> (SessionTracker, Arc<ScopeBinder>) {
    let binder = Arc::new(ScopeBinder::with_initializer(|scope| {
        scope.insert(Cart {
            owner: scope.session_id().to_string(),
        });
    }));
    let tracker = SessionTracker::new(JsonFileStore::new(path), DefaultTransitions, config)
        .with_listener(binder.clone());
    (tracker, binder)
}

#[test]
fn test_login_logout_forget_across_restarts() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sessions.json");
    let alice = id("alice");

    {
        let (tracker, binder) = open_app(&path, TrackerConfig::default());
        tracker.initialize().unwrap();

        assert_eq!(tracker.login(&alice).unwrap(), LoginOutcome::Tracked);
        let cart = binder
            .get_scope(&alice)
            .and_then(|scope| scope.get::<Cart>())
            .expect("cart registered in the session scope");
        assert_eq!(cart.owner, "alice");
    }

    // ACTIVE session comes back with a fresh scope
    {
        let (tracker, binder) = open_app(&path, TrackerConfig::default());
        let records = tracker.initialize().unwrap();
        assert_eq!(
            records,
            vec![SessionRecord::new(alice.clone(), SessionState::Active)]
        );
        assert_eq!(binder.active_scopes(), vec![alice.clone()]);

        tracker.consume_event(&alice, SessionEvent::Logout).unwrap();
        assert_eq!(binder.live_scope_count(), 0);
    }

    {
        let (tracker, binder) = open_app(&path, TrackerConfig::default());
        tracker.initialize().unwrap();
        assert_eq!(binder.live_scope_count(), 0);

        assert_eq!(tracker.login(&alice).unwrap(), LoginOutcome::Reactivated);
        assert_eq!(
            tracker
                .consume_event(&alice, SessionEvent::LogoutAndForget)
                .unwrap(),
            SessionState::Forgotten
        );
    }

    let store = JsonFileStore::new(&path);
    assert!(store.read_all_records().unwrap().is_empty());
}

#[test]
fn test_notification_log_across_restart() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sessions.json");
    let alice = id("alice");

    let recorder = Arc::new(RecordingListener::new());
    let tracker = SessionTracker::new(
        JsonFileStore::new(&path),
        DefaultTransitions,
        TrackerConfig::default(),
    )
    .with_listener(recorder.clone());
    tracker.initialize().unwrap();
    tracker.login(&alice).unwrap();
    tracker.consume_event(&alice, SessionEvent::Logout).unwrap();
    drop(tracker);

    assert_eq!(
        recorder.take(),
        vec![
            TrackerNotification::Initialized(Vec::new()),
            TrackerNotification::TrackingStarted(alice.clone(), SessionState::Active),
            TrackerNotification::StateChanged(
                alice.clone(),
                SessionState::Active,
                SessionState::Inactive
            ),
        ]
    );

    let restarted = SessionTracker::new(
        JsonFileStore::new(&path),
        DefaultTransitions,
        TrackerConfig::default(),
    )
    .with_listener(recorder.clone());
    let records = restarted.initialize().unwrap();
    restarted.delete_all_session_records().unwrap();

    assert_eq!(
        recorder.take(),
        vec![
            TrackerNotification::TrackingStarted(alice.clone(), SessionState::Inactive),
            TrackerNotification::Initialized(records.clone()),
            TrackerNotification::AllTrackingStopped(records),
        ]
    );
}

#[test]
fn test_switching_users_respects_single_active_session() {
    let temp_dir = TempDir::new().unwrap();
    let (tracker, binder) = open_app(
        &temp_dir.path().join("sessions.json"),
        TrackerConfig::default(),
    );
    tracker.initialize().unwrap();

    tracker.login(&id("alice")).unwrap();
    let second = tracker.login(&id("bob"));
    assert!(matches!(second, Err(TrackerError::InvariantViolation(_))));

    tracker
        .consume_event(&id("alice"), SessionEvent::Logout)
        .unwrap();
    tracker.login(&id("bob")).unwrap();

    assert_eq!(binder.active_scopes(), vec![id("bob")]);
    assert_eq!(
        tracker.session_records(),
        vec![
            SessionRecord::new(id("alice"), SessionState::Inactive),
            SessionRecord::new(id("bob"), SessionState::Active),
        ]
    );
}

#[test]
fn test_reset_closes_every_scope_and_clears_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sessions.json");
    let config = TrackerConfig {
        max_active_sessions: 0,
        ..TrackerConfig::default()
    };
    let (tracker, binder) = open_app(&path, config);
    tracker.initialize().unwrap();

    for name in ["a", "b", "c"] {
        tracker.login(&id(name)).unwrap();
    }
    let scopes: Vec<_> = ["a", "b", "c"]
        .iter()
        .filter_map(|name| binder.get_scope(&id(name)))
        .collect();
    assert_eq!(scopes.len(), 3);

    let removed = tracker.delete_all_session_records().unwrap();

    assert_eq!(removed.len(), 3);
    assert!(scopes.iter().all(|scope| scope.is_closed()));
    assert_eq!(binder.live_scope_count(), 0);
    assert!(JsonFileStore::new(&path).read_all_records().unwrap().is_empty());
}

#[test]
fn test_corrupted_store_keeps_tracker_uninitialized() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sessions.json");
    std::fs::write(&path, "{ definitely not json").unwrap();
    let (tracker, _binder) = open_app(&path, TrackerConfig::default());

    assert!(matches!(
        tracker.initialize(),
        Err(TrackerError::Storage(_))
    ));
    assert!(!tracker.is_initialized());

    // Repairing the file makes a retry succeed
    std::fs::write(&path, "").unwrap();
    assert!(tracker.initialize().unwrap().is_empty());
}

#[test]
fn test_config_file_drives_tracker() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = ConfigDiscovery::create_default_config_in(temp_dir.path()).unwrap();

    let mut config = AppConfig::from_toml_file(&config_path).unwrap();
    assert_eq!(config.tracker, TrackerConfig::default());
    config.tracker.max_active_sessions = 2;
    config.to_toml_file(&config_path).unwrap();

    let config = ConfigDiscovery::load(Some(config_path.as_path())).unwrap();
    let storage_path = config.resolve_storage_path();
    assert!(storage_path.starts_with(temp_dir.path()));

    let (tracker, _binder) = open_app(&storage_path, config.tracker.clone());
    tracker.initialize().unwrap();
    tracker.login(&id("a")).unwrap();
    tracker.login(&id("b")).unwrap();
    assert!(tracker.login(&id("c")).is_err());
    assert!(storage_path.exists());
}

#[tokio::test]
async fn test_concurrent_logins_from_async_tasks() {
    let temp_dir = TempDir::new().unwrap();
    let (tracker, binder) = open_app(
        &temp_dir.path().join("sessions.json"),
        TrackerConfig::default(),
    );
    let tracker = Arc::new(tracker);
    tracker.initialize().unwrap();

    let tracked = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..6 {
        let tracker = Arc::clone(&tracker);
        let tracked = Arc::clone(&tracked);
        handles.push(tokio::task::spawn_blocking(move || {
            if let Ok(LoginOutcome::Tracked) = tracker.login(&id("shared")) {
                tracked.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(tracked.load(Ordering::SeqCst), 1);
    assert_eq!(binder.active_scopes(), vec![id("shared")]);
    assert_eq!(tracker.session_records().len(), 1);
}
