use crate::scope::container::SessionScope;
use crate::session::{SessionId, SessionRecord, SessionState, TrackerListener};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs on every freshly created scope, e.g. to register session resources
pub type ScopeInitializer = Arc<dyn Fn(&SessionScope) + Send + Sync>;

/// Tracker listener that keeps one [`SessionScope`] per ACTIVE session.
///
/// A scope is opened when a session starts tracking as ACTIVE or transitions
/// into ACTIVE, and closed when it leaves ACTIVE or stops being tracked.
/// Protocol violations (opening twice, closing a missing scope) are logged
/// and ignored.
#[derive(Default)]
pub struct ScopeBinder {
    scopes: DashMap<SessionId, Arc<SessionScope>>,
    initializer: Option<ScopeInitializer>,
}

impl ScopeBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initializer(initializer: impl Fn(&SessionScope) + Send + Sync + 'static) -> Self {
        Self {
            scopes: DashMap::new(),
            initializer: Some(Arc::new(initializer)),
        }
    }

    /// Live scope of a session, if it is ACTIVE
    pub fn get_scope(&self, session_id: &SessionId) -> Option<Arc<SessionScope>> {
        self.scopes
            .get(session_id)
            .map(|scope| Arc::clone(scope.value()))
    }

    /// Session ids that currently own a scope
    pub fn active_scopes(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.scopes.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn live_scope_count(&self) -> usize {
        self.scopes.len()
    }

    fn open_scope(&self, session_id: &SessionId) {
        if let Some(existing) = self.scopes.get(session_id) {
            warn!(
                "open_scope: scope {} already exists for session '{}'",
                existing.id(),
                session_id
            );
            return;
        }

        // Initializer runs outside the map lock so it may query the binder
        let scope = Arc::new(SessionScope::new(session_id.clone()));
        if let Some(initializer) = &self.initializer {
            initializer(&scope);
        }

        match self.scopes.entry(session_id.clone()) {
            Entry::Occupied(entry) => {
                warn!(
                    "open_scope: scope {} raced in for session '{}'",
                    entry.get().id(),
                    session_id
                );
                scope.close();
            }
            Entry::Vacant(entry) => {
                info!("Opened scope {} for session '{}'", scope.id(), session_id);
                entry.insert(scope);
            }
        }
    }

    fn close_scope(&self, session_id: &SessionId) {
        match self.scopes.remove(session_id) {
            Some((_, scope)) => {
                scope.close();
                info!("Closed scope {} for session '{}'", scope.id(), session_id);
            }
            None => debug!("close_scope: no scope to close for session '{}'", session_id),
        }
    }
}

impl TrackerListener for ScopeBinder {
    fn on_tracker_initialized(&self, records: &[SessionRecord]) {
        debug!(
            "Tracker initialized with {} sessions, {} live scopes",
            records.len(),
            self.live_scope_count()
        );
    }

    fn on_tracking_started(&self, session_id: &SessionId, state: SessionState) {
        debug!("on_tracking_started: '{}', state = {}", session_id, state);
        if state == SessionState::Active {
            self.open_scope(session_id);
        }
    }

    fn on_state_changed(
        &self,
        session_id: &SessionId,
        old_state: SessionState,
        new_state: SessionState,
    ) {
        debug!(
            "on_state_changed: '{}', {} -> {}",
            session_id, old_state, new_state
        );
        match new_state {
            SessionState::Active => self.open_scope(session_id),
            SessionState::Inactive | SessionState::Forgotten => self.close_scope(session_id),
        }
    }

    fn on_tracking_stopped(&self, session_id: &SessionId, state: SessionState) {
        debug!("on_tracking_stopped: '{}', state = {}", session_id, state);
        self.close_scope(session_id);
    }

    fn on_all_tracking_stopped(&self, records: &[SessionRecord]) {
        debug!("on_all_tracking_stopped: {} sessions", records.len());
        for record in records {
            self.close_scope(&record.session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> SessionId {
        SessionId::new(value).unwrap()
    }

    #[test]
    fn test_scope_follows_active_state() {
        let binder = ScopeBinder::new();
        let u1 = id("u1");

        binder.on_tracking_started(&u1, SessionState::Inactive);
        assert!(binder.get_scope(&u1).is_none());

        binder.on_state_changed(&u1, SessionState::Inactive, SessionState::Active);
        let scope = binder.get_scope(&u1).unwrap();
        assert!(!scope.is_closed());

        binder.on_state_changed(&u1, SessionState::Active, SessionState::Inactive);
        assert!(binder.get_scope(&u1).is_none());
        assert!(scope.is_closed());
    }

    #[test]
    fn test_double_open_keeps_original_scope() {
        let binder = ScopeBinder::new();
        let u1 = id("u1");

        binder.on_tracking_started(&u1, SessionState::Active);
        let first = binder.get_scope(&u1).unwrap();
        binder.on_state_changed(&u1, SessionState::Inactive, SessionState::Active);

        assert_eq!(binder.get_scope(&u1).unwrap().id(), first.id());
        assert_eq!(binder.live_scope_count(), 1);
    }

    #[test]
    fn test_closing_missing_scope_is_noop() {
        let binder = ScopeBinder::new();
        let u1 = id("u1");

        binder.on_tracking_stopped(&u1, SessionState::Inactive);
        binder.on_state_changed(&u1, SessionState::Active, SessionState::Forgotten);

        assert_eq!(binder.live_scope_count(), 0);
    }

    #[test]
    fn test_all_tracking_stopped_closes_every_scope() {
        let binder = ScopeBinder::new();
        binder.on_tracking_started(&id("a"), SessionState::Active);
        binder.on_tracking_started(&id("b"), SessionState::Active);
        assert_eq!(binder.active_scopes(), vec![id("a"), id("b")]);

        binder.on_all_tracking_stopped(&[
            SessionRecord::new(id("a"), SessionState::Active),
            SessionRecord::new(id("b"), SessionState::Active),
        ]);

        assert!(binder.active_scopes().is_empty());
    }

    #[test]
    fn test_initializer_populates_new_scopes() {
        let binder = ScopeBinder::with_initializer(|scope| {
            scope.insert(format!("greeting for {}", scope.session_id()));
        });
        let u1 = id("u1");

        binder.on_tracking_started(&u1, SessionState::Active);

        let scope = binder.get_scope(&u1).unwrap();
        assert_eq!(*scope.get::<String>().unwrap(), "greeting for u1");
    }
}
