use crate::session::listener::TrackerListener;
use crate::session::storage::{SessionStore, StoreError};
use crate::session::transitions::{
    Transition, TransitionError, TransitionsSupplier, find_transition, validate_transitions,
};
use crate::session::types::{SessionEvent, SessionId, SessionRecord, SessionState};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, ThreadId};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Configuration for the session tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Upper bound on simultaneously ACTIVE sessions; 0 disables the check
    pub max_active_sessions: usize,
    /// Emit debug dumps of every operation
    pub verbose: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_active_sessions: 1,
            verbose: false,
        }
    }
}

impl TrackerConfig {
    pub fn active_limit(&self) -> Option<usize> {
        (self.max_active_sessions > 0).then_some(self.max_active_sessions)
    }
}

/// Broken session set invariant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Invariant {
    #[error("too many ACTIVE sessions {active:?}, at most {limit} allowed")]
    ActiveLimitExceeded {
        active: Vec<SessionId>,
        limit: usize,
    },
    #[error("more than one persisted record for session '{0}'")]
    DuplicateRecord(SessionId),
}

/// Errors reported by [`SessionTracker`] operations
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("session tracker is already initialized")]
    AlreadyInitialized,
    #[error("session tracker must be initialized before calling `{operation}`")]
    NotInitialized { operation: &'static str },
    #[error("session tracker is unusable after a failed initialization")]
    Unusable,
    #[error("invariant violation: {0}")]
    InvariantViolation(Invariant),
    #[error("session '{0}' is already tracked")]
    DuplicateSession(SessionId),
    #[error("session '{0}' is not tracked")]
    UnknownSession(SessionId),
    #[error("event {event} is not allowed for session '{session_id}' in state {state}")]
    IllegalTransition {
        session_id: SessionId,
        event: SessionEvent,
        state: SessionState,
    },
    #[error("session '{session_id}' can not be tracked in terminal state {state}")]
    TerminalState {
        session_id: SessionId,
        state: SessionState,
    },
    #[error("invalid state transitions for session '{session_id}': {source}")]
    InvalidTransitions {
        session_id: SessionId,
        #[source]
        source: TransitionError,
    },
    #[error("`{operation}` called from a tracker listener or store callback")]
    Reentrant { operation: &'static str },
    #[error("session store failure: {0}")]
    Storage(#[from] StoreError),
}

/// What [`SessionTracker::login`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Unknown session, now tracked as ACTIVE
    Tracked,
    /// Known session, LOGIN event consumed
    Reactivated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Ready,
    Failed,
}

struct TrackerInner {
    lifecycle: Lifecycle,
    sessions: Vec<SessionRecord>,
}

impl TrackerInner {
    fn position(&self, session_id: &SessionId) -> Option<usize> {
        self.sessions
            .iter()
            .position(|record| &record.session_id == session_id)
    }
}

/// Held for the duration of one mutating operation; records the owning
/// thread so callbacks re-entering the tracker are detected
struct CriticalSection<'a> {
    inner: MutexGuard<'a, TrackerInner>,
    owner: &'a Mutex<Option<ThreadId>>,
}

impl Deref for CriticalSection<'_> {
    type Target = TrackerInner;

    fn deref(&self) -> &TrackerInner {
        &self.inner
    }
}

impl DerefMut for CriticalSection<'_> {
    fn deref_mut(&mut self) -> &mut TrackerInner {
        &mut self.inner
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        // Cleared before the inner guard is released
        *lock_owner(self.owner) = None;
    }
}

fn lock_owner(owner: &Mutex<Option<ThreadId>>) -> MutexGuard<'_, Option<ThreadId>> {
    owner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Persisted state machine driver over all tracked sessions.
///
/// Mutating operations (`initialize`, `track_session`, `consume_event`,
/// `login`, `untrack_session`, `delete_all_session_records`) are serialized
/// by one mutex. Each validates, writes the store, commits the in-memory
/// record set, publishes a snapshot, and then notifies listeners before
/// returning, all while holding that mutex. `session_records` reads the
/// published snapshot and never waits for a mutation in progress.
pub struct SessionTracker {
    store: Box<dyn SessionStore>,
    transitions: Box<dyn TransitionsSupplier>,
    listeners: Vec<Arc<dyn TrackerListener>>,
    config: TrackerConfig,
    inner: Mutex<TrackerInner>,
    snapshot: RwLock<Vec<SessionRecord>>,
    initialized: AtomicBool,
    owner: Mutex<Option<ThreadId>>,
}

impl SessionTracker {
    pub fn new(
        store: impl SessionStore + 'static,
        transitions: impl TransitionsSupplier + 'static,
        config: TrackerConfig,
    ) -> Self {
        Self {
            store: Box::new(store),
            transitions: Box::new(transitions),
            listeners: Vec::new(),
            config,
            inner: Mutex::new(TrackerInner {
                lifecycle: Lifecycle::Uninitialized,
                sessions: Vec::new(),
            }),
            snapshot: RwLock::new(Vec::new()),
            initialized: AtomicBool::new(false),
            owner: Mutex::new(None),
        }
    }

    /// Register a listener; listeners are notified in registration order
    pub fn with_listener<L: TrackerListener + 'static>(mut self, listener: Arc<L>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Load persisted records and start tracking them. Allowed once.
    ///
    /// Fails with [`TrackerError::InvariantViolation`] if the persisted set has
    /// duplicate ids or more ACTIVE records than allowed; the tracker is then
    /// unusable. Records persisted in a terminal state are purged.
    pub fn initialize(&self) -> Result<Vec<SessionRecord>, TrackerError> {
        let started_at = Instant::now();
        let mut section = self.enter("initialize")?;

        match section.lifecycle {
            Lifecycle::Ready => {
                warn!("initialize: already initialized");
                return Err(TrackerError::AlreadyInitialized);
            }
            Lifecycle::Failed => return Err(TrackerError::Unusable),
            Lifecycle::Uninitialized => {}
        }

        if self.config.verbose {
            debug!("initialize: starting..");
        }

        let loaded = self.store.read_all_records().inspect_err(|e| {
            error!("initialize: failed to read session records: {}", e);
        })?;

        let mut seen = HashSet::new();
        if let Some(duplicate) = loaded
            .iter()
            .find(|record| !seen.insert(record.session_id.clone()))
        {
            let invariant = Invariant::DuplicateRecord(duplicate.session_id.clone());
            error!("initialize: {}", invariant);
            section.lifecycle = Lifecycle::Failed;
            return Err(TrackerError::InvariantViolation(invariant));
        }

        let (terminal, live): (Vec<_>, Vec<_>) = loaded
            .into_iter()
            .partition(|record| record.state.is_terminal());

        if let Some(limit) = self.config.active_limit() {
            let active: Vec<SessionId> = live
                .iter()
                .filter(|record| record.state == SessionState::Active)
                .map(|record| record.session_id.clone())
                .collect();
            if active.len() > limit {
                let invariant = Invariant::ActiveLimitExceeded { active, limit };
                error!("initialize: {}", invariant);
                section.lifecycle = Lifecycle::Failed;
                return Err(TrackerError::InvariantViolation(invariant));
            }
        }

        for record in &live {
            if let Err(e) = self.session_transitions(&record.session_id) {
                error!("initialize: {}", e);
                section.lifecycle = Lifecycle::Failed;
                return Err(e);
            }
        }

        for record in &terminal {
            warn!(
                "initialize: session '{}' was persisted in terminal state {}, purging it",
                record.session_id, record.state
            );
            self.store.delete_record(&record.session_id)?;
        }

        section.sessions = live;
        section.lifecycle = Lifecycle::Ready;
        self.initialized.store(true, Ordering::Release);
        self.publish(&section);

        for record in &section.sessions {
            self.notify(|listener| listener.on_tracking_started(&record.session_id, record.state));
        }
        let records = section.sessions.clone();
        self.notify(|listener| listener.on_tracker_initialized(&records));

        info!(
            "Session tracker initialized with {} sessions in {}ms",
            records.len(),
            started_at.elapsed().as_millis()
        );
        Ok(records)
    }

    /// Snapshot of the tracked records as of the last completed operation
    pub fn session_records(&self) -> Vec<SessionRecord> {
        let records = self
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if self.config.verbose {
            debug!("session_records: {:?}", records);
        }
        records
    }

    pub fn session_record(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|record| &record.session_id == session_id)
            .cloned()
    }

    /// Start tracking a new session in `state`
    pub fn track_session(
        &self,
        session_id: &SessionId,
        state: SessionState,
    ) -> Result<(), TrackerError> {
        let mut section = self.enter("track_session")?;
        self.ensure_ready(&section, "track_session")?;
        if self.config.verbose {
            debug!("track_session: session_id = '{}', state = {}", session_id, state);
        }
        self.track_locked(&mut section, session_id, state)
    }

    /// Apply `event` to a tracked session and return its new state
    pub fn consume_event(
        &self,
        session_id: &SessionId,
        event: SessionEvent,
    ) -> Result<SessionState, TrackerError> {
        let mut section = self.enter("consume_event")?;
        self.ensure_ready(&section, "consume_event")?;
        if self.config.verbose {
            debug!("consume_event: session_id = '{}', event = {}", session_id, event);
        }
        self.consume_locked(&mut section, session_id, event)
    }

    /// Track `session_id` as ACTIVE if unknown, otherwise consume LOGIN, as one
    /// atomic check-and-act
    pub fn login(&self, session_id: &SessionId) -> Result<LoginOutcome, TrackerError> {
        let mut section = self.enter("login")?;
        self.ensure_ready(&section, "login")?;

        if section.position(session_id).is_some() {
            self.consume_locked(&mut section, session_id, SessionEvent::Login)?;
            Ok(LoginOutcome::Reactivated)
        } else {
            self.track_locked(&mut section, session_id, SessionState::Active)?;
            Ok(LoginOutcome::Tracked)
        }
    }

    /// Stop tracking a session without changing its state
    pub fn untrack_session(&self, session_id: &SessionId) -> Result<SessionRecord, TrackerError> {
        let mut section = self.enter("untrack_session")?;
        self.ensure_ready(&section, "untrack_session")?;

        let Some(index) = section.position(session_id) else {
            debug!("untrack_session: no session with ID '{}' found", session_id);
            return Err(TrackerError::UnknownSession(session_id.clone()));
        };

        self.store.delete_record(session_id).inspect_err(|e| {
            error!("untrack_session: failed to delete '{}': {}", session_id, e);
        })?;
        let record = section.sessions.remove(index);
        self.publish(&section);

        info!("Stopped tracking session '{}' in state {}", session_id, record.state);
        self.notify(|listener| listener.on_tracking_stopped(session_id, record.state));
        Ok(record)
    }

    /// Drop every record from the store and memory; returns the prior set
    pub fn delete_all_session_records(&self) -> Result<Vec<SessionRecord>, TrackerError> {
        let mut section = self.enter("delete_all_session_records")?;
        self.ensure_ready(&section, "delete_all_session_records")?;

        self.store.delete_all_records().inspect_err(|e| {
            error!("delete_all_session_records: {}", e);
        })?;
        let records = std::mem::take(&mut section.sessions);
        self.publish(&section);

        info!("Stopped tracking all sessions ({} records)", records.len());
        self.notify(|listener| listener.on_all_tracking_stopped(&records));
        Ok(records)
    }

    fn track_locked(
        &self,
        inner: &mut TrackerInner,
        session_id: &SessionId,
        state: SessionState,
    ) -> Result<(), TrackerError> {
        if inner.position(session_id).is_some() {
            warn!("track_session: session with ID '{}' already exists", session_id);
            return Err(TrackerError::DuplicateSession(session_id.clone()));
        }
        if state.is_terminal() {
            warn!("track_session: session '{}' rejected, {} is terminal", session_id, state);
            return Err(TrackerError::TerminalState {
                session_id: session_id.clone(),
                state,
            });
        }
        self.session_transitions(session_id)?;
        self.check_active_limit(inner, session_id, state)?;

        let record = SessionRecord::new(session_id.clone(), state);
        self.store.create_record(&record).inspect_err(|e| {
            error!("track_session: failed to persist '{}': {}", session_id, e);
        })?;
        inner.sessions.push(record);
        self.publish(inner);

        info!("Tracking session '{}' in state {}", session_id, state);
        self.notify(|listener| listener.on_tracking_started(session_id, state));
        Ok(())
    }

    fn consume_locked(
        &self,
        inner: &mut TrackerInner,
        session_id: &SessionId,
        event: SessionEvent,
    ) -> Result<SessionState, TrackerError> {
        let Some(index) = inner.position(session_id) else {
            warn!("consume_event: no session with ID '{}' found", session_id);
            return Err(TrackerError::UnknownSession(session_id.clone()));
        };
        let current = inner.sessions[index].state;

        let transitions = self.session_transitions(session_id)?;
        let Some(transition) = find_transition(&transitions, event, current) else {
            if self.config.verbose {
                debug!(
                    "consume_event: event {} ignored for session '{}' in state {}",
                    event, session_id, current
                );
            }
            return Err(TrackerError::IllegalTransition {
                session_id: session_id.clone(),
                event,
                state: current,
            });
        };

        // Validated paths hold at least two states and only end in a terminal one
        let path = transition.state_path();
        let target = path[path.len() - 1];
        for &hop in &path[1..] {
            self.check_active_limit(inner, session_id, hop)?;
        }

        let persisted = if target.is_terminal() {
            self.store.delete_record(session_id)
        } else {
            self.store
                .update_record(&SessionRecord::new(session_id.clone(), target))
        };
        persisted.inspect_err(|e| {
            error!("consume_event: failed to persist '{}': {}", session_id, e);
        })?;

        if target.is_terminal() {
            inner.sessions.remove(index);
        } else {
            inner.sessions[index].state = target;
        }
        self.publish(inner);

        for hop in path.windows(2) {
            debug!("Session '{}': {} -> {}", session_id, hop[0], hop[1]);
            self.notify(|listener| listener.on_state_changed(session_id, hop[0], hop[1]));
        }
        if target.is_terminal() {
            info!(
                "Session '{}' reached terminal state {}, stopped tracking",
                session_id, target
            );
            self.notify(|listener| listener.on_tracking_stopped(session_id, target));
        }

        Ok(target)
    }

    fn session_transitions(&self, session_id: &SessionId) -> Result<Vec<Transition>, TrackerError> {
        let transitions = self.transitions.transitions_for(session_id);
        validate_transitions(&transitions).map_err(|source| TrackerError::InvalidTransitions {
            session_id: session_id.clone(),
            source,
        })?;
        Ok(transitions)
    }

    fn check_active_limit(
        &self,
        inner: &TrackerInner,
        session_id: &SessionId,
        target: SessionState,
    ) -> Result<(), TrackerError> {
        let Some(limit) = self.config.active_limit() else {
            return Ok(());
        };
        if target != SessionState::Active {
            return Ok(());
        }

        let mut active: Vec<SessionId> = inner
            .sessions
            .iter()
            .filter(|record| record.state == SessionState::Active)
            .map(|record| record.session_id.clone())
            .collect();
        if !active.contains(session_id) {
            active.push(session_id.clone());
        }

        if active.len() > limit {
            let invariant = Invariant::ActiveLimitExceeded { active, limit };
            warn!("Rejecting activation of '{}': {}", session_id, invariant);
            return Err(TrackerError::InvariantViolation(invariant));
        }
        Ok(())
    }

    fn ensure_ready(&self, inner: &TrackerInner, operation: &'static str) -> Result<(), TrackerError> {
        match inner.lifecycle {
            Lifecycle::Ready => Ok(()),
            Lifecycle::Uninitialized => {
                error!("session tracker must be initialized before calling `{}`", operation);
                Err(TrackerError::NotInitialized { operation })
            }
            Lifecycle::Failed => Err(TrackerError::Unusable),
        }
    }

    fn enter(&self, operation: &'static str) -> Result<CriticalSection<'_>, TrackerError> {
        let current = thread::current().id();
        if *lock_owner(&self.owner) == Some(current) {
            error!(
                "{}: misuse detected, accessing the session tracker from its listener or store callbacks is not allowed",
                operation
            );
            return Err(TrackerError::Reentrant { operation });
        }

        let inner = self.lock_inner();
        *lock_owner(&self.owner) = Some(current);
        Ok(CriticalSection {
            inner,
            owner: &self.owner,
        })
    }

    fn lock_inner(&self) -> MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("Session tracker lock poisoned by a panicking listener, recovering");
            poisoned.into_inner()
        })
    }

    fn publish(&self, inner: &TrackerInner) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = inner.sessions.clone();
    }

    fn notify(&self, f: impl Fn(&dyn TrackerListener)) {
        for listener in &self.listeners {
            f(listener.as_ref());
        }
    }
}
