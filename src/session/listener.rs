use crate::session::types::{SessionId, SessionRecord, SessionState};

/// Observer of session tracker notifications.
///
/// Callbacks run synchronously on the thread that performed the tracker
/// operation, while the tracker's critical section is held, and always after
/// the corresponding store write has completed. Calling back into the tracker
/// from a callback is rejected as reentrant.
pub trait TrackerListener: Send + Sync {
    /// Fired once after `initialize`, with every tracked record
    fn on_tracker_initialized(&self, _records: &[SessionRecord]) {}

    fn on_tracking_started(&self, session_id: &SessionId, state: SessionState);

    fn on_state_changed(
        &self,
        session_id: &SessionId,
        old_state: SessionState,
        new_state: SessionState,
    );

    /// Fired after the record was removed from the store and from memory
    fn on_tracking_stopped(&self, session_id: &SessionId, state: SessionState);

    fn on_all_tracking_stopped(&self, records: &[SessionRecord]);
}

/// Tracker notification as a value, handy for recording and forwarding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerNotification {
    Initialized(Vec<SessionRecord>),
    TrackingStarted(SessionId, SessionState),
    StateChanged(SessionId, SessionState, SessionState),
    TrackingStopped(SessionId, SessionState),
    AllTrackingStopped(Vec<SessionRecord>),
}

/// Listener that appends every notification to a shared log
#[derive(Debug, Default)]
pub struct RecordingListener {
    notifications: std::sync::Mutex<Vec<TrackerNotification>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<TrackerNotification> {
        self.lock().clone()
    }

    /// Return and clear the recorded notifications
    pub fn take(&self) -> Vec<TrackerNotification> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TrackerNotification>> {
        self.notifications
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn push(&self, notification: TrackerNotification) {
        self.lock().push(notification);
    }
}

impl TrackerListener for RecordingListener {
    fn on_tracker_initialized(&self, records: &[SessionRecord]) {
        self.push(TrackerNotification::Initialized(records.to_vec()));
    }

    fn on_tracking_started(&self, session_id: &SessionId, state: SessionState) {
        self.push(TrackerNotification::TrackingStarted(session_id.clone(), state));
    }

    fn on_state_changed(
        &self,
        session_id: &SessionId,
        old_state: SessionState,
        new_state: SessionState,
    ) {
        self.push(TrackerNotification::StateChanged(
            session_id.clone(),
            old_state,
            new_state,
        ));
    }

    fn on_tracking_stopped(&self, session_id: &SessionId, state: SessionState) {
        self.push(TrackerNotification::TrackingStopped(session_id.clone(), state));
    }

    fn on_all_tracking_stopped(&self, records: &[SessionRecord]) {
        self.push(TrackerNotification::AllTrackingStopped(records.to_vec()));
    }
}
