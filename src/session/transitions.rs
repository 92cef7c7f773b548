use crate::session::types::{SessionEvent, SessionId, SessionState};
use std::collections::HashSet;

/// A legal state machine rule: consuming `event` walks the session along `state_path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub event: SessionEvent,
    state_path: Vec<SessionState>,
}

impl Transition {
    /// Single-hop rule `from -> to`
    pub fn new(event: SessionEvent, from: SessionState, to: SessionState) -> Self {
        Self {
            event,
            state_path: vec![from, to],
        }
    }

    /// Multi-hop rule; every intermediate state is reported to listeners
    pub fn with_path(event: SessionEvent, state_path: impl Into<Vec<SessionState>>) -> Self {
        Self {
            event,
            state_path: state_path.into(),
        }
    }

    pub fn state_path(&self) -> &[SessionState] {
        &self.state_path
    }

    pub fn from(&self) -> Option<SessionState> {
        self.state_path.first().copied()
    }

    pub fn to(&self) -> Option<SessionState> {
        self.state_path.last().copied()
    }
}

/// Rejected transition table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("no state transitions defined")]
    Empty,
    #[error("transition for {event} must have at least two states, got {len}")]
    PathTooShort { event: SessionEvent, len: usize },
    #[error("transition for {event} repeats state {state} in consecutive steps")]
    RepeatedState {
        event: SessionEvent,
        state: SessionState,
    },
    #[error("transition for {event} starts in terminal state {state}")]
    StartsInTerminal {
        event: SessionEvent,
        state: SessionState,
    },
    #[error("transition for {event} continues past terminal state {state}")]
    PastTerminal {
        event: SessionEvent,
        state: SessionState,
    },
    #[error("ambiguous transitions for {event} from {from}")]
    Ambiguous {
        event: SessionEvent,
        from: SessionState,
    },
}

/// Source of the legal transitions for a session
pub trait TransitionsSupplier: Send + Sync {
    fn transitions_for(&self, session_id: &SessionId) -> Vec<Transition>;
}

impl<F> TransitionsSupplier for F
where
    F: Fn(&SessionId) -> Vec<Transition> + Send + Sync,
{
    fn transitions_for(&self, session_id: &SessionId) -> Vec<Transition> {
        self(session_id)
    }
}

/// The same table for every session
#[derive(Debug, Clone)]
pub struct StaticTransitions(Vec<Transition>);

impl StaticTransitions {
    pub fn new(transitions: impl IntoIterator<Item = Transition>) -> Self {
        Self(transitions.into_iter().collect())
    }
}

impl TransitionsSupplier for StaticTransitions {
    fn transitions_for(&self, _session_id: &SessionId) -> Vec<Transition> {
        self.0.clone()
    }
}

/// Login/logout table:
///
/// ```text
/// LOGIN             : INACTIVE -> ACTIVE
/// LOGOUT            : ACTIVE   -> INACTIVE
/// LOGOUT_AND_FORGET : ACTIVE   -> FORGOTTEN
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransitions;

impl TransitionsSupplier for DefaultTransitions {
    fn transitions_for(&self, _session_id: &SessionId) -> Vec<Transition> {
        use SessionEvent::*;
        use SessionState::*;
        vec![
            Transition::new(Login, Inactive, Active),
            Transition::new(Logout, Active, Inactive),
            Transition::new(LogoutAndForget, Active, Forgotten),
        ]
    }
}

/// Check a table for empty, degenerate, or ambiguous rules. A terminal state
/// may only end a path.
pub fn validate_transitions(transitions: &[Transition]) -> Result<(), TransitionError> {
    if transitions.is_empty() {
        return Err(TransitionError::Empty);
    }

    let mut seen = HashSet::new();
    for transition in transitions {
        let path = transition.state_path();
        if path.len() < 2 {
            return Err(TransitionError::PathTooShort {
                event: transition.event,
                len: path.len(),
            });
        }
        if let Some(pair) = path.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(TransitionError::RepeatedState {
                event: transition.event,
                state: pair[0],
            });
        }
        if path[0].is_terminal() {
            return Err(TransitionError::StartsInTerminal {
                event: transition.event,
                state: path[0],
            });
        }
        if let Some(&state) = path[..path.len() - 1].iter().find(|state| state.is_terminal()) {
            return Err(TransitionError::PastTerminal {
                event: transition.event,
                state,
            });
        }
        if !seen.insert((transition.event, path[0])) {
            return Err(TransitionError::Ambiguous {
                event: transition.event,
                from: path[0],
            });
        }
    }

    Ok(())
}

/// Find the rule matching `event` from `current`
pub fn find_transition(
    transitions: &[Transition],
    event: SessionEvent,
    current: SessionState,
) -> Option<&Transition> {
    transitions
        .iter()
        .find(|transition| transition.event == event && transition.from() == Some(current))
}
