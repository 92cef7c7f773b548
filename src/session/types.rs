use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a tracked session (one per logged-in user identity)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

/// Rejected session id value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidSessionId {
    #[error("session id can not be empty")]
    Empty,
    #[error("session id can not be blank")]
    Blank,
}

impl SessionId {
    /// Create a session id, rejecting empty and whitespace-only values
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidSessionId> {
        let value = value.into();
        if value.is_empty() {
            return Err(InvalidSessionId::Empty);
        }
        if value.trim().is_empty() {
            return Err(InvalidSessionId::Blank);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = InvalidSessionId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for SessionId {
    type Error = InvalidSessionId;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl std::str::FromStr for SessionId {
    type Err = InvalidSessionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Inactive,
    Active,
    /// Terminal: no event applies once a session gets here
    Forgotten,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Forgotten)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Inactive => "INACTIVE",
            SessionState::Active => "ACTIVE",
            SessionState::Forgotten => "FORGOTTEN",
        };
        f.pad(name)
    }
}

/// Events that drive the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEvent {
    Login,
    Logout,
    LogoutAndForget,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionEvent::Login => "LOGIN",
            SessionEvent::Logout => "LOGOUT",
            SessionEvent::LogoutAndForget => "LOGOUT_AND_FORGET",
        };
        f.pad(name)
    }
}

/// Persisted `{session_id, state}` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub state: SessionState,
}

impl SessionRecord {
    pub fn new(session_id: SessionId, state: SessionState) -> Self {
        Self { session_id, state }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_validation() {
        assert_eq!(SessionId::new(""), Err(InvalidSessionId::Empty));
        assert_eq!(SessionId::new("  \t"), Err(InvalidSessionId::Blank));
        assert_eq!(SessionId::new("u1").unwrap().as_str(), "u1");
    }

    #[test]
    fn test_session_id_equality_by_value() {
        let a = SessionId::new("user").unwrap();
        let b: SessionId = "user".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_record_serialization_format() {
        let record = SessionRecord::new(SessionId::new("u1").unwrap(), SessionState::Active);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, serde_json::json!({"session_id": "u1", "state": "ACTIVE"}));
    }

    #[test]
    fn test_blank_id_rejected_on_deserialize() {
        let result: Result<SessionRecord, _> =
            serde_json::from_str(r#"{"session_id": "   ", "state": "INACTIVE"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_only_forgotten_is_terminal() {
        assert!(SessionState::Forgotten.is_terminal());
        assert!(!SessionState::Active.is_terminal());
        assert!(!SessionState::Inactive.is_terminal());
    }
}
