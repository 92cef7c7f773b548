//! # Session Tracker
//!
//! Tracks the lifecycle of login sessions (one per user identity) as a
//! persisted finite state machine, and binds session-scoped resources to the
//! transitions of that machine.
//!
//! ## Architecture Overview
//!
//! - **[`session`]**: the state machine engine: session model, transition
//!   tables, the durable record store, the listener protocol, and the
//!   [`SessionTracker`] that ties them together
//! - **[`scope`]**: per-session resource containers and the [`ScopeBinder`]
//!   listener that opens and closes them as sessions become ACTIVE or leave it
//! - **[`cli`]**: command line front end and configuration discovery
//!
//! ## State machine
//!
//! ```text
//! LOGIN             : INACTIVE -> ACTIVE
//! LOGOUT            : ACTIVE   -> INACTIVE
//! LOGOUT_AND_FORGET : ACTIVE   -> FORGOTTEN   (terminal, record removed)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use session_tracker::{
//!     DefaultTransitions, JsonFileStore, ScopeBinder, SessionId, SessionTracker, TrackerConfig,
//! };
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let binder = Arc::new(ScopeBinder::new());
//!     let tracker = SessionTracker::new(
//!         JsonFileStore::new("sessions.json"),
//!         DefaultTransitions,
//!         TrackerConfig::default(),
//!     )
//!     .with_listener(binder.clone());
//!
//!     tracker.initialize()?;
//!
//!     let user = SessionId::new("alice")?;
//!     tracker.login(&user)?;
//!     assert!(binder.get_scope(&user).is_some());
//!     Ok(())
//! }
//! ```

/// Session state machine, persistence, and the tracker engine.
pub mod session;

/// Session-scoped resource containers bound to tracker notifications.
pub mod scope;

/// Environment constants and path utilities.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use scope::{ScopeBinder, ScopeId, SessionScope};
pub use session::{
    DefaultTransitions, InMemoryStore, JsonFileStore, LoginOutcome, RecordingListener,
    SessionEvent, SessionId, SessionRecord, SessionState, SessionStore, SessionTracker,
    StaticTransitions, StoreError, TrackerConfig, TrackerError, TrackerListener,
    TrackerNotification, Transition, TransitionsSupplier,
};
