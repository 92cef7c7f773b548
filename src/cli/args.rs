//! Command line argument parsing
//!
//! Subcommands drive the session tracker the way a login screen would:
//! - `login`: track a new session as ACTIVE, or re-activate a known one
//! - `logout`: move an ACTIVE session to INACTIVE
//! - `forget`: log out and forget a session (terminal)
//! - `untrack`: stop tracking a session without changing its state
//! - `list`: show tracked sessions
//! - `reset`: delete every session record
//! - `show-config` / `init-config`: configuration discovery helpers

use crate::SessionEvent;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "session-tracker")]
#[command(author = "Session Tracker Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Persisted login session state machine with session-scoped resources")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Session store file, overrides the configured one
    #[arg(short = 's', long = "store", global = true)]
    pub store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Log a user in, tracking the session if it is new
    Login {
        /// Session (user) id
        session_id: String,
    },
    /// Log a user out, keeping the session record
    Logout {
        /// Session (user) id
        session_id: String,
    },
    /// Log a user out and forget the session
    Forget {
        /// Session (user) id
        session_id: String,
    },
    /// Stop tracking a session without a state change
    Untrack {
        /// Session (user) id
        session_id: String,
    },
    /// List tracked sessions
    List,
    /// Delete all session records
    Reset,
    /// Show configuration discovery information
    ShowConfig,
    /// Create a default configuration file in the home directory
    InitConfig,
}

impl Commands {
    /// Event consumed by the command, for commands that map to one
    pub fn event(&self) -> Option<SessionEvent> {
        match self {
            Commands::Logout { .. } => Some(SessionEvent::Logout),
            Commands::Forget { .. } => Some(SessionEvent::LogoutAndForget),
            _ => None,
        }
    }

    /// Whether the command needs an initialized tracker
    pub fn needs_tracker(&self) -> bool {
        !matches!(self, Commands::ShowConfig | Commands::InitConfig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login() {
        let args = Args::try_parse_from(["session-tracker", "login", "alice"]).unwrap();
        assert!(matches!(args.command, Commands::Login { ref session_id } if session_id == "alice"));
        assert!(!args.verbose);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "session-tracker",
            "logout",
            "bob",
            "--verbose",
            "--store",
            "/tmp/sessions.json",
        ])
        .unwrap();

        assert!(args.verbose);
        assert_eq!(args.store, Some(PathBuf::from("/tmp/sessions.json")));
        assert_eq!(args.command.event(), Some(SessionEvent::Logout));
    }

    #[test]
    fn test_command_events() {
        let forget = Commands::Forget {
            session_id: "u1".to_string(),
        };
        assert_eq!(forget.event(), Some(SessionEvent::LogoutAndForget));
        assert_eq!(Commands::List.event(), None);
        assert!(Commands::Reset.needs_tracker());
        assert!(!Commands::ShowConfig.needs_tracker());
    }

    #[test]
    fn test_missing_session_id_is_rejected() {
        assert!(Args::try_parse_from(["session-tracker", "login"]).is_err());
    }
}
