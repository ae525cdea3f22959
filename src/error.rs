//! Typed errors raised by the customization core.
//!
//! The executor and the CLI work with `anyhow::Error`; every variant here
//! converts into it through `?` and can be recovered with `downcast_ref`.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::program::Step;

/// Errors raised by programs, the boot driver and the patch phases.
#[derive(Debug, Error)]
pub enum Error {
    // ── Boot session ─────────────────────────────────────────────────────

    /// The console reported that the entered password was rejected.
    #[error("login as '{username}' failed: incorrect password (console said: {line})")]
    Authentication { username: String, line: String },

    /// The dead-end pattern matched; the emulator was stopped.
    #[error("the emulator is stuck: {line}")]
    DeadEnd { line: String },

    /// The emulator exited while programs were still pending.
    #[error("the emulator exited ({status}) before {} finished", .pending.join(", "))]
    ProcessDied { status: String, pending: Vec<String> },

    /// A program reached a state without a registered transition.
    #[error("program '{program}' reached unknown state '{state}'; history: {}", render_history(.history))]
    UnknownState {
        program: String,
        state: String,
        history: Vec<Step>,
    },

    // ── Disk and file phases ─────────────────────────────────────────────

    /// Disk images can only grow.
    #[error("cannot shrink {} from {current} to {requested} bytes", .path.display())]
    UnsupportedShrink {
        path: PathBuf,
        current: u64,
        requested: u64,
    },

    #[error("source not found: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    // ── Configuration ────────────────────────────────────────────────────

    #[error("script '{0}' must not be empty")]
    EmptyScript(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn process_died(status: Option<ExitStatus>, pending: Vec<String>) -> Self {
        let status = match status {
            Some(status) => status.to_string(),
            None => "unknown status".to_string(),
        };
        Error::ProcessDied { status, pending }
    }

    /// Whether this error ends a boot session (as opposed to a single operation).
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Error::Authentication { .. }
                | Error::DeadEnd { .. }
                | Error::ProcessDied { .. }
                | Error::UnknownState { .. }
        )
    }
}

fn render_history(history: &[Step]) -> String {
    if history.is_empty() {
        return "(empty)".to_string();
    }
    history
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_state_message_carries_history() {
        let err = Error::UnknownState {
            program: "login".into(),
            state: "9/4".into(),
            history: vec![Step {
                from: Some("1/4".into()),
                line: "host login:".into(),
                to: Some("9/4".into()),
            }],
        };
        let msg = err.to_string();
        assert!(msg.contains("'9/4'"));
        assert!(msg.contains("host login:"));
    }

    #[test]
    fn test_session_fatal_classification() {
        assert!(Error::DeadEnd { line: "x".into() }.is_session_fatal());
        assert!(!Error::MissingSource(PathBuf::from("/a")).is_session_fatal());
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = Error::EmptyScript("setup".into()).into();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::EmptyScript(name)) if name == "setup"
        ));
    }
}
