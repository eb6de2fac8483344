//! Error types for the termsense engine.

use thiserror::Error;

/// Main error type for session and manager operations.
///
/// Every variant maps to a stable machine-readable kind via [`Error::kind`],
/// which is what crosses the RPC boundary. Parser failures never appear
/// here: they are contained inside dispatch and treated as non-matches.
#[derive(Debug, Error)]
pub enum Error {
    /// Session has not been started yet
    #[error("Session not started")]
    NotStarted,

    /// Session was already started
    #[error("Session already started")]
    AlreadyStarted,

    /// Session has exited
    #[error("Session has exited")]
    SessionExited,

    /// Operation requires a different session state
    #[error("Operation requires state {required}, session is {actual}")]
    WrongState {
        /// State the operation requires
        required: crate::parser::SessionState,
        /// State the session was actually in
        actual: crate::parser::SessionState,
    },

    /// Timed out waiting for a state
    #[error("Timed out after {0}ms waiting for state {1}")]
    WaitTimeout(u64, crate::parser::SessionState),

    /// The session entered `error` or `exited` while a waiter was pending
    #[error("Session ended ({0}) while waiting for {1}")]
    SessionEndedWhileWaiting(crate::parser::SessionState, crate::parser::SessionState),

    /// `exec` never observed the session leaving `idle`
    #[error("Command was submitted but the session never left idle within {0}ms")]
    ExecLeaveIdleTimeout(u64),

    /// `exec` did not observe the session returning to `idle`
    #[error("Command did not complete within {0}ms")]
    ExecTimeout(u64),

    /// No confirmation is pending
    #[error("No pending confirmation")]
    NoPendingConfirm,

    /// Session quota reached
    #[error("Session limit reached (max: {0})")]
    SessionLimitReached(usize),

    /// Unknown session id
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Unknown preset name
    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    /// Child process could not be spawned
    #[error("Failed to spawn child process: {0}")]
    Spawn(String),

    /// PTY transport error
    #[error("PTY error: {0}")]
    Pty(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable kind for the RPC boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotStarted => "session_not_started",
            Error::AlreadyStarted => "session_already_started",
            Error::SessionExited => "session_exited",
            Error::WrongState { .. } => "wrong_state",
            Error::WaitTimeout(..) => "wait_timeout",
            Error::SessionEndedWhileWaiting(..) => "session_ended_while_waiting",
            Error::ExecLeaveIdleTimeout(..) => "exec_leave_idle_timeout",
            Error::ExecTimeout(..) => "exec_timeout",
            Error::NoPendingConfirm => "no_pending_confirmation",
            Error::SessionLimitReached(..) => "max_sessions_reached",
            Error::UnknownSession(..) => "unknown_session",
            Error::UnknownPreset(..) => "unknown_preset",
            Error::Spawn(..) => "spawn_failure",
            Error::Pty(..) => "pty_error",
            Error::Io(..) => "io_error",
        }
    }
}

/// Result type alias using the engine error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SessionState;

    #[test]
    fn test_kind_is_stable() {
        assert_eq!(Error::NotStarted.kind(), "session_not_started");
        assert_eq!(Error::NoPendingConfirm.kind(), "no_pending_confirmation");
        assert_eq!(Error::SessionLimitReached(10).kind(), "max_sessions_reached");
        assert_eq!(
            Error::UnknownSession("session-x".into()).kind(),
            "unknown_session"
        );
        assert_eq!(Error::UnknownPreset("vim".into()).kind(), "unknown_preset");
    }

    #[test]
    fn test_wrong_state_message() {
        let err = Error::WrongState {
            required: SessionState::Idle,
            actual: SessionState::Thinking,
        };
        assert_eq!(
            err.to_string(),
            "Operation requires state idle, session is thinking"
        );
        assert_eq!(err.kind(), "wrong_state");
    }

    #[test]
    fn test_timeout_messages() {
        let err = Error::WaitTimeout(5000, SessionState::Idle);
        assert!(err.to_string().contains("5000ms"));

        let err = Error::ExecLeaveIdleTimeout(5000);
        assert_eq!(err.kind(), "exec_leave_idle_timeout");

        let err = Error::ExecTimeout(30000);
        assert_eq!(err.kind(), "exec_timeout");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert_eq!(err.kind(), "io_error");
        assert!(err.to_string().contains("gone"));
    }
}
