//! Session lifecycle state machine.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    AwaitingInit,
    Compiling,
    Running,
    Closed,
    /// Absorbing state for protocol and infrastructure failures.
    Failed,
}

/// Things that move a session forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A valid init arrived and the recipe compiles.
    InitCompiled,
    /// A valid init arrived and the recipe runs directly.
    InitInterpreted,
    CompileSucceeded,
    /// The compiler reported a non-zero exit. Reported as an `exit`, not an error.
    CompileFailed,
    RunFinished,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal session transition: {event:?} in state {from}")]
pub struct IllegalTransition {
    pub from: SessionState,
    pub event: SessionEvent,
}

impl SessionState {
    pub fn transition(self, event: SessionEvent) -> Result<SessionState, IllegalTransition> {
        use SessionEvent::*;
        use SessionState::*;

        let next = match (self, event) {
            (AwaitingInit, InitCompiled) => Compiling,
            (AwaitingInit, InitInterpreted) => Running,
            (Compiling, CompileSucceeded) => Running,
            (Compiling, CompileFailed) => Closed,
            (Running, RunFinished) => Closed,
            (state, Failure) if !state.is_terminal() => Failed,
            (from, event) => return Err(IllegalTransition { from, event }),
        };
        Ok(next)
    }

    /// Only a running program has a stdin to write to.
    pub fn accepts_stdin(self) -> bool {
        self == SessionState::Running
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::AwaitingInit => "awaiting-init",
            SessionState::Compiling => "compiling",
            SessionState::Running => "running",
            SessionState::Closed => "closed",
            SessionState::Failed => "error",
        };
        f.write_str(name)
    }
}
