//! Server to client events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution stage of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Optional compilation step.
    Compile,
    /// Interactive program run.
    Run,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Compile => write!(f, "compile"),
            Stage::Run => write!(f, "run"),
        }
    }
}

/// Which standard stream a `data` event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Events sent from the server to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    /// The init request was accepted.
    Runtime { language: String, version: String },
    /// A stage has started.
    Stage { stage: Stage },
    /// Program or compiler output.
    Data { stream: OutputStream, data: String },
    /// A stage finished with the given exit code.
    Exit { stage: Stage, code: i64 },
    /// The session failed. Always the last event.
    Error { message: String },
}

impl ServerEvent {
    pub fn runtime(language: impl Into<String>, version: impl Into<String>) -> Self {
        ServerEvent::Runtime {
            language: language.into(),
            version: version.into(),
        }
    }

    pub fn stage(stage: Stage) -> Self {
        ServerEvent::Stage { stage }
    }

    /// Output event from raw bytes. Invalid UTF-8 is replaced, the client
    /// renders text.
    pub fn output(stream: OutputStream, bytes: &[u8]) -> Self {
        ServerEvent::Data {
            stream,
            data: String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    pub fn exit(stage: Stage, code: i64) -> Self {
        ServerEvent::Exit { stage, code }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Whether no further events follow this one in a session.
    pub fn is_terminal(&self) -> bool {
        match self {
            ServerEvent::Error { .. } => true,
            ServerEvent::Exit { stage, code } => *stage == Stage::Run || *code != 0,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shapes() {
        assert_eq!(
            serde_json::to_value(ServerEvent::runtime("python", "3.10.0")).unwrap(),
            json!({"type": "runtime", "language": "python", "version": "3.10.0"})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::stage(Stage::Compile)).unwrap(),
            json!({"type": "stage", "stage": "compile"})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::output(OutputStream::Stdout, b"2\n")).unwrap(),
            json!({"type": "data", "stream": "stdout", "data": "2\n"})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::exit(Stage::Run, 137)).unwrap(),
            json!({"type": "exit", "stage": "run", "code": 137})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::error("Init timeout")).unwrap(),
            json!({"type": "error", "message": "Init timeout"})
        );
    }

    #[test]
    fn test_output_replaces_invalid_utf8() {
        let event = ServerEvent::output(OutputStream::Stderr, &[b'o', b'k', 0xff]);
        assert_eq!(
            event,
            ServerEvent::Data {
                stream: OutputStream::Stderr,
                data: "ok\u{fffd}".to_string()
            }
        );
    }

    #[test]
    fn test_terminal_events() {
        assert!(ServerEvent::error("boom").is_terminal());
        assert!(ServerEvent::exit(Stage::Run, 0).is_terminal());
        assert!(ServerEvent::exit(Stage::Compile, 1).is_terminal());
        assert!(!ServerEvent::exit(Stage::Compile, 0).is_terminal());
        assert!(!ServerEvent::stage(Stage::Run).is_terminal());
    }
}
