//! Client to server messages.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Signal number that forces the running program to be killed.
pub const SIGKILL: i32 = 9;

/// A source file submitted with the init request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Optional file name. Informational only, the server derives its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// File contents.
    #[serde(default)]
    pub content: String,
}

/// The first frame of every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitRequest {
    /// Always `init`.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Language identifier, matched exactly against the recipe table.
    #[serde(default)]
    pub language: String,
    /// Advisory version, echoed back in the `runtime` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Submitted files. Only the first one is executed.
    #[serde(default)]
    pub files: Vec<SourceFile>,
    /// Single-file shorthand used by older clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl InitRequest {
    /// Build an init request for a single source file.
    pub fn new(language: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            message_type: "init".to_string(),
            language: language.into(),
            version: None,
            files: vec![SourceFile {
                name: None,
                content: content.into(),
            }],
            code: None,
        }
    }

    /// Set the advisory version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Decode a handshake frame. Anything that is not a well-formed `init`
    /// message is rejected.
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        let request: InitRequest = serde_json::from_str(text)?;
        if request.message_type != "init" {
            return Err(ProtocolError::unexpected_type(request.message_type));
        }
        Ok(request)
    }

    /// The source text to execute: the first file, falling back to `code`.
    pub fn source(&self) -> &str {
        match self.files.first() {
            Some(file) => &file.content,
            None => self.code.as_deref().unwrap_or(""),
        }
    }

    /// The version to echo back, `fallback` when the client sent none.
    pub fn version_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self.version.as_deref() {
            Some(version) if !version.is_empty() => version,
            _ => fallback,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignalValue {
    Number(i64),
    Name(String),
}

impl SignalValue {
    fn number(&self) -> Option<i32> {
        match self {
            SignalValue::Number(n) => i32::try_from(*n).ok(),
            SignalValue::Name(name) => match name.trim() {
                "SIGKILL" | "KILL" => Some(SIGKILL),
                other => other.parse().ok(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClientMessage {
    #[serde(rename = "type", default)]
    message_type: String,
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    signal: Option<SignalValue>,
}

/// Steady-state client frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Bytes destined for the program's standard input.
    Stdin(String),
    /// A signal request, `9` forces a kill.
    Signal(i32),
    /// Decodable but not actionable. The session ignores it.
    Ignored,
}

impl ClientMessage {
    /// Decode a steady-state frame.
    ///
    /// Unknown message types and non-stdin data frames decode to
    /// [`ClientMessage::Ignored`]; only undecodable JSON is an error.
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        let raw: RawClientMessage = serde_json::from_str(text)?;
        let message = match raw.message_type.as_str() {
            "data" if raw.stream.as_deref() == Some("stdin") => {
                ClientMessage::Stdin(raw.data.unwrap_or_default())
            }
            "signal" => match raw.signal.as_ref().and_then(SignalValue::number) {
                Some(signal) => ClientMessage::Signal(signal),
                None => ClientMessage::Ignored,
            },
            _ => ClientMessage::Ignored,
        };
        Ok(message)
    }

    /// Whether this frame asks for the program to be force-killed.
    pub fn is_kill(&self) -> bool {
        matches!(self, ClientMessage::Signal(SIGKILL))
    }
}
