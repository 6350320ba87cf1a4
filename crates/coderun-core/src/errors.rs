//! Error types for the execution session engine
//!
//! Only failures of the sandbox itself are errors here. A program that fails
//! to compile, exits non-zero or gets killed is an expected outcome and is
//! reported to the client as an `exit` event, never through these types.

use coderun_types::ProtocolError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Init timeout: no init message within {0:?}")]
    InitTimeout(Duration),
    #[error("Invalid init message: {0}")]
    InvalidInit(#[from] ProtocolError),
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("No code provided")]
    EmptySource,
    #[error("{context}: {source}")]
    Workspace {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Container {
        context: &'static str,
        #[source]
        source: Box<EngineError>,
    },
    #[error("Bollard (Docker client) error: {0}")]
    BollardError(#[from] bollard::errors::Error),
    #[error("Container runtime error: {0}")]
    Runtime(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

impl EngineError {
    pub fn workspace(context: &'static str, source: std::io::Error) -> Self {
        EngineError::Workspace { context, source }
    }

    /// Attach the failed container action to a lower level error.
    pub fn container(context: &'static str, source: EngineError) -> Self {
        EngineError::Container {
            context,
            source: Box::new(source),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        EngineError::Runtime(message.into())
    }

    /// Text for the `error` event. Internal details stay in the server log.
    pub fn client_message(&self) -> String {
        match self {
            EngineError::InitTimeout(_) => "Init timeout".to_string(),
            EngineError::InvalidInit(_) => "Invalid init message".to_string(),
            EngineError::UnsupportedLanguage(language) => {
                format!("Unsupported language: {}", language)
            }
            EngineError::EmptySource => "No code provided".to_string(),
            EngineError::Workspace { context, .. } | EngineError::Container { context, .. } => {
                context.to_string()
            }
            EngineError::BollardError(bollard::errors::Error::DockerResponseServerError {
                ..
            })
            | EngineError::Runtime(_) => "Container runtime error".to_string(),
            EngineError::BollardError(_) => "Failed to connect to Docker".to_string(),
            EngineError::Config(_) => "Server misconfigured".to_string(),
            EngineError::Transport(_) => "Connection error".to_string(),
        }
    }

    /// Whether the container runtime reported that the object does not
    /// exist or is already in the requested state.
    pub fn is_benign_conflict(&self) -> bool {
        match self {
            EngineError::BollardError(bollard::errors::Error::DockerResponseServerError {
                status_code,
                ..
            }) => matches!(status_code, 304 | 404 | 409),
            EngineError::Container { source, .. } => source.is_benign_conflict(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
