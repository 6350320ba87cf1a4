//! Configuration type definitions for the execution engine

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for session handling and container execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for the init message, counted from connection establishment.
    pub init_timeout_ms: u64,
    /// Parent directory for per-session working directories. Defaults to the
    /// system temp dir.
    pub work_dir_root: Option<PathBuf>,
    /// Name prefix of per-session working directories.
    pub work_dir_prefix: String,
    /// Largest payload of a single `data` event in the run stage.
    pub output_chunk_size: usize,
    /// How long output already in flight is still forwarded once the session
    /// starts shutting down.
    pub output_drain_grace_ms: u64,
    /// How long to wait for an exit status after a kill before giving up.
    pub stop_grace_ms: u64,
    /// Replaces the image of every recipe when set.
    pub image: Option<String>,
    /// Docker endpoint (`unix://` or `tcp://`). Local defaults when unset.
    pub docker_host: Option<String>,
    /// Capacity of the per-session outbound event channel.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: 1000,
            work_dir_root: None,
            work_dir_prefix: "code-exec-".to_string(),
            output_chunk_size: 1024,
            output_drain_grace_ms: 250,
            stop_grace_ms: 10_000,
            image: None,
            docker_host: None,
            event_buffer: 256,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn output_drain_grace(&self) -> Duration {
        Duration::from_millis(self.output_drain_grace_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Set the init deadline.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the parent directory of session working directories.
    pub fn with_work_dir_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_dir_root = Some(root.into());
        self
    }

    /// Set the run stage output chunk size.
    pub fn with_output_chunk_size(mut self, size: usize) -> Self {
        self.output_chunk_size = size;
        self
    }

    /// Set the output drain grace period.
    pub fn with_output_drain_grace(mut self, grace: Duration) -> Self {
        self.output_drain_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Set the stop grace period.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Override the image of every recipe.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the Docker endpoint.
    pub fn with_docker_host(mut self, host: impl Into<String>) -> Self {
        self.docker_host = Some(host.into());
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.init_timeout_ms == 0 {
            return Err(EngineError::Config(
                "init_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.output_chunk_size == 0 {
            return Err(EngineError::Config(
                "output_chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(EngineError::Config(
                "event_buffer must be greater than zero".to_string(),
            ));
        }
        if self.work_dir_prefix.contains('/') {
            return Err(EngineError::Config(format!(
                "work_dir_prefix must not contain '/': {}",
                self.work_dir_prefix
            )));
        }
        if let Some(image) = &self.image {
            if image.trim().is_empty() {
                return Err(EngineError::Config("image must not be empty".to_string()));
            }
        }
        Ok(())
    }
}
