//! Container runtime control API.
//!
//! The engine only talks to containers through [`ContainerRuntime`]. The
//! production implementation drives Docker; tests substitute a scripted one.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncWrite;

use crate::errors::EngineError;

pub mod docker;

pub use docker::DockerRuntime;

/// Label attached to every container, valued with the owning session id.
pub const SESSION_LABEL: &str = "coderun.session";

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: String,
    /// `host_path:container_path`, mounted read/write.
    pub bind: String,
    /// Allocate a pseudo-terminal and keep stdin open.
    pub interactive: bool,
    pub labels: HashMap<String, String>,
}

/// Output of the attached container, already merged by the TTY.
pub type OutputStream = Pin<Box<dyn Stream<Item = Result<Bytes, EngineError>> + Send>>;

/// Standard input of the attached container.
pub type InputSink = Pin<Box<dyn AsyncWrite + Send>>;

/// Interactive stream pair of a running container.
pub struct AttachedIo {
    pub output: OutputStream,
    pub input: InputSink,
}

impl fmt::Debug for AttachedIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachedIo").finish_non_exhaustive()
    }
}

/// One piece of a finished container's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogChunk {
    Stdout(Bytes),
    Stderr(Bytes),
    /// Bytes the client could not attribute to a stream. May still carry
    /// multiplexing headers.
    Raw(Bytes),
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container and return its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start(&self, id: &str) -> Result<(), EngineError>;

    /// Attach to stdin and the merged output of an interactive container.
    async fn attach(&self, id: &str) -> Result<AttachedIo, EngineError>;

    /// Block until the container is no longer running and return its exit
    /// code. A non-zero code is not an error.
    async fn wait(&self, id: &str) -> Result<i64, EngineError>;

    /// The complete log of a stopped container.
    async fn logs(&self, id: &str) -> Result<Vec<LogChunk>, EngineError>;

    /// Send SIGKILL. Killing a container that already exited succeeds.
    async fn kill(&self, id: &str) -> Result<(), EngineError>;

    /// Force-remove the container. Removing a missing container succeeds.
    async fn remove(&self, id: &str) -> Result<(), EngineError>;
}
