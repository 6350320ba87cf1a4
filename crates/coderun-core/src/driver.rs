//! Container lifecycle for the compile and run stages.

use std::collections::HashMap;
use std::sync::Arc;

use crate::demux;
use crate::errors::EngineError;
use crate::recipes::{Recipe, CONTAINER_WORK_DIR};
use crate::runtime::{AttachedIo, ContainerRuntime, ContainerSpec, LogChunk, SESSION_LABEL};
use crate::workspace::Workspace;

/// Owns a created container and force-removes it exactly once.
///
/// Call [`ContainerGuard::release`] on every normal path. If the guard is
/// dropped while still armed (a cancelled session future, a panic) removal is
/// scheduled on the current runtime instead.
pub struct ContainerGuard {
    runtime: Arc<dyn ContainerRuntime>,
    id: String,
    armed: bool,
}

impl ContainerGuard {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, id: String) -> Self {
        Self {
            runtime,
            id,
            armed: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn release(mut self) {
        self.armed = false;
        if let Err(e) = self.runtime.remove(&self.id).await {
            log::error!("Failed to remove container {}: {}", self.id, e);
        } else {
            log::debug!("Removed container {}", self.id);
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let runtime = self.runtime.clone();
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = runtime.remove(&id).await {
                        log::error!("Failed to remove container {}: {}", id, e);
                    }
                });
            }
            Err(_) => log::error!("Container {} leaked: no runtime to remove it", id),
        }
    }
}

/// Result of a compile container run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutcome {
    pub exit_code: i64,
    /// Compiler stdout and stderr, combined in log order.
    pub output: Vec<u8>,
}

/// Flatten a finished container's log into plain bytes.
pub fn combine_logs(chunks: &[LogChunk]) -> Vec<u8> {
    let mut combined = Vec::new();
    for chunk in chunks {
        match chunk {
            LogChunk::Stdout(bytes) | LogChunk::Stderr(bytes) => combined.extend_from_slice(bytes),
            LogChunk::Raw(bytes) => combined.extend(demux::demux(bytes)),
        }
    }
    combined
}

/// Cheap, shareable control handle of a running container.
#[derive(Clone)]
pub struct ContainerHandle {
    runtime: Arc<dyn ContainerRuntime>,
    id: String,
}

impl ContainerHandle {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, id: impl Into<String>) -> Self {
        Self {
            runtime,
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Exit code once the container leaves the running state.
    pub async fn wait(&self) -> Result<i64, EngineError> {
        self.runtime.wait(&self.id).await
    }

    /// Kill immediately. Safe after the container exited.
    pub async fn kill(&self) -> Result<(), EngineError> {
        self.runtime.kill(&self.id).await
    }
}

/// The interactive container of the run stage.
pub struct RunContainer {
    guard: ContainerGuard,
    io: Option<AttachedIo>,
}

impl RunContainer {
    pub fn id(&self) -> &str {
        self.guard.id()
    }

    pub fn handle(&self) -> ContainerHandle {
        ContainerHandle::new(self.guard.runtime.clone(), self.guard.id.clone())
    }

    /// Hand the attached stream pair to the I/O bridge. Only the first call
    /// returns it.
    pub fn take_io(&mut self) -> Option<AttachedIo> {
        self.io.take()
    }

    /// Detach and force-remove the container.
    pub async fn release(mut self) {
        drop(self.io.take());
        self.guard.release().await;
    }
}

/// Drives containers through the compile and run stages of one session.
#[derive(Clone)]
pub struct ContainerDriver {
    runtime: Arc<dyn ContainerRuntime>,
    session_id: String,
}

impl ContainerDriver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, session_id: impl Into<String>) -> Self {
        Self {
            runtime,
            session_id: session_id.into(),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    fn spec(
        &self,
        recipe: &Recipe,
        workspace: &Workspace,
        command: Vec<String>,
        interactive: bool,
    ) -> Result<ContainerSpec, EngineError> {
        let mut labels = HashMap::new();
        labels.insert(SESSION_LABEL.to_string(), self.session_id.clone());
        Ok(ContainerSpec {
            image: recipe.image.clone(),
            command,
            working_dir: CONTAINER_WORK_DIR.to_string(),
            bind: format!("{}:{}", workspace.bind_source()?, CONTAINER_WORK_DIR),
            interactive,
            labels,
        })
    }

    /// Compile the workspace source in a throwaway container.
    ///
    /// The container is removed before this returns, whatever happened. A
    /// non-zero exit code is a normal outcome; errors mean the sandbox failed.
    pub async fn run_compile(
        &self,
        recipe: &Recipe,
        workspace: &Workspace,
    ) -> Result<CompileOutcome, EngineError> {
        let command = recipe.compile_command(workspace.filename()).ok_or_else(|| {
            EngineError::runtime(format!("{} has no compile step", recipe.language))
        })?;
        let spec = self.spec(recipe, workspace, command, false)?;

        let id = self
            .runtime
            .create(&spec)
            .await
            .map_err(|e| EngineError::container("Failed to create compile container", e))?;
        let guard = ContainerGuard::new(self.runtime.clone(), id);
        log::debug!("[{}] compile container {} created", self.session_id, guard.id());

        let outcome = self.drive_compile(guard.id()).await;
        guard.release().await;
        outcome
    }

    async fn drive_compile(&self, id: &str) -> Result<CompileOutcome, EngineError> {
        self.runtime
            .start(id)
            .await
            .map_err(|e| EngineError::container("Failed to start compile container", e))?;

        let exit_code = self
            .runtime
            .wait(id)
            .await
            .map_err(|e| EngineError::container("Compile wait error", e))?;

        // Missing compiler output is not worth failing the session over.
        let output = match self.runtime.logs(id).await {
            Ok(chunks) => combine_logs(&chunks),
            Err(e) => {
                log::warn!("[{}] could not read compile logs: {}", self.session_id, e);
                Vec::new()
            }
        };

        Ok(CompileOutcome { exit_code, output })
    }

    /// Create the interactive container, attach to it and start it.
    ///
    /// On error nothing is left behind.
    pub async fn start_run(
        &self,
        recipe: &Recipe,
        workspace: &Workspace,
    ) -> Result<RunContainer, EngineError> {
        let command = recipe.run_command(workspace.filename());
        let spec = self.spec(recipe, workspace, command, true)?;

        let id = self
            .runtime
            .create(&spec)
            .await
            .map_err(|e| EngineError::container("Failed to create run container", e))?;
        let guard = ContainerGuard::new(self.runtime.clone(), id);

        // Attach before starting so no early output is lost.
        let io = match self.runtime.attach(guard.id()).await {
            Ok(io) => io,
            Err(e) => {
                guard.release().await;
                return Err(EngineError::container("Failed to attach to container", e));
            }
        };
        log::debug!("[{}] container {} attached, starting", self.session_id, guard.id());

        if let Err(e) = self.runtime.start(guard.id()).await {
            drop(io);
            guard.release().await;
            return Err(EngineError::container("Failed to start run container", e));
        }

        Ok(RunContainer {
            guard,
            io: Some(io),
        })
    }
}
