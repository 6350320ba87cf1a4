// src/runtime/docker.rs
use async_trait::async_trait;
use bollard::container::{AttachContainerResults, LogOutput};
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    AttachContainerOptions as BollardAttachContainerOptionsQuery,
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    KillContainerOptions as BollardKillContainerOptionsQuery,
    LogsOptions as BollardLogsOptionsQuery,
    RemoveContainerOptions as BollardRemoveContainerOptionsQuery,
    StartContainerOptions as BollardStartContainerOptionsQuery,
    WaitContainerOptions as BollardWaitContainerOptionsQuery,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;

use super::{AttachedIo, ContainerRuntime, ContainerSpec, LogChunk};
use crate::errors::EngineError;

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// [`ContainerRuntime`] backed by the Docker Engine API.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to `host` (`unix://...`, `tcp://...` or `http://...`), or to the
    /// local daemon when `None`.
    pub fn connect(host: Option<&str>) -> Result<Self, EngineError> {
        let docker = match host {
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_socket(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
            }
            Some(host) => {
                Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
            }
            None => Docker::connect_with_local_defaults()?,
        };
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Verify the daemon answers.
    pub async fn ping(&self) -> Result<(), EngineError> {
        self.docker.ping().await?;
        Ok(())
    }
}

fn ignore_benign(result: Result<(), EngineError>) -> Result<(), EngineError> {
    match result {
        Err(e) if e.is_benign_conflict() => Ok(()),
        other => other,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let config = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.working_dir.clone()),
            labels: Some(spec.labels.clone()),
            tty: Some(spec.interactive),
            open_stdin: Some(spec.interactive),
            attach_stdin: Some(spec.interactive),
            attach_stdout: Some(spec.interactive),
            attach_stderr: Some(spec.interactive),
            host_config: Some(HostConfig {
                binds: Some(vec![spec.bind.clone()]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container = self
            .docker
            .create_container(None::<BollardCreateContainerOptionsQuery>, config)
            .await?;
        for warning in &container.warnings {
            log::warn!("Docker warning for container {}: {}", container.id, warning);
        }
        Ok(container.id)
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<BollardStartContainerOptionsQuery>)
            .await?;
        Ok(())
    }

    async fn attach(&self, id: &str) -> Result<AttachedIo, EngineError> {
        let options = BollardAttachContainerOptionsQuery {
            stream: true,
            stdin: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let AttachContainerResults { output, input } =
            self.docker.attach_container(id, Some(options)).await?;

        let output = output
            .map(|chunk| chunk.map(LogOutput::into_bytes).map_err(EngineError::from))
            .boxed();
        Ok(AttachedIo { output, input })
    }

    async fn wait(&self, id: &str) -> Result<i64, EngineError> {
        let options = BollardWaitContainerOptionsQuery {
            condition: "not-running".to_string(),
        };
        let mut wait_stream = self.docker.wait_container(id, Some(options));
        match wait_stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit status as an error.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(EngineError::runtime(format!(
                "wait stream for container {} ended unexpectedly",
                id
            ))),
        }
    }

    async fn logs(&self, id: &str) -> Result<Vec<LogChunk>, EngineError> {
        let mut output_stream = self.docker.logs(
            id,
            Some(BollardLogsOptionsQuery {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut chunks = Vec::new();
        while let Some(log_result) = output_stream.next().await {
            let chunk = match log_result? {
                LogOutput::StdOut { message } => LogChunk::Stdout(message),
                LogOutput::StdErr { message } => LogChunk::Stderr(message),
                LogOutput::Console { message } | LogOutput::StdIn { message } => {
                    LogChunk::Raw(message)
                }
            };
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    async fn kill(&self, id: &str) -> Result<(), EngineError> {
        let options = BollardKillContainerOptionsQuery {
            signal: "SIGKILL".to_string(),
        };
        let result = self
            .docker
            .kill_container(id, Some(options))
            .await
            .map_err(EngineError::from);
        ignore_benign(result)
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        let options = BollardRemoveContainerOptionsQuery {
            force: true,
            v: true,
            ..Default::default()
        };
        let result = self
            .docker
            .remove_container(id, Some(options))
            .await
            .map_err(EngineError::from);
        ignore_benign(result)
    }
}
