//! In-memory container runtime for engine tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};

use crate::errors::EngineError;
use crate::runtime::{AttachedIo, ContainerRuntime, ContainerSpec, LogChunk};

/// Exit code reported for a killed container.
pub const KILLED_EXIT_CODE: i64 = 137;

/// Runtime operation to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Create,
    Start,
    Attach,
    Wait,
    Logs,
}

/// What the scripted containers do.
#[derive(Debug, Clone, Default)]
pub struct Script {
    compile_exit: i64,
    compile_logs: Vec<LogChunk>,
    run_output: Vec<Bytes>,
    run_exit: i64,
    hold_until_killed: bool,
    hold_compile: bool,
    echo_stdin: bool,
    faults: Vec<Fault>,
}

impl Script {
    pub fn compile_exit(mut self, code: i64) -> Self {
        self.compile_exit = code;
        self
    }

    pub fn compile_logs(mut self, logs: Vec<LogChunk>) -> Self {
        self.compile_logs = logs;
        self
    }

    pub fn run_output<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.run_output = chunks
            .into_iter()
            .map(|chunk| Bytes::copy_from_slice(chunk.as_ref()))
            .collect();
        self
    }

    pub fn run_exit(mut self, code: i64) -> Self {
        self.run_exit = code;
        self
    }

    /// Keep the run container alive until it is killed.
    pub fn hold_until_killed(mut self) -> Self {
        self.hold_until_killed = true;
        self
    }

    /// Keep the compile container running until it is removed.
    pub fn hold_compile(mut self) -> Self {
        self.hold_compile = true;
        self
    }

    /// Echo everything written to stdin back on the output stream.
    pub fn echo_stdin(mut self) -> Self {
        self.echo_stdin = true;
        self
    }

    pub fn fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }
}

struct Container {
    spec: ContainerSpec,
    output_tx: Option<mpsc::UnboundedSender<Bytes>>,
    exit_tx: watch::Sender<Option<i64>>,
    exit_rx: watch::Receiver<Option<i64>>,
}

#[derive(Default)]
struct State {
    next_id: usize,
    containers: HashMap<String, Container>,
    created: Vec<ContainerSpec>,
    removed: Vec<String>,
    kills: usize,
    stdin: Vec<u8>,
}

/// [`ContainerRuntime`] whose containers follow a [`Script`].
pub struct ScriptedRuntime {
    script: Script,
    state: Arc<Mutex<State>>,
}

impl ScriptedRuntime {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            state: Arc::new(Mutex::new(State::default())),
        })
    }

    fn check(&self, fault: Fault) -> Result<(), EngineError> {
        if self.script.faults.contains(&fault) {
            Err(EngineError::runtime(format!("scripted {:?} failure", fault)))
        } else {
            Ok(())
        }
    }

    fn with_container<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Container) -> T,
    ) -> Result<T, EngineError> {
        let mut state = self.state.lock().unwrap();
        state
            .containers
            .get_mut(id)
            .map(f)
            .ok_or_else(|| EngineError::runtime(format!("no such container: {}", id)))
    }

    /// Specs of every container ever created, in order.
    pub fn created(&self) -> Vec<ContainerSpec> {
        self.state.lock().unwrap().created.clone()
    }

    /// Ids of containers created but not yet removed.
    pub fn live_containers(&self) -> Vec<String> {
        self.state.lock().unwrap().containers.keys().cloned().collect()
    }

    /// Ids passed to a successful removal, in order.
    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn kills(&self) -> usize {
        self.state.lock().unwrap().kills
    }

    /// Everything the session wrote to container stdin.
    pub fn stdin(&self) -> Vec<u8> {
        self.state.lock().unwrap().stdin.clone()
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.check(Fault::Create)?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("container-{}", state.next_id);
        let (exit_tx, exit_rx) = watch::channel(None);
        state.containers.insert(
            id.clone(),
            Container {
                spec: spec.clone(),
                output_tx: None,
                exit_tx,
                exit_rx,
            },
        );
        state.created.push(spec.clone());
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.check(Fault::Start)?;
        let script = &self.script;
        self.with_container(id, |container| {
            if !container.spec.interactive {
                if !script.hold_compile {
                    container.exit_tx.send_replace(Some(script.compile_exit));
                }
                return;
            }
            if let Some(tx) = &container.output_tx {
                for chunk in &script.run_output {
                    let _ = tx.send(chunk.clone());
                }
            }
            if !script.hold_until_killed {
                container.output_tx = None;
                container.exit_tx.send_replace(Some(script.run_exit));
            }
        })
    }

    async fn attach(&self, id: &str) -> Result<AttachedIo, EngineError> {
        self.check(Fault::Attach)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.with_container(id, |container| container.output_tx = Some(tx))?;

        let output = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok(chunk), rx))
        })
        .boxed();
        let input = ScriptedStdin {
            state: self.state.clone(),
            id: id.to_string(),
            echo: self.script.echo_stdin,
        };
        Ok(AttachedIo {
            output,
            input: Box::pin(input),
        })
    }

    async fn wait(&self, id: &str) -> Result<i64, EngineError> {
        self.check(Fault::Wait)?;
        let mut exit_rx = self.with_container(id, |container| container.exit_rx.clone())?;
        let code: Option<i64> = *exit_rx
            .wait_for(|code| code.is_some())
            .await
            .map_err(|_| EngineError::runtime("container vanished while waiting"))?;
        Ok(code.unwrap_or_default())
    }

    async fn logs(&self, id: &str) -> Result<Vec<LogChunk>, EngineError> {
        self.check(Fault::Logs)?;
        self.with_container(id, |_| self.script.compile_logs.clone())
    }

    async fn kill(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.kills += 1;
        if let Some(container) = state.containers.get_mut(id) {
            container.output_tx = None;
            if container.exit_tx.borrow().is_none() {
                container.exit_tx.send_replace(Some(KILLED_EXIT_CODE));
            }
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if let Some(container) = state.containers.remove(id) {
            if container.exit_tx.borrow().is_none() {
                container.exit_tx.send_replace(Some(KILLED_EXIT_CODE));
            }
            state.removed.push(id.to_string());
        }
        Ok(())
    }
}

struct ScriptedStdin {
    state: Arc<Mutex<State>>,
    id: String,
    echo: bool,
}

impl AsyncWrite for ScriptedStdin {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock().unwrap();
        state.stdin.extend_from_slice(buf);
        if self.echo {
            let output = state.containers.get(&self.id).and_then(|c| c.output_tx.as_ref());
            if let Some(tx) = output {
                let _ = tx.send(Bytes::copy_from_slice(buf));
            }
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
