//! Interactive I/O between a client connection and a running container.
//!
//! Three units of work run concurrently on the session task: the output pump
//! (container to client), the input pump (client to container) and the exit
//! wait. They share one [`CancellationToken`]. Whichever of client kill,
//! connection loss or container exit happens first cancels it; the bridge
//! returns only after all three have finished.

use bytes::Bytes;
use coderun_types::{ClientMessage, OutputStream as StreamKind, ServerEvent, Stage, SIGKILL};
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::driver::ContainerHandle;
use crate::runtime::{AttachedIo, InputSink, OutputStream};
use crate::sink::EventSink;

/// Exit code reported when the runtime never delivers one.
pub const UNKNOWN_EXIT_CODE: i64 = 0;

pub struct IoBridge<'a> {
    container: ContainerHandle,
    events: &'a EventSink,
    session_id: &'a str,
    chunk_size: usize,
    drain_grace: Duration,
    stop_grace: Duration,
}

impl<'a> IoBridge<'a> {
    pub fn new(
        container: ContainerHandle,
        events: &'a EventSink,
        config: &EngineConfig,
        session_id: &'a str,
    ) -> Self {
        Self {
            container,
            events,
            session_id,
            chunk_size: config.output_chunk_size.max(1),
            drain_grace: config.output_drain_grace(),
            stop_grace: config.stop_grace(),
        }
    }

    /// Pump I/O until the program ends, then emit the run stage `exit` event
    /// and return its code.
    pub async fn run<S, E>(self, io: AttachedIo, inbound: &mut S) -> i64
    where
        S: Stream<Item = Result<String, E>> + Unpin + Send,
        E: Display + Send,
    {
        let cancel = CancellationToken::new();
        let AttachedIo { output, input } = io;

        let ((), (), exit_code) = tokio::join!(
            self.pump_output(output, &cancel),
            self.pump_input(input, inbound, &cancel),
            self.wait_exit(&cancel),
        );

        log::info!(
            "[{}] program in container {} exited with code {}",
            self.session_id,
            self.container.id(),
            exit_code
        );
        self.events
            .emit(ServerEvent::exit(Stage::Run, exit_code))
            .await;
        exit_code
    }

    async fn emit_pieces(&self, pieces: Vec<Bytes>) {
        for piece in pieces {
            self.events
                .emit(ServerEvent::output(StreamKind::Stdout, &piece))
                .await;
        }
    }

    async fn pump_output(&self, mut output: OutputStream, cancel: &CancellationToken) {
        let mut chunker = OutputChunker::new(self.chunk_size);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.drain_output(&mut output, &mut chunker).await;
                    break;
                }
                chunk = output.next() => match chunk {
                    Some(Ok(bytes)) => self.emit_pieces(chunker.push(&bytes)).await,
                    Some(Err(e)) => {
                        log::warn!("[{}] container read error: {}", self.session_id, e);
                        break;
                    }
                    None => {
                        log::debug!("[{}] container output reached EOF", self.session_id);
                        break;
                    }
                },
            }
        }
        self.emit_pieces(chunker.finish()).await;
    }

    /// Forward output that is still in flight after cancellation, bounded by
    /// the drain grace period.
    async fn drain_output(&self, output: &mut OutputStream, chunker: &mut OutputChunker) {
        let deadline = Instant::now() + self.drain_grace;
        while let Ok(Some(Ok(bytes))) = tokio::time::timeout_at(deadline, output.next()).await {
            self.emit_pieces(chunker.push(&bytes)).await;
        }
    }

    async fn pump_input<S, E>(
        &self,
        mut input: InputSink,
        inbound: &mut S,
        cancel: &CancellationToken,
    ) where
        S: Stream<Item = Result<String, E>> + Unpin + Send,
        E: Display + Send,
    {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = inbound.next() => frame,
            };

            let text = match frame {
                Some(Ok(text)) => text,
                Some(Err(e)) => {
                    log::warn!("[{}] connection read error: {}", self.session_id, e);
                    self.abandon(cancel).await;
                    break;
                }
                None => {
                    log::info!("[{}] client disconnected", self.session_id);
                    self.abandon(cancel).await;
                    break;
                }
            };

            match ClientMessage::parse(&text) {
                Ok(ClientMessage::Stdin(data)) => {
                    let written = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        written = write_stdin(&mut input, data.as_bytes()) => written,
                    };
                    if let Err(e) = written {
                        log::warn!("[{}] container write error: {}", self.session_id, e);
                    }
                }
                Ok(ClientMessage::Signal(SIGKILL)) => {
                    log::info!("[{}] kill requested by client", self.session_id);
                    self.kill().await;
                    cancel.cancel();
                    break;
                }
                Ok(other) => {
                    log::debug!("[{}] ignoring client message {:?}", self.session_id, other);
                }
                Err(e) => {
                    log::debug!("[{}] ignoring undecodable frame: {}", self.session_id, e);
                }
            }
        }

        if let Err(e) = input.shutdown().await {
            log::debug!("[{}] closing container stdin: {}", self.session_id, e);
        }
    }

    /// Nobody is left to talk to the program: stop it and shut the bridge.
    async fn abandon(&self, cancel: &CancellationToken) {
        self.kill().await;
        cancel.cancel();
    }

    async fn kill(&self) {
        if let Err(e) = self.container.kill().await {
            log::warn!(
                "[{}] failed to kill container {}: {}",
                self.session_id,
                self.container.id(),
                e
            );
        }
    }

    async fn wait_exit(&self, cancel: &CancellationToken) -> i64 {
        let gave_up = async {
            cancel.cancelled().await;
            tokio::time::sleep(self.stop_grace).await;
        };

        let exit_code = tokio::select! {
            result = self.container.wait() => match result {
                Ok(code) => code,
                Err(e) => {
                    log::warn!("[{}] container wait error: {}", self.session_id, e);
                    UNKNOWN_EXIT_CODE
                }
            },
            _ = gave_up => {
                log::warn!(
                    "[{}] no exit status {:?} after shutdown began",
                    self.session_id,
                    self.stop_grace
                );
                UNKNOWN_EXIT_CODE
            }
        };
        cancel.cancel();
        exit_code
    }
}

async fn write_stdin(input: &mut InputSink, data: &[u8]) -> std::io::Result<()> {
    input.write_all(data).await?;
    input.flush().await
}

/// Splits container output into `data` payloads of at most `chunk_size`
/// bytes without cutting a UTF-8 character in two.
///
/// A character left incomplete at the end of a read is held back until the
/// next read completes it. A piece grows past `chunk_size` only when a single
/// character is wider than the limit.
#[derive(Debug)]
pub struct OutputChunker {
    chunk_size: usize,
    pending: Vec<u8>,
}

impl OutputChunker {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            pending: Vec::new(),
        }
    }

    /// Accept one read and return the pieces that are ready to send.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(bytes);
        let ready = complete_prefix_len(&self.pending);
        let tail = self.pending.split_off(ready);
        let ready = std::mem::replace(&mut self.pending, tail);
        self.split(&ready)
    }

    /// Flush whatever is held back. Invalid trailing bytes are sent as is.
    pub fn finish(&mut self) -> Vec<Bytes> {
        let rest = std::mem::take(&mut self.pending);
        self.split(&rest)
    }

    fn split(&self, bytes: &[u8]) -> Vec<Bytes> {
        let mut pieces = Vec::new();
        let mut start = 0;
        while start < bytes.len() {
            let mut end = (start + self.chunk_size).min(bytes.len());
            while end > start && end < bytes.len() && is_continuation(bytes[end]) {
                end -= 1;
            }
            if end == start {
                // One character wider than the limit.
                end = start + 1;
                while end < bytes.len() && is_continuation(bytes[end]) {
                    end += 1;
                }
            }
            pieces.push(Bytes::copy_from_slice(&bytes[start..end]));
            start = end;
        }
        pieces
    }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0b1100_0000 == 0b1000_0000
}

fn utf8_width(lead: u8) -> usize {
    match lead {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}

/// Length of `bytes` without a trailing, not yet complete UTF-8 sequence.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(4) {
        let at = len - back;
        if !is_continuation(bytes[at]) {
            return if utf8_width(bytes[at]) > back { at } else { len };
        }
    }
    len
}
