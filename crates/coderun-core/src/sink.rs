//! Outbound event channel of a session.

use coderun_types::ServerEvent;
use tokio::sync::mpsc;

/// Sends [`ServerEvent`]s towards the client connection.
///
/// Once the connection side is gone every emit is a silent no-op: the session
/// still has to finish its cleanup even though nobody is listening.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ServerEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiving end the transport drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Queue an event. Returns `false` when the client is gone.
    pub async fn emit(&self, event: ServerEvent) -> bool {
        match self.tx.send(event).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                log::debug!("Dropping event for closed connection: {:?}", event);
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
