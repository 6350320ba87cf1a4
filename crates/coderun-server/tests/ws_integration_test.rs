use async_trait::async_trait;
use bytes::Bytes;
use coderun_core::errors::EngineError;
use coderun_core::runtime::{AttachedIo, ContainerRuntime, ContainerSpec, LogChunk};
use coderun_core::{EngineConfig, RecipeRegistry, SessionEngine};
use coderun_server::{CodeRunServer, ServerConfig};
use futures_util::{stream, SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

/// Every program prints `2\n` and exits 0.
#[derive(Default)]
struct PrintingRuntime {
    live: AtomicUsize,
}

#[async_trait]
impl ContainerRuntime for PrintingRuntime {
    async fn create(&self, _spec: &ContainerSpec) -> Result<String, EngineError> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok("printer".to_string())
    }

    async fn start(&self, _id: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn attach(&self, _id: &str) -> Result<AttachedIo, EngineError> {
        Ok(AttachedIo {
            output: stream::iter(vec![Ok(Bytes::from_static(b"2\n"))]).boxed(),
            input: Box::pin(tokio::io::sink()),
        })
    }

    async fn wait(&self, _id: &str) -> Result<i64, EngineError> {
        Ok(0)
    }

    async fn logs(&self, _id: &str) -> Result<Vec<LogChunk>, EngineError> {
        Ok(Vec::new())
    }

    async fn kill(&self, _id: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn remove(&self, _id: &str) -> Result<(), EngineError> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn start_server(
    runtime: Arc<PrintingRuntime>,
    root: &std::path::Path,
) -> (String, oneshot::Sender<()>) {
    let engine = SessionEngine::new(
        runtime,
        RecipeRegistry::builtin(),
        EngineConfig::default().with_work_dir_root(root),
    );
    let server = CodeRunServer::with_config(engine, ServerConfig::new().with_logging(false));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        server
            .serve_on_listener(listener, async {
                let _ = stop_rx.await;
            })
            .await
            .unwrap();
    });
    (format!("ws://{}/ws/execute", addr), stop_tx)
}

async fn collect_events(url: &str, frames: &[&str]) -> Vec<serde_json::Value> {
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    for frame in frames {
        socket.send(Message::text(frame.to_string())).await.unwrap();
    }

    let mut events = Vec::new();
    while let Some(message) = socket.next().await {
        match message {
            Ok(Message::Text(text)) => events.push(serde_json::from_str(text.as_str()).unwrap()),
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    events
}

#[tokio::test]
async fn test_python_session_over_websocket() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(PrintingRuntime::default());
    let (url, stop) = start_server(runtime.clone(), root.path()).await;

    let events = collect_events(
        &url,
        &[r#"{"type":"init","language":"python","version":"3.10.0","files":[{"content":"print(1+1)"}]}"#],
    )
    .await;

    let kinds: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["runtime", "stage", "data", "exit"]);
    assert_eq!(events[0]["language"], "python");
    assert_eq!(events[1]["stage"], "run");
    assert_eq!(events[2]["stream"], "stdout");
    assert_eq!(events[2]["data"], "2\n");
    assert_eq!(events[3]["stage"], "run");
    assert_eq!(events[3]["code"], 0);

    assert_eq!(runtime.live.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    let _ = stop.send(());
}

#[tokio::test]
async fn test_invalid_init_closes_with_error() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(PrintingRuntime::default());
    let (url, stop) = start_server(runtime.clone(), root.path()).await;

    let events = collect_events(&url, &[r#"{"type":"signal","signal":9}"#]).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "error");
    assert_eq!(events[0]["message"], "Invalid init message");
    assert_eq!(runtime.live.load(Ordering::SeqCst), 0);
    let _ = stop.send(());
}
