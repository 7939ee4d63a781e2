//! Common test utilities for `Tao` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tao_core::tree::{MemoryConnection, MemoryTree, TreePath};
use tao_core::{ClientApi, Identity, Session, StatusMessages};

/// Store URL used by every test identity.
pub const TEST_URL: &str = "https://tao.example.io";

/// Install a log subscriber once; respects `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Log lines captured by [`capture_logs`].
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Capture log output on the current thread until the guard is dropped.
pub fn capture_logs() -> (tracing::subscriber::DefaultGuard, LogBuffer) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    (tracing::subscriber::set_default(subscriber), buffer)
}

/// Build a 20 character device id from a short tag.
pub fn device_id(tag: &str) -> String {
    format!("{tag:-<20}").chars().take(20).collect()
}

/// A valid identity for `name`.
pub fn identity(name: &str) -> Identity {
    Identity::new(name, TEST_URL, device_id(name))
}

/// Metadata location of the device named `name`.
pub fn metadata_path(name: &str) -> TreePath {
    TreePath::new("metadata").child(device_id(name))
}

/// Write the routes an operator would assign to the device named `name`.
pub fn assign_routes(tree: &MemoryTree, name: &str, input: &str, output: &str) {
    let meta = metadata_path(name);
    tree.set(meta.child("input"), Value::from(input));
    tree.set(meta.child("output"), Value::from(output));
}

/// Let spawned subscription tasks drain their queues.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Client that records every API call it receives.
#[derive(Debug, Default)]
pub struct RecordingClient {
    pub name: String,
    pub messages: StatusMessages,
    pub calls: Mutex<Vec<(TreePath, Value)>>,
}

impl RecordingClient {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            messages: StatusMessages::from([("reset".to_string(), "Client reset".to_string())]),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(TreePath, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ClientApi for RecordingClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn status_messages(&self) -> StatusMessages {
        self.messages.clone()
    }

    fn api(&self, api_path: &TreePath, value: &Value) {
        self.calls
            .lock()
            .unwrap()
            .push((api_path.clone(), value.clone()));
    }
}

/// A started session plus the handles a test needs around it.
pub struct Peer {
    pub session: Session,
    pub client: Arc<RecordingClient>,
    pub connection: MemoryConnection,
}

/// Start the device named `name` on its own connection to `tree`.
pub fn start_peer(tree: &MemoryTree, name: &str) -> Peer {
    init_tracing();
    let connection = tree.connect();
    let client = RecordingClient::new("client");
    let session = Session::start(
        identity(name),
        client.clone(),
        Arc::new(connection.clone()),
    )
    .expect("valid identity");

    Peer {
        session,
        client,
        connection,
    }
}
