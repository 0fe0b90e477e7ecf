//! Shared helpers for ferry integration tests.
//!
//! Spins up a real gateway on a loopback port with a temporary upload
//! directory and provides event assertions with timeouts.

use ferry_core::{RelayConfig, ServerEvent};
use ferry_files::UploadStore;
use ferry_gateway::{Gateway, RelayClient};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// How long assertions wait for an expected event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A relay running on a loopback port
pub struct TestRelay {
    addr: SocketAddr,
    url: String,
    dir: TempDir,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<ferry_gateway::Result<()>>>,
}

impl TestRelay {
    /// Start a relay with default settings
    pub async fn start() -> Self {
        Self::start_with(RelayConfig::default()).await
    }

    /// Start a relay with custom engine settings
    pub async fn start_with(config: RelayConfig) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store = UploadStore::open(dir.path(), "/uploads")
            .await
            .expect("upload store");
        let gateway = Gateway::bind("127.0.0.1:0".parse().expect("addr"), store, config)
            .await
            .expect("bind gateway");
        let addr = gateway.local_addr().expect("local addr");
        let url = format!("ws://{addr}");

        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(gateway.run_until(async {
            let _ = stopped.await;
        }));

        Self {
            addr,
            url,
            dir,
            stop: Some(stop),
            task: Some(task),
        }
    }

    /// WebSocket URL of the relay
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Directory uploads are stored in
    pub fn upload_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Fetch `path` over plain HTTP, returning the status code and body
    pub async fn download(&self, path: &str) -> (u16, Vec<u8>) {
        let mut stream = TcpStream::connect(self.addr).await.expect("connect");
        let request = format!(
            "GET {path} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.addr
        );
        stream
            .write_all(request.as_bytes())
            .await
            .expect("send request");

        let mut response = Vec::new();
        tokio::time::timeout(EVENT_TIMEOUT, stream.read_to_end(&mut response))
            .await
            .expect("timed out reading response")
            .expect("read response");

        let split = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response head");
        let status = String::from_utf8_lossy(&response[..split])
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .expect("status code");
        (status, response[split + 4..].to_vec())
    }

    /// Connect a client and join as `user_id`, waiting until the relay has
    /// registered it
    pub async fn joined(&self, user_id: &str, username: &str) -> RelayClient {
        let mut client = RelayClient::connect(&self.url).await.expect("connect");
        client.join(user_id, username).await.expect("join");
        client
            .wait_for("own presence", |event| match event {
                ServerEvent::OnlineUsers(users) => users.iter().any(|u| u.user_id == user_id),
                _ => false,
            })
            .await
            .expect("presence after join");
        client
    }

    /// Stop accepting connections and close open sessions
    ///
    /// Returns the upload directory so callers can inspect what was kept.
    pub async fn stop(mut self) -> TempDir {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let result = tokio::time::timeout(EVENT_TIMEOUT, task)
                .await
                .expect("gateway stopped in time")
                .expect("gateway task");
            result.expect("gateway run");
        }
        self.dir
    }
}

/// Next event that is not a presence update
pub async fn next_transfer_event(client: &mut RelayClient) -> ServerEvent {
    loop {
        let event = tokio::time::timeout(EVENT_TIMEOUT, client.next_event())
            .await
            .expect("timed out waiting for event")
            .expect("relay connection");
        if !matches!(event, ServerEvent::OnlineUsers(_)) {
            return event;
        }
    }
}

/// Next presence update, as user ids in join order
pub async fn next_presence(client: &mut RelayClient) -> Vec<String> {
    loop {
        let event = tokio::time::timeout(EVENT_TIMEOUT, client.next_event())
            .await
            .expect("timed out waiting for presence")
            .expect("relay connection");
        if let ServerEvent::OnlineUsers(users) = event {
            return users.into_iter().map(|u| u.user_id).collect();
        }
    }
}

/// Assert that no transfer event arrives within `quiet`
pub async fn assert_no_transfer_event(client: &mut RelayClient, quiet: Duration) {
    let deadline = tokio::time::Instant::now() + quiet;
    loop {
        match tokio::time::timeout_at(deadline, client.next_event()).await {
            Err(_) => return,
            Ok(Ok(ServerEvent::OnlineUsers(_))) => {}
            Ok(other) => panic!("unexpected event: {other:?}"),
        }
    }
}

/// Poll `condition` until it holds or [`EVENT_TIMEOUT`] passes
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Write `contents` to a fresh file named `name` inside `dir`
pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write fixture");
    path
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
