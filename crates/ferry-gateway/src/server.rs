//! WebSocket gateway feeding the relay engine.
//!
//! Each upgraded socket gets a monotonically increasing [`ConnectionId`], one
//! reader loop that dispatches events into the engine strictly in arrival
//! order, and one writer task draining the connection's [`Hub`] queue.
//! Completed uploads are served over plain HTTP on the same port, under the
//! store's public prefix.

use crate::error::Result;
use crate::hub::{EventReceiver, Hub};
use axum::Router;
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use ferry_core::{ClientEvent, ConnectionId, RelayConfig, RelayEngine};
use ferry_files::UploadStore;
use futures_util::{SinkExt, StreamExt};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum concurrently open connections
    pub max_connections: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
        }
    }
}

/// Relay engine bound to the gateway's outbound hub
pub type GatewayEngine = RelayEngine<Hub>;

/// Listening WebSocket gateway
pub struct Gateway {
    listener: TcpListener,
    state: AppState,
}

#[derive(Clone)]
struct AppState {
    engine: Arc<GatewayEngine>,
    hub: Hub,
    next_connection: Arc<AtomicU64>,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Gateway {
    /// Bind a gateway with default connection limits
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot be bound.
    pub async fn bind(addr: SocketAddr, store: UploadStore, relay: RelayConfig) -> Result<Self> {
        Self::bind_with_config(addr, store, relay, GatewayConfig::default()).await
    }

    /// Bind a gateway with custom configuration
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot be bound.
    pub async fn bind_with_config(
        addr: SocketAddr,
        store: UploadStore,
        relay: RelayConfig,
        config: GatewayConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let hub = Hub::new();
        let engine = Arc::new(RelayEngine::new(store, hub.clone(), relay));

        Ok(Self {
            listener,
            state: AppState {
                engine,
                hub,
                next_connection: Arc::new(AtomicU64::new(1)),
                slots: Arc::new(Semaphore::new(config.max_connections)),
                max_connections: config.max_connections,
            },
        })
    }

    /// Address the gateway is listening on
    ///
    /// # Errors
    ///
    /// Returns error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the process ends
    ///
    /// # Errors
    ///
    /// Returns error if the listener fails.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves, then close every open
    /// transfer session
    ///
    /// # Errors
    ///
    /// Returns error if the listener fails.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Relay gateway listening on {}", self.local_addr()?);
        let Self { listener, state } = self;
        let engine = Arc::clone(&state.engine);
        let sweeper = engine.spawn_sweeper();

        let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
        let served = tokio::select! {
            result = axum::serve(listener, app).into_future() => result,
            () = shutdown => Ok(()),
        };

        tracing::info!("Relay gateway shutting down");
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        engine.shutdown().await;
        served?;
        Ok(())
    }
}

fn router(state: AppState) -> Router {
    let prefix = state.engine.store().public_prefix().trim_matches('/');
    let downloads = if prefix.is_empty() {
        "/:name".to_string()
    } else {
        format!("/{prefix}/:name")
    };

    // Any other path is a WebSocket endpoint
    Router::new()
        .route(&downloads, get(download))
        .fallback(upgrade)
        .with_state(state)
}

async fn upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    // The permit is taken before the handshake and lives as long as the connection
    let Ok(permit) = Arc::clone(&state.slots).try_acquire_owned() else {
        tracing::warn!(
            "Rejecting {}: connection limit {} reached",
            peer,
            state.max_connections
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "relay busy").into_response();
    };

    let connection = ConnectionId::new(state.next_connection.fetch_add(1, Ordering::Relaxed));
    ws.on_upgrade(move |socket| async move {
        serve_connection(socket, peer, connection, state.engine, state.hub).await;
        drop(permit);
    })
}

/// Serve a stored upload by the name its download path ends in
async fn download(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let path = match state.engine.store().stored_path(&name) {
        Ok(path) => path,
        Err(e) => {
            tracing::debug!("Refusing download {:?}: {}", name, e);
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    if state.engine.is_receiving(&path) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!("Download {} unavailable: {}", name, e);
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let len = match file.metadata().await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return StatusCode::NOT_FOUND.into_response(),
    };

    tracing::debug!("Serving download {} ({} bytes)", name, len);
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}

/// Drive one upgraded connection until either side closes it
async fn serve_connection(
    socket: WebSocket,
    peer: SocketAddr,
    connection: ConnectionId,
    engine: Arc<GatewayEngine>,
    hub: Hub,
) {
    let (sink, mut source) = socket.split();
    let queue = hub.register(connection);
    let writer = tokio::spawn(write_events(sink, queue, connection));
    tracing::info!(
        "User connected: {} from {} ({} open)",
        connection,
        peer,
        hub.connection_count()
    );

    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => match ClientEvent::from_json(&text) {
                Ok(event) => {
                    tracing::trace!("{} -> {}", connection, event.name());
                    engine.handle(connection, event).await;
                }
                Err(e) => tracing::warn!("Malformed event from {}: {}", connection, e),
            },
            Ok(Message::Binary(_)) => {
                tracing::warn!("Ignoring binary frame from {}", connection);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Read error on {}: {}", connection, e);
                break;
            }
        }
    }

    // Unregister first so the presence broadcast skips the closed socket
    hub.unregister(connection);
    engine.disconnect(connection).await;
    let _ = writer.await;
    tracing::info!("User disconnected: {}", connection);
}

async fn write_events<S>(mut sink: S, mut queue: EventReceiver, connection: ConnectionId)
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    while let Some(event) = queue.recv().await {
        let text = match event.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Failed to encode {} for {}: {}", event.name(), connection, e);
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text)).await {
            tracing::debug!("Write error on {}: {}", connection, e);
            break;
        }
    }
    let _ = sink.close().await;
}
