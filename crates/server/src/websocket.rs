//! WebSocket server implementation using Tokio-Tungstenite
//!
//! Every accepted connection gets a [`ConnectionHandle`]: a cloneable sender
//! that lets any task push frames to that client and, with
//! [`ConnectionHandle::send`], wait until the frame has been written to the
//! socket. Inbound frames go to a [`MessageHandler`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use observability::ServerMetrics;
use parking_lot::RwLock as SyncRwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinSet;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::traits::Server;

/// A unique identifier for each WebSocket connection
pub type ConnectionId = u64;

/// Frames queued per connection before senders wait
const OUTBOUND_BUFFER: usize = 256;

/// Time allowed for open connections to close after shutdown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

struct Outbound {
    message: Message,
    ack: oneshot::Sender<std::result::Result<(), String>>,
}

/// Write side of one live connection
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer_addr: SocketAddr,
    tx: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Queue a frame and wait until it has been written to the socket
    pub async fn send(&self, message: Message) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Outbound {
                message,
                ack: ack_tx,
            })
            .await
            .map_err(|_| ServerError::ConnectionClosed { id: self.id })?;

        match ack_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(ServerError::send_failed(self.id, reason)),
            Err(_) => Err(ServerError::ConnectionClosed { id: self.id }),
        }
    }

    /// True once the connection task has exited
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

/// Trait for handling WebSocket messages
///
/// ```ignore
/// struct Greeter;
///
/// impl MessageHandler for Greeter {
///     fn handle(&self, conn: &ConnectionHandle, message: Message) -> Option<Message> {
///         match message {
///             Message::Text(name) => Some(Message::Text(format!("hello {name}"))),
///             _ => None,
///         }
///     }
/// }
/// ```
pub trait MessageHandler: Send + Sync {
    /// Handle an incoming message and optionally return a response
    fn handle(&self, conn: &ConnectionHandle, message: Message) -> Option<Message>;

    /// Called once the upgrade has completed; the handle may be kept
    fn on_connect(&self, _conn: &ConnectionHandle) {}

    /// Called when a connection is closed
    fn on_disconnect(&self, _conn_id: ConnectionId) {}
}

/// WebSocket server with connection tracking
#[derive(Clone)]
pub struct WebSocketServer {
    config: ServerConfig,
    running: Arc<AtomicBool>,
    bound_addr: Arc<SyncRwLock<Option<SocketAddr>>>,
    next_conn_id: Arc<AtomicU64>,
    connections: Arc<RwLock<HashMap<ConnectionId, SocketAddr>>>,
    handler: Arc<dyn MessageHandler>,
    metrics: ServerMetrics,
}

impl WebSocketServer {
    /// Listener on the configured WebSocket port; every frame goes to `handler`
    pub fn new(config: ServerConfig, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            bound_addr: Arc::new(SyncRwLock::new(None)),
            next_conn_id: Arc::new(AtomicU64::new(1)),
            connections: Arc::new(RwLock::new(HashMap::new())),
            handler,
            metrics: ServerMetrics::new("websocket"),
        }
    }

    fn bind_addr(&self) -> Result<SocketAddr> {
        self.config
            .websocket_addr()
            .ok_or_else(|| ServerError::ConfigError("WebSocket port not configured".into()))?
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    fn next_connection_id(&self) -> ConnectionId {
        self.next_conn_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn register_connection(&self, handle: &ConnectionHandle) {
        self.connections
            .write()
            .await
            .insert(handle.id(), handle.peer_addr());
        self.metrics.connection_opened();
        self.handler.on_connect(handle);
    }

    async fn unregister_connection(&self, id: ConnectionId) {
        self.connections.write().await.remove(&id);
        self.metrics.connection_closed();
        self.handler.on_disconnect(id);
    }

    /// Handle a single WebSocket connection
    async fn handle_connection(
        &self,
        conn_id: ConnectionId,
        stream: TcpStream,
        peer_addr: SocketAddr,
        conn_token: CancellationToken,
    ) -> Result<()> {
        debug!(conn_id, %peer_addr, "TCP connection accepted");

        let ws_stream = accept_async(stream).await.map_err(ServerError::WebSocket)?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);
        let handle = ConnectionHandle {
            id: conn_id,
            peer_addr,
            tx: out_tx,
        };
        self.register_connection(&handle).await;

        loop {
            tokio::select! {
                _ = conn_token.cancelled() => {
                    debug!(conn_id, "Connection shutting down due to server shutdown");
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }

                Some(outbound) = out_rx.recv() => {
                    let result = ws_sender.send(outbound.message).await;
                    let status = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
                    let _ = outbound.ack.send(status);
                    if let Err(e) = result {
                        self.metrics.send_failed();
                        error!(conn_id, %e, "Failed to push WebSocket message");
                        break;
                    }
                }

                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(message)) => {
                            if message.is_close() {
                                debug!(conn_id, "WebSocket client disconnected gracefully");
                                break;
                            }

                            if message.is_text() || message.is_binary() {
                                self.metrics.message_received();
                            }
                            if let Some(response) = self.handler.handle(&handle, message) {
                                if let Err(e) = ws_sender.send(response).await {
                                    self.metrics.send_failed();
                                    error!(conn_id, %e, "Failed to send WebSocket message");
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(conn_id, %e, "WebSocket error");
                            break;
                        }
                        None => {
                            debug!(conn_id, "WebSocket stream ended");
                            break;
                        }
                    }
                }
            }
        }

        // Fail queued writes instead of leaving their senders waiting
        out_rx.close();
        while let Ok(outbound) = out_rx.try_recv() {
            let _ = outbound.ack.send(Err("connection closed".to_string()));
        }

        self.unregister_connection(conn_id).await;
        debug!(conn_id, "WebSocket connection closed");
        Ok(())
    }
}

#[async_trait]
impl Server for WebSocketServer {
    fn name(&self) -> &str {
        "websocket"
    }

    fn address(&self) -> Option<SocketAddr> {
        *self.bound_addr.read()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run(&self, shutdown_token: CancellationToken) -> Result<()> {
        let addr = self.bind_addr()?;

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::bind(addr.to_string(), e))?;

        let local_addr = listener.local_addr().map_err(ServerError::Io)?;
        *self.bound_addr.write() = Some(local_addr);

        info!(%local_addr, "WebSocket server listening");

        self.running.store(true, Ordering::SeqCst);

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    info!("WebSocket server received shutdown signal");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let conn_id = self.next_connection_id();
                            let server = self.clone();
                            let conn_token = shutdown_token.child_token();

                            connections.spawn(async move {
                                if let Err(e) = server
                                    .handle_connection(conn_id, stream, peer_addr, conn_token)
                                    .await
                                {
                                    debug!(conn_id, %e, "WebSocket connection ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(%e, "Failed to accept WebSocket connection");
                        }
                    }
                }

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        if !connections.is_empty() {
            info!(open = connections.len(), "Closing WebSocket connections");
            let drain = async { while connections.join_next().await.is_some() {} };
            if tokio::time::timeout(CLOSE_TIMEOUT, drain).await.is_err() {
                warn!("WebSocket connections did not close in time, aborting");
                connections.abort_all();
            }
        }

        self.running.store(false, Ordering::SeqCst);
        *self.bound_addr.write() = None;

        info!("WebSocket server shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ServerExt;
    use parking_lot::Mutex;
    use tokio_tungstenite::connect_async;

    /// Replies with the frame it was given
    struct Echo;

    impl MessageHandler for Echo {
        fn handle(&self, _conn: &ConnectionHandle, message: Message) -> Option<Message> {
            (message.is_text() || message.is_binary()).then_some(message)
        }
    }

    /// Remembers the last connection it saw
    #[derive(Default)]
    struct CapturingHandler {
        last: Mutex<Option<ConnectionHandle>>,
    }

    impl MessageHandler for CapturingHandler {
        fn handle(&self, _conn: &ConnectionHandle, _message: Message) -> Option<Message> {
            None
        }

        fn on_connect(&self, conn: &ConnectionHandle) {
            *self.last.lock() = Some(conn.clone());
        }
    }

    fn echo_server() -> WebSocketServer {
        WebSocketServer::new(ServerConfig::websocket_only("127.0.0.1", 0), Arc::new(Echo))
    }

    async fn wait_for<T>(mut check: impl FnMut() -> Option<T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(value) = check() {
                    return value;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not met in time")
    }

    #[tokio::test]
    async fn test_websocket_server_shutdown() {
        let (handle, token) = echo_server().spawn();

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.is_ok(), "Server should shutdown within timeout");
    }

    #[tokio::test]
    async fn test_handler_reply_round_trip() {
        let server = echo_server();
        let (handle, token) = server.clone().spawn();
        let addr = wait_for(|| server.address()).await;

        let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        client.send(Message::Text("ping".into())).await.unwrap();
        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(reply, Message::Text("ping".into()));

        token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    #[tokio::test]
    async fn test_push_through_handle() {
        let handler = Arc::new(CapturingHandler::default());
        let server = WebSocketServer::new(
            ServerConfig::websocket_only("127.0.0.1", 0),
            handler.clone(),
        );
        let (handle, token) = server.clone().spawn();
        let addr = wait_for(|| server.address()).await;

        let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        let conn = wait_for(|| handler.last.lock().clone()).await;
        assert_eq!(server.connection_count().await, 1);

        conn.send(Message::Text("matched".into())).await.unwrap();
        let pushed = client.next().await.unwrap().unwrap();
        assert_eq!(pushed, Message::Text("matched".into()));

        client.close(None).await.unwrap();
        wait_for(|| conn.is_closed().then_some(())).await;
        assert!(conn.send(Message::Text("late".into())).await.is_err());

        token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
}
