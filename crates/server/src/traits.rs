//! Common lifecycle for the matchd front doors

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A listener that serves until its token is cancelled
///
/// Implemented by [`HttpServer`](crate::HttpServer),
/// [`WebSocketServer`](crate::WebSocketServer) and
/// [`CombinedServer`](crate::CombinedServer).
#[async_trait]
pub trait Server: Send + Sync + 'static {
    /// Short label used in logs ("http", "websocket", the service name)
    fn name(&self) -> &str;

    /// Bound address; `None` until the listener is up
    fn address(&self) -> Option<SocketAddr>;

    fn is_running(&self) -> bool;

    /// Bind and serve. Returns once `shutdown` fires and open connections are closed.
    async fn run(&self, shutdown: CancellationToken) -> Result<()>;
}

pub trait ServerExt: Server + Sized {
    /// Run on a background task with a fresh token
    fn spawn(self) -> (JoinHandle<Result<()>>, CancellationToken) {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = tokio::spawn(async move { self.run(task_token).await });
        (handle, token)
    }
}

impl<T: Server> ServerExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct IdleServer {
        running: AtomicBool,
    }

    #[async_trait]
    impl Server for Arc<IdleServer> {
        fn name(&self) -> &str {
            "idle"
        }

        fn address(&self) -> Option<SocketAddr> {
            None
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::Acquire)
        }

        async fn run(&self, shutdown: CancellationToken) -> Result<()> {
            self.running.store(true, Ordering::Release);
            shutdown.cancelled().await;
            self.running.store(false, Ordering::Release);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_spawn_stops_on_cancel() {
        let server = Arc::new(IdleServer::default());
        let (handle, token) = server.clone().spawn();

        tokio::time::timeout(Duration::from_secs(1), async {
            while !server.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
        assert!(!server.is_running());
    }
}
