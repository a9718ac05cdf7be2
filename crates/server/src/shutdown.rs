//! Process-wide shutdown
//!
//! One root token per process. Servers, engine timers and samplers take child
//! tokens, so cancelling the root stops all of them while each child can still
//! be cancelled alone.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone, Default)]
pub struct ShutdownController {
    token: CancellationToken,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel on Ctrl+C, or SIGTERM on Unix
    pub fn with_signals() -> Self {
        let controller = Self::new();
        let token = controller.token.clone();

        tokio::spawn(async move {
            let signal = wait_for_signal().await;
            info!(signal, "Shutdown signal received, draining");
            token.cancel();
        });

        controller
    }

    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("Shutdown requested");
            self.token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }
}

async fn ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending().await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            name = ctrl_c() => name,
            _ = term.recv() => "SIGTERM",
        },
        Err(e) => {
            warn!("Failed to listen for SIGTERM: {}", e);
            ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}
