//! One cancellation token for the whole run.
//!
//! The token fires when the optional timeout elapses or on SIGINT/SIGTERM,
//! whichever comes first. The cause is recorded so the CLI can say
//! "timed out" rather than just "cancelled".

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    Timeout(Duration),
    Signal,
}

impl std::fmt::Display for CancelCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelCause::Timeout(after) => {
                write!(f, "timed out after {}", humantime::format_duration(*after))
            }
            CancelCause::Signal => f.write_str("interrupted"),
        }
    }
}

pub struct RunDeadline {
    token: CancellationToken,
    timeout: Option<Duration>,
    cause: Arc<OnceLock<CancelCause>>,
    watchers: Vec<JoinHandle<()>>,
}

impl RunDeadline {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
            cause: Arc::new(OnceLock::new()),
            watchers: Vec::new(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Start the timeout and signal watchers. Must be called inside a runtime.
    pub fn arm(&mut self) {
        if let Some(timeout) = self.timeout {
            let token = self.token.clone();
            let cause = Arc::clone(&self.cause);
            self.watchers.push(tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        fire(&token, &cause, CancelCause::Timeout(timeout));
                    }
                    _ = token.cancelled() => {}
                }
            }));
        }

        let token = self.token.clone();
        let cause = Arc::clone(&self.cause);
        self.watchers.push(tokio::spawn(async move {
            tokio::select! {
                _ = wait_for_signal() => {
                    fire(&token, &cause, CancelCause::Signal);
                }
                _ = token.cancelled() => {}
            }
        }));
    }

    /// Why the token fired, if it did
    pub fn cause(&self) -> Option<CancelCause> {
        self.cause.get().copied()
    }

    /// Stop the watchers without cancelling the run
    pub fn disarm(&mut self) {
        for watcher in self.watchers.drain(..) {
            watcher.abort();
        }
    }
}

impl Drop for RunDeadline {
    fn drop(&mut self) {
        self.disarm();
    }
}

fn fire(token: &CancellationToken, cause: &OnceLock<CancelCause>, why: CancelCause) {
    if cause.set(why).is_ok() {
        info!("Run {}, cancelling", why);
    }
    token.cancel();
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
