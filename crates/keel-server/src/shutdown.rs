//! Graceful shutdown coordination.
//!
//! A [`ShutdownSignal`] is the cancellation source handed to
//! [`Server::serve`](crate::Server::serve). Triggering it moves the server
//! through:
//!
//! ```text
//! Serving ──trigger──▶ Draining ──all connections closed──▶ Stopped
//!                          │
//!                          └──shutdown timeout expired──▶ TimedOut
//! ```
//!
//! Transitions only go forward.
//!
//! # Example
//!
//! ```rust
//! use keel_server::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let for_server = shutdown.clone();
//!
//! shutdown.trigger();
//! assert!(for_server.is_triggered());
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};

/// Lifecycle of a serving server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Accepting connections.
    Serving,
    /// No longer accepting; waiting for open connections to finish.
    Draining,
    /// Every connection finished within the timeout.
    Stopped,
    /// The timeout expired with connections still open.
    TimedOut,
}

impl ShutdownState {
    /// Returns `true` for `Stopped` and `TimedOut`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::TimedOut)
    }

    /// Moves to `next` if that is a forward transition.
    ///
    /// Returns `false` and leaves the state unchanged otherwise.
    pub fn advance(&mut self, next: Self) -> bool {
        let allowed = matches!(
            (*self, next),
            (Self::Serving, Self::Draining)
                | (Self::Draining, Self::Stopped)
                | (Self::Draining, Self::TimedOut)
        );
        if allowed {
            *self = next;
        }
        allowed
    }
}

/// Cancellation source for a server.
///
/// Clones share state. Triggering is idempotent and observed by every clone,
/// including ones that start waiting after the trigger.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Creates a signal that triggers on SIGTERM or SIGINT (Ctrl-C on
    /// non-Unix platforms).
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            if wait_for_os_signal().await {
                trigger.trigger();
            }
        });

        signal
    }

    /// Triggers shutdown.
    pub fn trigger(&self) {
        self.sender.send_if_modified(|triggered| !std::mem::replace(triggered, true));
    }

    /// Returns `true` once shutdown has been triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Waits until shutdown is triggered. Returns immediately if it already was.
    pub async fn recv(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for an OS shutdown signal. Returns `false` if no handler could be
/// installed.
async fn wait_for_os_signal() -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(err), _) | (_, Err(err)) => {
                    tracing::error!(error = %err, "failed to install shutdown signal handlers");
                    return false;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        }
        true
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received Ctrl-C, shutting down");
                true
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install Ctrl-C handler");
                false
            }
        }
    }
}

/// Counts open connections so shutdown can wait for them.
///
/// # Example
///
/// ```rust
/// use keel_server::shutdown::ConnectionTracker;
///
/// let tracker = ConnectionTracker::new();
/// let token = tracker.acquire();
/// assert_eq!(tracker.active_connections(), 1);
///
/// drop(token);
/// assert_eq!(tracker.active_connections(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicUsize,
    idle: Notify,
}

impl ConnectionTracker {
    /// Creates a tracker with no open connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection. It counts as open until the token is dropped.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        ConnectionToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Waits until no connection is open.
    pub async fn wait_idle(&self) {
        loop {
            // Register interest before checking, so a drop in between is not missed.
            let idle = self.inner.idle.notified();
            if self.active_connections() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Waits up to `timeout` for every connection to close.
    ///
    /// Returns [`ShutdownState::Stopped`] or [`ShutdownState::TimedOut`].
    pub async fn drain(&self, timeout: Duration) -> ShutdownState {
        match tokio::time::timeout(timeout, self.wait_idle()).await {
            Ok(()) => ShutdownState::Stopped,
            Err(_) => ShutdownState::TimedOut,
        }
    }
}

/// An open connection registered with a [`ConnectionTracker`].
#[derive(Debug)]
pub struct ConnectionToken {
    inner: Arc<TrackerInner>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}
