//! Cancellable per-operation timeouts
//!
//! Each connection owns one [`TimeoutController`] with three configured
//! durations, one per operation kind. At most one timer is armed at any
//! instant, matching the single outstanding I/O operation of the
//! connection it belongs to. When the armed timer expires it cancels
//! the shared [`CancellationToken`], which the pending I/O operation is
//! `select!`ing against.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The operation a timeout duration applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    Read,
    Write,
    Close,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Read => write!(f, "read"),
            TimeoutKind::Write => write!(f, "write"),
            TimeoutKind::Close => write!(f, "close"),
        }
    }
}

/// Shortest configurable timeout, in seconds
pub const MIN_TIMEOUT_SECS: u64 = 1;
/// Longest configurable timeout, in seconds
pub const MAX_TIMEOUT_SECS: u64 = 240;
/// Default for all three kinds, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

type CancelHandler = Arc<dyn Fn() + Send + Sync>;

/// Owns the three operation timeouts and the shared cancellation token.
///
/// Cancellation tokens are one-shot: once the timer has fired, the next
/// `start` allocates a fresh token and re-attaches the registered
/// handler, so a connection that survives one cancellation (the close
/// path does) keeps working.
pub struct TimeoutController {
    token: CancellationToken,
    read: Duration,
    write: Duration,
    close: Duration,
    armed: Option<JoinHandle<()>>,
    handler: Option<CancelHandler>,
    watcher: Option<JoinHandle<()>>,
}

impl TimeoutController {
    /// Create a controller with all three durations given in seconds.
    /// Values outside 1–240 s are clamped into range.
    pub fn new(read_secs: u64, write_secs: u64, close_secs: u64) -> Self {
        let mut controller = Self {
            token: CancellationToken::new(),
            read: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            write: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            close: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            armed: None,
            handler: None,
            watcher: None,
        };
        controller.set(TimeoutKind::Read, read_secs);
        controller.set(TimeoutKind::Write, write_secs);
        controller.set(TimeoutKind::Close, close_secs);
        controller
    }

    /// The configured duration for `kind`
    pub fn get(&self, kind: TimeoutKind) -> Duration {
        match kind {
            TimeoutKind::Read => self.read,
            TimeoutKind::Write => self.write,
            TimeoutKind::Close => self.close,
        }
    }

    /// Set the duration for `kind` in seconds, clamped into 1–240 s
    pub fn set(&mut self, kind: TimeoutKind, secs: u64) {
        let duration = Duration::from_secs(secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS));
        match kind {
            TimeoutKind::Read => self.read = duration,
            TimeoutKind::Write => self.write = duration,
            TimeoutKind::Close => self.close = duration,
        }
    }

    /// The shared token every pending I/O operation selects against
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Register a handler invoked when the token is cancelled,
    /// replacing any previously registered one
    pub fn on_cancel(&mut self, handler: impl Fn() + Send + Sync + 'static) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        self.handler = Some(Arc::new(handler));
        self.spawn_watcher();
    }

    /// Arm the timer for `kind`, disarming any currently armed timer
    /// first. A token left cancelled by an earlier expiry is renewed.
    pub fn start(&mut self, kind: TimeoutKind) {
        self.stop(kind);
        if self.token.is_cancelled() {
            warn!("cancellation token already fired, renewing it");
            self.token = CancellationToken::new();
            if let Some(watcher) = self.watcher.take() {
                watcher.abort();
            }
            self.spawn_watcher();
        }
        let duration = self.get(kind);
        debug!(%kind, ?duration, "timer armed");
        let token = self.token.clone();
        self.armed = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            token.cancel();
        }));
    }

    /// Disarm the armed timer, if any. The kind is accepted for
    /// symmetry; a single timer is armed at a time.
    pub fn stop(&mut self, _kind: TimeoutKind) {
        if let Some(timer) = self.armed.take() {
            timer.abort();
        }
    }

    fn spawn_watcher(&mut self) {
        if let Some(handler) = self.handler.clone() {
            let token = self.token.clone();
            self.watcher = Some(tokio::spawn(async move {
                token.cancelled().await;
                handler();
            }));
        }
    }
}

impl Drop for TimeoutController {
    fn drop(&mut self) {
        if let Some(timer) = self.armed.take() {
            timer.abort();
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}
