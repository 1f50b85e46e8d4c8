//! Session lifecycle supervisor
//!
//! Close, end-of-stream and errors on either socket all end up in
//! [`Lifecycle::destroy`]. The first call wins an atomic transition into the
//! destroyed state and wakes every task of the session; the tasks then close
//! the socket halves they own. Later calls are no-ops.

use crate::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Why a session was torn down
#[derive(Debug)]
pub enum CloseReason {
    /// Local client closed its side
    LocalClosed,
    /// Upstream closed its side
    RemoteClosed,
    /// Protocol, crypto, auth or transport failure
    Failed(Error),
    /// Local server shutting down
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::LocalClosed => f.write_str("local closed"),
            CloseReason::RemoteClosed => f.write_str("remote closed"),
            CloseReason::Failed(e) => write!(f, "{}", e),
            CloseReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

struct Inner {
    id: u64,
    destroyed: AtomicBool,
    notify: Notify,
}

/// Shared teardown state of one session
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

impl Lifecycle {
    pub fn new(id: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                destroyed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Tear the session down. Returns `true` only for the call that
    /// performed the transition.
    pub fn destroy(&self, reason: CloseReason) -> bool {
        if self
            .inner
            .destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[{}] Already destroyed, ignoring {}", self.inner.id, reason);
            return false;
        }

        match &reason {
            CloseReason::Failed(e) => warn!("[{}] Session failed: {}", self.inner.id, e),
            CloseReason::Shutdown => info!("[{}] Session closed by shutdown", self.inner.id),
            _ => debug!("[{}] Session closed: {}", self.inner.id, reason),
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Resolves once the session has been destroyed
    pub async fn destroyed(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent destroy is not missed
        notified.as_mut().enable();
        if self.is_destroyed() {
            return;
        }
        notified.await;
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("id", &self.inner.id)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
