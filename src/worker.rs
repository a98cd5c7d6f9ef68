//! Thread plumbing shared by every loop
//!
//! Each pipeline (capture/send, receive/playback, ping, echo, announce,
//! listen) runs on one named OS thread. A [`CancelToken`] is the only way
//! to ask it to stop, and a [`Worker`] is the handle used to wait for it.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::SessionError;

struct CancelInner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
}

/// Cooperative cancellation flag owned by one session
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                lock: Mutex::new(()),
                cvar: Condvar::new(),
            }),
        }
    }

    /// Request cancellation and wake every sleeper
    pub fn cancel(&self) {
        let _guard = self.inner.lock.lock();
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `timeout` unless cancelled first.
    ///
    /// Returns `true` if the token was cancelled.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_cancelled() {
            if self.inner.cvar.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_cancelled()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running loop thread
pub struct Worker {
    name: String,
    handle: Option<JoinHandle<()>>,
    done_rx: Receiver<()>,
}

impl Worker {
    /// Spawn `body` on a named thread
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self, SessionError>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        // The sender is never used; dropping it when the thread exits is the signal.
        let (done_tx, done_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _done = done_tx;
                body();
            })
            .map_err(SessionError::SpawnFailed)?;

        Ok(Self {
            name,
            handle: Some(handle),
            done_rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.done_rx.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }

    /// Wait up to `timeout` for the thread to exit.
    ///
    /// A thread that is still running after the timeout is detached.
    /// Returns `true` if the thread was joined.
    pub fn join_timeout(mut self, timeout: Duration) -> bool {
        match self.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        tracing::error!("Worker {} panicked", self.name);
                    }
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Worker {} did not stop within {:?}, detaching",
                    self.name,
                    timeout
                );
                false
            }
        }
    }
}
