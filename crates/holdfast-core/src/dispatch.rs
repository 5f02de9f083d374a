//! Release dispatcher for free notifications.
//!
//! Free hooks run on engine threads, sometimes while the engine holds its own
//! locks. In [`DispatchMode::Deferred`] the hook only detaches the entry and
//! hands it to a dedicated worker, so release logic that calls back into the
//! engine never runs nested inside the engine's callback dispatch.

use crate::config::{DispatchMode, RetentionConfig};
use crate::registry::DetachedEntry;
use crate::Result;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

pub(crate) enum ReleaseCommand {
    Release(DetachedEntry),
    /// Acknowledge once everything queued before it has been released
    Flush(Sender<()>),
    /// Drain the overflow list
    Wake,
    Shutdown,
}

/// Entries that did not fit the bounded queue.
type Overflow = Arc<Mutex<Vec<DetachedEntry>>>;

pub struct ReleaseDispatcher {
    mode: DispatchMode,
    command_tx: Option<Sender<ReleaseCommand>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_thread: Option<ThreadId>,
    overflow: Overflow,
    running: Arc<AtomicBool>,
    released: Arc<AtomicU64>,
}

impl ReleaseDispatcher {
    pub fn new(config: &RetentionConfig) -> Result<Self> {
        config.validate()?;
        match config.dispatch {
            DispatchMode::Inline => Ok(Self::inline()),
            DispatchMode::Deferred => Self::spawn(config),
        }
    }

    /// Dispatcher that releases on the notifying thread.
    pub fn inline() -> Self {
        Self {
            mode: DispatchMode::Inline,
            command_tx: None,
            worker: Mutex::new(None),
            worker_thread: None,
            overflow: Arc::default(),
            running: Arc::new(AtomicBool::new(false)),
            released: Arc::new(AtomicU64::new(0)),
        }
    }

    fn spawn(config: &RetentionConfig) -> Result<Self> {
        let (tx, rx) = bounded(config.queue_capacity);
        let running = Arc::new(AtomicBool::new(true));
        let released = Arc::new(AtomicU64::new(0));
        let overflow: Overflow = Arc::default();

        let worker_released = Arc::clone(&released);
        let worker_overflow = Arc::clone(&overflow);
        let handle = thread::Builder::new()
            .name(config.worker_name.clone())
            .spawn(move || release_loop(rx, worker_overflow, worker_released))?;

        tracing::debug!(worker = %config.worker_name, capacity = config.queue_capacity, "release dispatcher started");

        Ok(Self {
            mode: DispatchMode::Deferred,
            command_tx: Some(tx),
            worker_thread: Some(handle.thread().id()),
            worker: Mutex::new(Some(handle)),
            overflow,
            running,
            released,
        })
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Release `detached` now or hand it to the worker. Never blocks.
    ///
    /// While the worker runs nothing is released on the calling thread: a
    /// full queue spills into the overflow list, which the worker drains
    /// after its next command.
    pub fn dispatch(&self, detached: DetachedEntry) {
        let Some(tx) = self.command_tx.as_ref() else {
            self.release_now(detached);
            return;
        };
        if !self.running.load(Ordering::Acquire) {
            self.release_now(detached);
            return;
        }

        match tx.try_send(ReleaseCommand::Release(detached)) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                if let ReleaseCommand::Release(detached) = command {
                    tracing::debug!(key = %detached.key(), "release queue full, spilling to overflow");
                    self.overflow.lock().push(detached);
                }
                // Fails only while a queued command will drain first
                let _ = tx.try_send(ReleaseCommand::Wake);
                // Shutdown may have drained the overflow already
                if !self.running.load(Ordering::Acquire) {
                    self.drain_overflow();
                }
            }
            Err(TrySendError::Disconnected(command)) => {
                if let ReleaseCommand::Release(detached) = command {
                    tracing::warn!(key = %detached.key(), "release worker gone, releasing inline");
                    self.release_now(detached);
                }
            }
        }
    }

    fn release_now(&self, detached: DetachedEntry) {
        let count = detached.release();
        self.released.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn drain_overflow(&self) {
        let spilled = mem::take(&mut *self.overflow.lock());
        for detached in spilled {
            self.release_now(detached);
        }
    }

    fn on_worker(&self) -> bool {
        self.worker_thread == Some(thread::current().id())
    }

    /// Wait until everything queued so far has been released. Returns at
    /// once when called from the worker itself.
    pub fn flush(&self) {
        let Some(tx) = self.command_tx.as_ref() else {
            return;
        };
        if !self.running.load(Ordering::Acquire) || self.on_worker() {
            return;
        }
        let (ack_tx, ack_rx) = bounded(1);
        if tx.send(ReleaseCommand::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Stop the worker after it drains its queue. Later dispatches run inline.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(tx) = self.command_tx.as_ref() {
            let _ = tx.send(ReleaseCommand::Shutdown);
        }
        if let Some(handle) = self.worker.lock().take() {
            // A release running on the worker may drop the last owner
            if !self.on_worker() {
                let _ = handle.join();
            }
        }
        self.drain_overflow();
        tracing::debug!("release dispatcher stopped");
    }

    /// Resources released through this dispatcher so far.
    pub fn released_count(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for ReleaseDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn release_loop(rx: Receiver<ReleaseCommand>, overflow: Overflow, released: Arc<AtomicU64>) {
    let release = |detached: DetachedEntry| {
        let key = detached.key();
        let count = detached.release();
        released.fetch_add(count as u64, Ordering::Relaxed);
        tracing::trace!(%key, count, "deferred release");
    };
    let drain = || {
        let spilled = mem::take(&mut *overflow.lock());
        spilled.into_iter().for_each(&release);
    };

    while let Ok(command) = rx.recv() {
        match command {
            ReleaseCommand::Release(detached) => release(detached),
            ReleaseCommand::Flush(ack) => {
                drain();
                let _ = ack.send(());
                continue;
            }
            ReleaseCommand::Wake => {}
            ReleaseCommand::Shutdown => break,
        }
        drain();
    }

    // Anything that raced the shutdown command
    while let Ok(command) = rx.try_recv() {
        if let ReleaseCommand::Release(detached) = command {
            release(detached);
        }
    }
    drain();
}
