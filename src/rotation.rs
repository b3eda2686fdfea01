//! Rotation engine: composes a snapshot source with a store.
//!
//! The engine never parses credentials itself. It waits for the source's
//! first snapshot (with a timeout, so startup fails loudly when the source
//! cannot produce one), installs it, and then keeps installing subsequent
//! snapshots from a background task until the stream ends or the rotation
//! is shut down.

use crate::error::{Error, Result};
use crate::source::{SnapshotSource, SnapshotStream};
use crate::store::SnapshotStore;
use futures::StreamExt;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default window for the initial snapshot before construction fails.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle for receiving rotation notifications.
///
/// Each installed snapshot after the initial one bumps a monotonic
/// sequence number. Cloning the handle creates another receiver sharing
/// the same stream; a slow receiver may skip intermediate sequence numbers
/// (standard `watch` behavior).
#[derive(Clone, Debug)]
pub struct RotationUpdates {
    rx: watch::Receiver<u64>,
}

impl RotationUpdates {
    /// Waits for the next rotation and returns the new sequence number.
    ///
    /// The initial load does not trigger a notification; only subsequent
    /// rotations do.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceClosed`] once the rotation has stopped and
    /// no further updates can arrive.
    pub async fn changed(&mut self) -> Result<u64> {
        self.rx.changed().await.map_err(|_| Error::SourceClosed)?;
        Ok(*self.rx.borrow())
    }

    /// Returns the last sequence number without waiting.
    pub fn last(&self) -> u64 {
        *self.rx.borrow()
    }
}

/// Live rotation of credential snapshots from a source into a store.
///
/// Constructed with [`Rotation::start`]; the returned handle is cheaply
/// cloneable. Dropping the last handle cancels the background task;
/// [`Rotation::shutdown`] does so deterministically and waits for it.
pub struct Rotation<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Rotation<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S> {
    store: Arc<SnapshotStore<S>>,
    closed: AtomicBool,
    cancel: CancellationToken,
    update_rx: watch::Receiver<u64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        // Best-effort cancellation. Do not block in Drop.
        self.cancel.cancel();
    }
}

impl<S: Send + Sync + 'static> Rotation<S> {
    /// Subscribes to the source, waits for the first snapshot and spawns
    /// the background install task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InitialLoadTimeout`] if no snapshot arrives within
    /// `init_timeout`, or [`Error::SourceClosed`] if the source's stream
    /// ends before producing one.
    pub async fn start<Src>(source: &Src, init_timeout: Duration) -> Result<Self>
    where
        Src: SnapshotSource<Snapshot = S> + ?Sized,
    {
        let mut stream = source.snapshots();

        let first = tokio::time::timeout(init_timeout, stream.next())
            .await
            .map_err(|_| Error::InitialLoadTimeout)?
            .ok_or(Error::SourceClosed)?;

        let store = Arc::new(SnapshotStore::new(first));
        let (update_tx, update_rx) = watch::channel(0u64);
        let cancel = CancellationToken::new();

        // The task owns only what it writes to; it holds no reference back
        // to the handle, so dropping the last handle cancels it.
        let handle = tokio::spawn(run_install_loop(
            Arc::clone(&store),
            update_tx,
            stream,
            cancel.clone(),
        ));

        let inner = Arc::new(Inner {
            store,
            closed: AtomicBool::new(false),
            cancel,
            update_rx,
            task: Mutex::new(None),
        });
        *inner.task.lock().await = Some(handle);

        Ok(Self { inner })
    }

    /// Returns the current snapshot. This is a single atomic load; the
    /// last installed snapshot stays available even after shutdown.
    pub fn current(&self) -> Arc<S> {
        self.inner.store.get()
    }

    /// Returns a shared handle to the underlying store.
    pub fn store(&self) -> Arc<SnapshotStore<S>> {
        Arc::clone(&self.inner.store)
    }

    /// Returns a handle for receiving rotation notifications.
    pub fn updated(&self) -> RotationUpdates {
        RotationUpdates {
            rx: self.inner.update_rx.clone(),
        }
    }

    /// Cancels the background task and waits for it to finish.
    ///
    /// Idempotent: only the first call has any effect.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();

        if let Some(handle) = self.inner.task.lock().await.take() {
            if let Err(error) = handle.await {
                warn!(%error, "error joining rotation task during shutdown");
            }
        }
    }
}

async fn run_install_loop<S: Send + Sync + 'static>(
    store: Arc<SnapshotStore<S>>,
    update_tx: watch::Sender<u64>,
    mut stream: SnapshotStream<S>,
    token: CancellationToken,
) {
    let mut seq = 0u64;
    loop {
        let item = tokio::select! {
            () = token.cancelled() => {
                debug!("rotation cancelled; stopping");
                return;
            }
            item = stream.next() => item,
        };

        match item {
            Some(snapshot) => {
                store.set(snapshot);
                seq += 1;
                let _ = update_tx.send(seq);
                info!(seq, "credentials rotated");
            }
            None => {
                debug!("snapshot stream ended; stopping rotation");
                return;
            }
        }
    }
}

impl<S> fmt::Debug for Rotation<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rotation")
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .field("update_seq", &*self.inner.update_rx.borrow())
            .finish_non_exhaustive()
    }
}
