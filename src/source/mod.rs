//! Credential snapshot sources.
//!
//! A source produces a lazy, unbounded stream of parsed credential
//! snapshots. The end of the stream signals permanent shutdown of the
//! source; every emitted item is a fully parsed, internally consistent
//! snapshot (no partial updates).
//!
//! The file-backed sources in [`file_server`] and [`file_client`] poll a
//! set of PEM files and emit a new snapshot whenever the combined content
//! digest changes.

mod file;
mod file_client;
mod file_server;

pub use file_client::{FileClientSource, FileClientSourceConfig};
pub use file_server::{FileServerSource, FileServerSourceConfig};

use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

/// Stream of snapshots produced by a source.
pub type SnapshotStream<S> = BoxStream<'static, Arc<S>>;

/// Callback invoked after a new snapshot has been emitted.
pub type NotifyFn = Arc<dyn Fn() + Send + Sync>;

/// A producer of credential snapshots.
///
/// This is the pluggable seam of the crate: the file sources implement it
/// by polling the filesystem, but a secret-manager or test source works
/// just as well. Implementations must only ever emit snapshots that passed
/// parsing and verification.
pub trait SnapshotSource: Send + Sync + fmt::Debug + 'static {
    /// The snapshot type this source produces.
    type Snapshot: Send + Sync + 'static;

    /// Returns the stream of snapshots.
    ///
    /// The stream is lazy: no I/O happens until it is polled. Dropping the
    /// stream stops the source's polling.
    fn snapshots(&self) -> SnapshotStream<Self::Snapshot>;
}
