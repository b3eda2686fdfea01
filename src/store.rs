//! Atomic single-slot snapshot store.

use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;

/// Holds exactly one snapshot at a time.
///
/// Readers get a cheap shared handle to the current snapshot that stays
/// valid for their scope even if a writer swaps in a newer one
/// concurrently. Writers replace the snapshot wholesale; once `set`
/// returns, every subsequent `get` observes the new snapshot or a later
/// one. No lock is held across user code.
pub struct SnapshotStore<S> {
    slot: ArcSwap<S>,
}

impl<S> SnapshotStore<S> {
    /// Creates a store holding `initial`. A store is never empty.
    pub fn new(initial: Arc<S>) -> Self {
        Self {
            slot: ArcSwap::new(initial),
        }
    }

    /// Returns the current snapshot.
    pub fn get(&self) -> Arc<S> {
        self.slot.load_full()
    }

    /// Publishes a new snapshot, retiring the previous one. The previous
    /// snapshot is dropped once the last reader releases its handle.
    pub fn set(&self, snapshot: Arc<S>) {
        self.slot.store(snapshot);
    }
}

impl<S> fmt::Debug for SnapshotStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotStore").finish_non_exhaustive()
    }
}
