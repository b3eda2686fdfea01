//! Shared polling loop for file-backed sources.
//!
//! Files are re-read in full on every tick. Holding no descriptors between
//! ticks is what makes atomic-rename rotation safe: the external writer
//! replaces the file, the next tick opens the new one.

use crate::error::{Error, Result};
use crate::pem::ContentDigest;
use crate::source::{NotifyFn, SnapshotStream};
use futures::stream;
use futures::StreamExt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Outcome of one load attempt.
pub(super) enum Loaded<S> {
    /// Content digest equals the last emitted digest.
    Unchanged,
    /// A new bundle parsed and verified successfully.
    New(ContentDigest, Arc<S>),
}

/// One full read-digest-parse pass over a configured file set.
pub(super) trait PemsLoader: Send + Sync + 'static {
    type Snapshot: Send + Sync + 'static;

    /// Reads every configured file, digests the bundle and, when the digest
    /// differs from `last`, parses it into a snapshot.
    fn load(
        &self,
        last: Option<ContentDigest>,
    ) -> impl Future<Output = Result<Loaded<Self::Snapshot>>> + Send;
}

pub(super) async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|source| Error::Load {
        path: path.to_path_buf(),
        source,
    })
}

pub(super) async fn read_optional_file(path: Option<&Path>) -> Result<Option<Vec<u8>>> {
    match path {
        Some(path) => Ok(Some(read_file(path).await?)),
        None => Ok(None),
    }
}

struct PollState<L> {
    loader: Arc<L>,
    interval: Option<Interval>,
    last: Option<ContentDigest>,
    notify: Option<NotifyFn>,
    emitted: bool,
}

/// Turns a loader into the source's snapshot stream.
///
/// `refresh == 0` produces a one-shot stream: the initial snapshot (or
/// nothing, if the initial load fails) and then the end of the stream.
/// `refresh > 0` keeps polling with monotonic tick spacing; a failed load
/// keeps the last emitted digest so the next tick retries from scratch.
///
/// The notify callback fires on rotations only, not on the initial load.
pub(super) fn poll_snapshots<L: PemsLoader>(
    loader: Arc<L>,
    refresh: Duration,
    notify: Option<NotifyFn>,
) -> SnapshotStream<L::Snapshot> {
    let interval = (refresh > Duration::ZERO).then(|| {
        let mut ticker = interval(refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });

    let state = PollState {
        loader,
        interval,
        last: None,
        notify,
        emitted: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            match state.interval.as_mut() {
                // The first tick of a tokio interval completes immediately,
                // so the initial load is not delayed by one period.
                Some(ticker) => {
                    ticker.tick().await;
                }
                None if state.emitted => return None,
                None => {}
            }

            match state.loader.load(state.last).await {
                Ok(Loaded::New(digest, snapshot)) => {
                    let is_rotation = state.last.is_some();
                    debug!(%digest, rotation = is_rotation, "credentials loaded");
                    state.last = Some(digest);
                    state.emitted = true;
                    if is_rotation {
                        if let Some(notify) = state.notify.as_ref() {
                            notify();
                        }
                    }
                    return Some((snapshot, state));
                }
                Ok(Loaded::Unchanged) => {}
                Err(error) => {
                    warn!(%error, "failed loading credentials; keeping previous");
                    if state.interval.is_none() {
                        return None;
                    }
                }
            }

            if state.interval.is_none() {
                // One-shot source: nothing further after the initial load.
                return None;
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Loader scripted with a fixed sequence of outcomes.
    struct ScriptedLoader {
        script: Mutex<Vec<Result<Option<(u8, u32)>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedLoader {
        fn new(script: Vec<Result<Option<(u8, u32)>>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn digest_of(tag: u8) -> ContentDigest {
        crate::pem::ServerPems {
            cert: vec![tag],
            key: Vec::new(),
            client_ca: None,
            client_crl: None,
        }
        .digest()
    }

    impl PemsLoader for ScriptedLoader {
        type Snapshot = u32;

        fn load(
            &self,
            last: Option<ContentDigest>,
        ) -> impl Future<Output = Result<Loaded<u32>>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() {
                    Ok(None)
                } else {
                    script.remove(0)
                }
            };
            async move {
                match next? {
                    None => Ok(Loaded::Unchanged),
                    Some((tag, value)) => {
                        let digest = digest_of(tag);
                        if last == Some(digest) {
                            Ok(Loaded::Unchanged)
                        } else {
                            Ok(Loaded::New(digest, Arc::new(value)))
                        }
                    }
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emits_only_on_digest_change() {
        let loader = ScriptedLoader::new(vec![
            Ok(Some((1, 10))),
            Ok(Some((1, 11))), // same digest, must not emit
            Ok(Some((2, 20))),
        ]);
        let mut stream = poll_snapshots(Arc::clone(&loader), Duration::from_millis(10), None);

        assert_eq!(*stream.next().await.unwrap(), 10);
        assert_eq!(*stream.next().await.unwrap(), 20);
        assert_eq!(loader.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn load_error_keeps_previous_digest_and_retries() {
        let loader = ScriptedLoader::new(vec![
            Ok(Some((1, 10))),
            Err(Error::Parse("broken".into())),
            Ok(Some((2, 20))),
        ]);
        let mut stream = poll_snapshots(loader, Duration::from_millis(10), None);

        assert_eq!(*stream.next().await.unwrap(), 10);
        // The error tick is skipped; the next good load is emitted.
        assert_eq!(*stream.next().await.unwrap(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn notify_fires_on_rotation_but_not_initial_load() {
        let notified = Arc::new(AtomicUsize::new(0));
        let notify: NotifyFn = {
            let notified = Arc::clone(&notified);
            Arc::new(move || {
                notified.fetch_add(1, Ordering::SeqCst);
            })
        };

        let loader = ScriptedLoader::new(vec![Ok(Some((1, 10))), Ok(Some((2, 20)))]);
        let mut stream = poll_snapshots(loader, Duration::from_millis(10), Some(notify));

        let _ = stream.next().await.unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        let _ = stream.next().await.unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_refresh_is_one_shot() {
        let loader = ScriptedLoader::new(vec![Ok(Some((1, 10))), Ok(Some((2, 20)))]);
        let mut stream = poll_snapshots(Arc::clone(&loader), Duration::ZERO, None);

        assert_eq!(*stream.next().await.unwrap(), 10);
        assert!(stream.next().await.is_none());
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test]
    async fn failed_one_shot_ends_the_stream() {
        let loader = ScriptedLoader::new(vec![Err(Error::Parse("broken".into()))]);
        let mut stream = poll_snapshots(loader, Duration::ZERO, None);
        assert!(stream.next().await.is_none());
    }
}
