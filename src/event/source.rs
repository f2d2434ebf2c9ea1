//! Abstract filesystem watch source.
//!
//! Wraps the platform watcher behind a channel of raw events: the `notify`
//! callback runs on its own thread and forwards into a tokio channel that the
//! bus's dispatch loop reads from. Dropping the source tears the OS watch
//! down and closes the channel, which is how the dispatch loop terminates.

use std::path::Path;

use notify::Event;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher as _;
use tokio::sync::mpsc;
use tracing::warn;

pub(crate) struct FsEventSource {
    // Held only to keep the OS watch registered.
    _watcher: RecommendedWatcher,
}

impl FsEventSource {
    /// Starts watching `dir` (non-recursive) and returns the source handle
    /// together with its raw event stream.
    ///
    /// On failure after the watcher is created, the half-constructed watcher
    /// is dropped and the OS resources released.
    pub(crate) fn watch(
        dir: &Path
    ) -> Result<(Self, mpsc::UnboundedReceiver<Event>), notify::Error> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<Event>| match result {
                // A closed receiver means the bus is shutting down.
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(error) => warn!(?error, "filesystem watch source reported an error"),
            })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        Ok((Self { _watcher: watcher }, event_rx))
    }
}
