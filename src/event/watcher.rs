use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// A one-shot subscription to one event name's next fire.
///
/// The wake channel is closed exactly once, by [`WatcherSet::fire`]; after
/// that the watcher is spent and the caller subscribes afresh.
#[derive(Debug)]
pub(crate) struct Watcher {
    id: u64,
    event: oneshot::Receiver<()>,
}

impl Watcher {
    pub(crate) fn new(
        id: u64,
        event: oneshot::Receiver<()>,
    ) -> Self {
        Self { id, event }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Waits until the watcher is fired.
    ///
    /// A torn-down sender wakes too; callers re-validate against storage
    /// state after every wake, so a spurious wake is harmless.
    pub(crate) async fn changed(&mut self) {
        let _ = (&mut self.event).await;
    }
}

/// The live subscribers for one event name.
///
/// `removed` is the single-exit flag serialising `add` against `fire` and
/// `remove`: once a set has been torn down it never accepts another watcher,
/// and the losing `add` retries against a fresh set.
#[derive(Debug, Default)]
pub(crate) struct WatcherSet {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    items: HashMap<u64, oneshot::Sender<()>>,
    removed: bool,
}

impl WatcherSet {
    /// Registers a watcher's wake channel. Returns false if the set has
    /// already been torn down.
    pub(crate) fn add(
        &self,
        id: u64,
        event: oneshot::Sender<()>,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.removed {
            return false;
        }
        inner.items.insert(id, event);
        true
    }

    /// Drops one watcher. When the last watcher leaves, `on_empty` deletes
    /// this set from the bus mapping and the set is marked removed.
    pub(crate) fn remove(
        &self,
        id: u64,
        on_empty: impl FnOnce(),
    ) {
        let mut inner = self.inner.lock();
        if inner.removed {
            return;
        }
        if inner.items.remove(&id).is_none() {
            return;
        }
        if !inner.items.is_empty() {
            return;
        }
        on_empty();
        inner.removed = true;
    }

    /// Tears the set down and wakes every watcher.
    ///
    /// `on_fire` deletes this set from the bus mapping. The wake channels
    /// are closed only after the set lock is released, so no subscriber runs
    /// while the lock is held.
    pub(crate) fn fire(
        &self,
        on_fire: impl FnOnce(),
    ) {
        let items = {
            let mut inner = self.inner.lock();
            if inner.removed {
                return;
            }
            on_fire();
            inner.removed = true;
            std::mem::take(&mut inner.items)
        };
        for (_, event) in items {
            let _ = event.send(());
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().items.len()
    }
}
