//! Event bus: per-name watcher sets over one filesystem watch source.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use notify::Event;
use notify::EventKind;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::trace;

use super::source::FsEventSource;
use super::watcher::Watcher;
use super::watcher::WatcherSet;
use crate::config::SpawnFn;
use crate::errors::EventBusError;

type WatcherSets = Arc<DashMap<String, Arc<WatcherSet>>>;

/// Options for event buses.
pub(crate) struct EventBusOptions {
    /// Directory whose file events are multiplexed. An empty path is
    /// replaced with `"."`.
    pub event_dir_name: PathBuf,
    /// How the dispatch loop is run, default `tokio::spawn`.
    pub spawn: Option<SpawnFn>,
}

impl Default for EventBusOptions {
    fn default() -> Self {
        Self {
            event_dir_name: PathBuf::from("."),
            spawn: None,
        }
    }
}

impl EventBusOptions {
    fn sanitize(&mut self) {
        if self.event_dir_name.as_os_str().is_empty() {
            self.event_dir_name = PathBuf::from(".");
        }
    }
}

/// Demultiplexes raw file-change events into per-name watcher sets.
///
/// The mapping owns its watcher sets; a set leaves the mapping at the
/// instant it fires or empties. The `removed` flag inside each set
/// serialises the race between a subscriber being added and the set being
/// torn down (see [`EventBus::add_watcher`]).
pub(crate) struct EventBus {
    options: EventBusOptions,
    watcher_sets: WatcherSets,
    next_watcher_id: AtomicU64,
    source: Mutex<Option<FsEventSource>>,
    is_closed: Arc<AtomicBool>,
}

impl EventBus {
    pub(crate) fn new(mut options: EventBusOptions) -> Self {
        options.sanitize();
        Self {
            options,
            watcher_sets: Arc::new(DashMap::new()),
            next_watcher_id: AtomicU64::new(1),
            source: Mutex::new(None),
            is_closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates the watch source over the event directory and spawns the
    /// dispatch loop.
    pub(crate) fn open(&self) -> Result<(), EventBusError> {
        let (source, events) = FsEventSource::watch(&self.options.event_dir_name)?;
        *self.source.lock() = Some(source);
        let watcher_sets = Arc::clone(&self.watcher_sets);
        let is_closed = Arc::clone(&self.is_closed);
        let dispatch = async move { Self::handle_events(watcher_sets, is_closed, events).await };
        match &self.options.spawn {
            Some(spawn) => spawn(Box::pin(dispatch)),
            None => {
                tokio::spawn(dispatch);
            }
        }
        Ok(())
    }

    /// Translates raw filesystem events into watcher-set fires.
    ///
    /// Terminates when the watch source's channel closes (the source is
    /// dropped by `close`) or the bus is observed closed.
    async fn handle_events(
        watcher_sets: WatcherSets,
        is_closed: Arc<AtomicBool>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        while let Some(event) = events.recv().await {
            if is_closed.load(Ordering::SeqCst) {
                break;
            }
            // Only creations and content writes qualify. notify's Modify
            // covers more subkinds than a plain write; the extra fires are
            // spurious wakes that watchers re-validate away.
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                continue;
            }
            for path in &event.paths {
                let Some(event_name) = path.file_name().and_then(|name| name.to_str()) else {
                    continue;
                };
                trace!(event_name, kind = ?event.kind, "dispatching file event");
                Self::fire_event(&watcher_sets, event_name);
            }
        }
        debug!("event dispatch loop terminated");
    }

    fn fire_event(
        watcher_sets: &DashMap<String, Arc<WatcherSet>>,
        event_name: &str,
    ) {
        let watcher_set = match watcher_sets.get(event_name) {
            Some(entry) => Arc::clone(entry.value()),
            None => return,
        };
        // The map guard is gone by here; firing removes the entry itself.
        watcher_set.fire(|| {
            watcher_sets.remove(event_name);
        });
    }

    /// Subscribes a new watcher to `event_name`.
    ///
    /// Loops over the torn-down-set race: an `add` losing against a
    /// concurrent fire or removal observes the set's removed flag and
    /// retries on a freshly inserted set.
    pub(crate) fn add_watcher(
        &self,
        event_name: &str,
    ) -> Result<Watcher, EventBusError> {
        loop {
            if self.is_closed() {
                return Err(EventBusError::Closed);
            }
            let watcher_set = Arc::clone(
                self.watcher_sets
                    .entry(event_name.to_owned())
                    .or_default()
                    .value(),
            );
            let id = self.next_watcher_id.fetch_add(1, Ordering::Relaxed);
            let (event_tx, event_rx) = oneshot::channel();
            if !watcher_set.add(id, event_tx) {
                continue;
            }
            return Ok(Watcher::new(id, event_rx));
        }
    }

    /// Unsubscribes `watcher`. Removing from an already-gone set is a no-op.
    pub(crate) fn remove_watcher(
        &self,
        event_name: &str,
        watcher: &Watcher,
    ) -> Result<(), EventBusError> {
        if self.is_closed() {
            return Err(EventBusError::Closed);
        }
        let watcher_set = match self.watcher_sets.get(event_name) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Ok(()),
        };
        watcher_set.remove(watcher.id(), || {
            self.watcher_sets.remove(event_name);
        });
        Ok(())
    }

    /// Closes the bus. The first close drops the watch source, which ends
    /// the dispatch loop through channel closure; later closes error.
    pub(crate) fn close(&self) -> Result<(), EventBusError> {
        if self.is_closed.swap(true, Ordering::SeqCst) {
            return Err(EventBusError::Closed);
        }
        self.source.lock().take();
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::SeqCst)
    }

    /// Number of live watchers subscribed to `event_name` (for testing)
    #[cfg(test)]
    pub(crate) fn watcher_count(
        &self,
        event_name: &str,
    ) -> usize {
        self.watcher_sets
            .get(event_name)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Number of event names with live watcher sets (for testing)
    #[cfg(test)]
    pub(crate) fn watched_event_count(&self) -> usize {
        self.watcher_sets.len()
    }
}
