//! In-process notification fabric over a single filesystem watch source.
//!
//! One OS-level watch covers the whole versions directory; the bus
//! demultiplexes its raw events into per-key watcher sets. Each watcher is a
//! one-shot subscription: firing a set wakes every member exactly once and
//! tears the set down, so subscription state reclaims itself.

mod bus;
mod source;
mod watcher;

pub(crate) use bus::EventBus;
pub(crate) use bus::EventBusOptions;
