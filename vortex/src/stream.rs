//! Command stream bookkeeping: completion handles and stream lifecycle.
//!
//! Every asynchronous operation enqueued on a device records one entry here
//! and hands an [EventId] back to the caller. Wait lists are resolved to the
//! native events at enqueue time. `sync` retires all live entries, after
//! which waiting on a retired id is an error, not a no-op.

use std::collections::BTreeMap;

use crate::backend::Event;
use crate::error::VortexError;

/// Opaque completion handle of one enqueued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub(crate) u64);

impl core::fmt::Display for EventId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("e{}", self.0))
    }
}

#[derive(Debug)]
pub(crate) struct StreamEntry {
    pub(crate) event: Event,
    // Runtime owned landing area of an async read, stable address until resolved
    pub(crate) staging: Option<Box<[u8]>>,
}

#[derive(Debug)]
pub(crate) struct StreamState {
    events: BTreeMap<u64, StreamEntry>,
    next: u64,
    closed: bool,
}

impl StreamState {
    pub(crate) const fn new() -> StreamState {
        StreamState { events: BTreeMap::new(), next: 0, closed: false }
    }

    pub(crate) const fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn ensure_open(&self) -> Result<(), VortexError> {
        if self.closed {
            Err(VortexError::EnqueueAfterCleanup)
        } else {
            Ok(())
        }
    }

    /// Resolve wait ids to native events. Ids that were never issued or are
    /// already retired fail, completed-but-live ids resolve and the backend
    /// treats them as already satisfied.
    pub(crate) fn resolve_waits(&self, wait: &[EventId]) -> Result<Vec<Event>, VortexError> {
        let mut events = Vec::with_capacity(wait.len());
        for id in wait {
            match self.events.get(&id.0) {
                Some(entry) => events.push(entry.event.clone()),
                None => return Err(VortexError::UnknownEvent(*id)),
            }
        }
        Ok(events)
    }

    pub(crate) fn record(&mut self, event: Event, staging: Option<Box<[u8]>>) -> EventId {
        let id = self.next;
        self.next += 1;
        self.events.insert(id, StreamEntry { event, staging });
        EventId(id)
    }

    pub(crate) fn take_entry(&mut self, id: EventId) -> Option<StreamEntry> {
        self.events.remove(&id.0)
    }

    /// Remove an entry that must identify an asynchronous read.
    /// Entries of other operations stay live.
    pub(crate) fn take_read_entry(&mut self, id: EventId) -> Result<StreamEntry, VortexError> {
        match self.events.get(&id.0) {
            None => Err(VortexError::UnknownEvent(id)),
            Some(entry) if entry.staging.is_none() => Err(VortexError::UnsupportedOperation(
                "event does not identify an asynchronous read".into(),
            )),
            Some(_) => Ok(self.events.remove(&id.0).unwrap()),
        }
    }

    /// Retire every live entry, returning the native events for release
    pub(crate) fn retire_all(&mut self) -> Vec<Event> {
        let events = std::mem::take(&mut self.events);
        events.into_values().map(|entry| entry.event).collect()
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub(crate) fn live_events(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_and_retired_waits_fail() {
        let mut stream = StreamState::new();
        let e0 = stream.record(Event::Virt(crate::backend::virt::VirtEvent {}), None);
        assert!(stream.resolve_waits(&[e0]).is_ok());
        assert!(matches!(
            stream.resolve_waits(&[EventId(99)]),
            Err(VortexError::UnknownEvent(EventId(99)))
        ));
        stream.retire_all();
        assert!(matches!(
            stream.resolve_waits(&[e0]),
            Err(VortexError::UnknownEvent(_))
        ));
    }

    #[test]
    fn closed_stream_rejects_enqueues() {
        let mut stream = StreamState::new();
        stream.close();
        assert!(matches!(stream.ensure_open(), Err(VortexError::EnqueueAfterCleanup)));
    }
}
