//! Main-thread dispatch primitives.
//!
//! `MessageQueue` is the deferred-call queue drained once per frame
//! (after input, before draw). Worker threads push into it; only the main
//! thread flushes it. `EventSinks` is the typed observer list each
//! subsystem owns for its notifications.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// A deferred call.
pub type Callable = Box<dyn FnOnce() + Send>;

/// Thread-safe FIFO of deferred calls.
#[derive(Default)]
pub struct MessageQueue {
    queue: Mutex<VecDeque<Callable>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, VecDeque<Callable>> {
        // A panicking callable never runs under this lock, so the queue is
        // still consistent after poisoning.
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a call to run at the next `flush`.
    pub fn push<F>(&self, call: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.locked().push_back(Box::new(call));
    }

    /// Run every queued call in FIFO order, including calls pushed while
    /// flushing. Calls run outside the queue lock.
    ///
    /// Returns the number of calls executed.
    pub fn flush(&self) -> usize {
        let mut executed = 0;
        loop {
            let batch = std::mem::take(&mut *self.locked());
            if batch.is_empty() {
                return executed;
            }
            for call in batch {
                call();
                executed += 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.locked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }
}

/// Identifier returned by `EventSinks::subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Typed observer list.
pub struct EventSinks<E> {
    next_id: u64,
    sinks: Vec<(SinkId, Box<dyn FnMut(&E) + Send>)>,
}

impl<E> EventSinks<E> {
    pub fn new() -> Self {
        Self { next_id: 0, sinks: Vec::new() }
    }

    pub fn subscribe<F>(&mut self, sink: F) -> SinkId
    where
        F: FnMut(&E) + Send + 'static,
    {
        let id = SinkId(self.next_id);
        self.next_id += 1;
        self.sinks.push((id, Box::new(sink)));
        id
    }

    /// Returns false if the sink was not registered.
    pub fn unsubscribe(&mut self, id: SinkId) -> bool {
        let before = self.sinks.len();
        self.sinks.retain(|(sink_id, _)| *sink_id != id);
        self.sinks.len() != before
    }

    /// Deliver `event` to every sink in subscription order.
    pub fn emit(&mut self, event: &E) {
        for (_, sink) in &mut self.sinks {
            sink(event);
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl<E> Default for EventSinks<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
