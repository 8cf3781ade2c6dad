//! Timestamp carry-over across pipeline delay.
//!
//! Devices do not return timestamps with their output, so the adapter
//! records each input's timestamps when the input is submitted and
//! attaches them to outputs in submission order.

use std::collections::VecDeque;

use xma_codec::CodecError;

/// Timestamps of one input unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub pts: Option<i64>,
    pub dts: Option<i64>,
}

impl Timestamps {
    #[must_use]
    pub fn new(pts: Option<i64>, dts: Option<i64>) -> Self {
        Self { pts, dts }
    }
}

/// FIFO of timestamps for units in flight.
///
/// With a known pipeline depth this is a fixed ring indexed by the
/// submission count; without one it is an unbounded queue.
#[derive(Debug)]
pub struct TimestampRing {
    store: Store,
    pushed: u64,
    popped: u64,
}

#[derive(Debug)]
enum Store {
    Bounded(Vec<Option<Timestamps>>),
    Unbounded(VecDeque<Timestamps>),
}

impl TimestampRing {
    /// Create a ring for `depth` units in flight, or an unbounded queue.
    #[must_use]
    pub fn new(depth: Option<usize>) -> Self {
        let store = match depth {
            Some(depth) => Store::Bounded(vec![None; depth.max(1)]),
            None => Store::Unbounded(VecDeque::new()),
        };
        Self {
            store,
            pushed: 0,
            popped: 0,
        }
    }

    /// Slots available, `None` when unbounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        match &self.store {
            Store::Bounded(slots) => Some(slots.len()),
            Store::Unbounded(_) => None,
        }
    }

    /// Entries recorded and not yet taken.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.pushed - self.popped) as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pushed == self.popped
    }

    /// Returns true if another push would overwrite a live entry.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.capacity().is_some_and(|cap| self.len() >= cap)
    }

    /// Record timestamps for the next submitted unit.
    pub fn push(&mut self, ts: Timestamps) -> Result<(), CodecError> {
        match &mut self.store {
            Store::Bounded(slots) => {
                let depth = slots.len();
                let slot = &mut slots[(self.pushed % depth as u64) as usize];
                if slot.is_some() {
                    return Err(CodecError::invalid_call(format!(
                        "more than {depth} units in flight"
                    )));
                }
                *slot = Some(ts);
            }
            Store::Unbounded(queue) => queue.push_back(ts),
        }
        self.pushed += 1;
        Ok(())
    }

    /// Take the timestamps of the oldest unit in flight.
    pub fn pop(&mut self) -> Option<Timestamps> {
        let ts = match &mut self.store {
            Store::Bounded(slots) => {
                let depth = slots.len() as u64;
                slots[(self.popped % depth) as usize].take()
            }
            Store::Unbounded(queue) => queue.pop_front(),
        }?;
        self.popped += 1;
        Some(ts)
    }
}
