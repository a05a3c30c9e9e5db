// Publish/await monitor tracking the contiguous prefix of completed write slots.
use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

use tracing::trace;

use crate::core::error::{Error, ErrorKind, closed, poisoned};

/// Outcome of asking whether a read slot may proceed.
#[derive(Debug)]
pub(crate) enum Admission<G> {
    /// The slot is published; the caller keeps its shared guard and reads.
    Ready(G),
    /// The shared guard was released while waiting; reacquire and ask again.
    Retry,
}

#[derive(Debug, Default)]
struct FrontierState {
    published: u64,
    completed: BTreeSet<u64>,
    closed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Frontier {
    state: Mutex<FrontierState>,
    advanced: Condvar,
}

impl Frontier {
    pub(crate) fn new(published: u64) -> Self {
        Self {
            state: Mutex::new(FrontierState {
                published,
                ..FrontierState::default()
            }),
            advanced: Condvar::new(),
        }
    }

    /// Number of records in the contiguous published prefix.
    pub(crate) fn published(&self) -> Result<u64, Error> {
        Ok(self.state.lock().map_err(poisoned)?.published)
    }

    /// Marks `seq` complete and wakes every waiter if the prefix grew.
    ///
    /// Slots completed ahead of a gap are parked until the gap fills, so a
    /// reader is never admitted past a slot whose write is still in flight.
    pub(crate) fn publish(&self, seq: u64) -> Result<(), Error> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if seq < state.published {
            return Ok(());
        }
        if seq > state.published {
            state.completed.insert(seq);
            return Ok(());
        }

        state.published += 1;
        loop {
            let next = state.published;
            if !state.completed.remove(&next) {
                break;
            }
            state.published += 1;
        }
        drop(state);
        self.advanced.notify_all();
        Ok(())
    }

    /// Admits a reader for `seq` while it holds `shared`.
    ///
    /// When `seq` is not yet published the guard is dropped before sleeping so
    /// writers can take exclusive access. The frontier mutex is held from the
    /// check until the wait begins, which rules out a lost wake-up: a writer
    /// cannot publish between the two.
    pub(crate) fn admit<G>(
        &self,
        seq: u64,
        shared: G,
        deadline: Option<Instant>,
    ) -> Result<Admission<G>, Error> {
        let state = self.state.lock().map_err(poisoned)?;
        if state.closed {
            return Err(closed().with_seq(seq));
        }
        if seq < state.published {
            return Ok(Admission::Ready(shared));
        }
        drop(shared);

        trace!(seq, published = state.published, "reader waiting at frontier");
        match deadline {
            None => {
                let _state = self.advanced.wait(state).map_err(poisoned)?;
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::new(ErrorKind::TimedOut)
                        .with_message("record not published before deadline")
                        .with_seq(seq));
                }
                let (_state, _) = self
                    .advanced
                    .wait_timeout(state, deadline - now)
                    .map_err(poisoned)?;
            }
        }
        Ok(Admission::Retry)
    }

    /// Fails all current and future waiters with `Closed`.
    pub(crate) fn close(&self) -> Result<(), Error> {
        self.state.lock().map_err(poisoned)?.closed = true;
        self.advanced.notify_all();
        Ok(())
    }
}
