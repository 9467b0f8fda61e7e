//! Bounded FIFO of batches shared by the poller and the drainer
//!
//! All access goes through one mutex; two condition variables wake a
//! blocked pusher when space frees up and a blocked popper when a batch
//! arrives.
//!
//! # Full-queue policy
//!
//! [`PacketQueue::push`] blocks for at most the given timeout. If the
//! queue is still full when it expires the batch is handed back in
//! [`PushError::Full`] and counted in [`QueueStats::dropped`].
//!
//! # Closing
//!
//! [`PacketQueue::close`] is called once at shutdown, before the final
//! [`drain_all`](PacketQueue::drain_all). Every later push (including one
//! already blocked on a full queue) fails with [`PushError::Closed`] and is
//! counted as dropped, so nothing can arrive after the final drain. Popping
//! and draining keep working.
//!
//! Those two rejections are the only ways a batch can leave the queue
//! without being popped or drained.

use crate::types::Batch;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Counters describing queue traffic since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Batches accepted by `push`
    pub pushed: u64,
    /// Batches removed by `pop_timeout`/`try_pop`
    pub popped: u64,
    /// Batches removed by `drain_all`
    pub drained: u64,
    /// Batches rejected because the queue stayed full or was closed
    pub dropped: u64,
    /// Largest number of batches held at once
    pub high_water: usize,
}

/// Reason a push did not enqueue its batch
#[derive(Debug, PartialEq, Eq)]
pub enum PushError {
    /// The queue stayed full for the whole timeout; the batch is returned
    Full(Batch),
    /// The queue was closed; the batch is returned
    Closed(Batch),
}

impl PushError {
    /// Recover the rejected batch
    pub fn into_batch(self) -> Batch {
        match self {
            PushError::Full(batch) | PushError::Closed(batch) => batch,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<Batch>,
    stats: QueueStats,
    closed: bool,
}

/// Fixed-capacity, thread-safe FIFO of [`Batch`]es
#[derive(Debug)]
pub struct PacketQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl PacketQueue {
    /// Create a queue holding at most `capacity` batches (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::with_capacity(capacity),
                stats: QueueStats::default(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    // Queue state is plain data, so a panic elsewhere cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a batch, waiting up to `timeout` for space
    pub fn push(&self, batch: Batch, timeout: Duration) -> Result<(), PushError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        loop {
            if state.closed {
                state.stats.dropped += 1;
                return Err(PushError::Closed(batch));
            }
            if state.entries.len() < self.capacity {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                state.stats.dropped += 1;
                return Err(PushError::Full(batch));
            }
            state = self
                .not_full
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }

        state.entries.push_back(batch);
        state.stats.pushed += 1;
        state.stats.high_water = state.stats.high_water.max(state.entries.len());
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Append a batch only if there is space right now
    pub fn try_push(&self, batch: Batch) -> Result<(), PushError> {
        self.push(batch, Duration::ZERO)
    }

    /// Remove the oldest batch, waiting up to `timeout` for one to arrive
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Batch> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        loop {
            if let Some(batch) = state.entries.pop_front() {
                state.stats.popped += 1;
                drop(state);
                self.not_full.notify_one();
                return Some(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    /// Remove the oldest batch without waiting
    pub fn try_pop(&self) -> Option<Batch> {
        self.pop_timeout(Duration::ZERO)
    }

    /// Refuse every further push and wake blocked pushers
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_full.notify_all();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Atomically remove every queued batch, oldest first
    pub fn drain_all(&self) -> Vec<Batch> {
        let mut state = self.lock();
        let drained: Vec<Batch> = state.entries.drain(..).collect();
        state.stats.drained += drained.len() as u64;
        drop(state);

        if !drained.is_empty() {
            self.not_full.notify_all();
        }
        drained
    }

    /// Number of batches currently queued
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the queue holds no batches
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Maximum number of batches
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the traffic counters
    pub fn stats(&self) -> QueueStats {
        self.lock().stats
    }
}
