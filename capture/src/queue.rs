//! Frame routing queues.
//!
//! One queue per route (to-disk, to-preview, to-AGC), each with its own
//! mutex and condition variable. The data structure enforces no capacity
//! bound; the frame pool is the bound. A closed queue wakes every waiter,
//! which is how shutdown fans out to the consumers.
//!
//! Stale frame references are always collected under the lock but dropped
//! after it is released, so a release (which takes the pool's free-list
//! mutex) never happens while a queue mutex is held.

use crate::pool::FrameRef;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct QueueInner {
    items: VecDeque<FrameRef>,
    closed: bool,
}

/// Bounded-by-pool FIFO of frame references.
pub struct FrameQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
    name: &'static str,
}

impl FrameQueue {
    /// New open queue; `name` shows up in logs and diagnostics.
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
            name,
        }
    }

    /// Queue name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append a frame and wake one consumer.
    ///
    /// A frame pushed after close is released immediately; the consumer is
    /// gone and nothing will drain it.
    pub fn push(&self, frame: FrameRef) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            drop(inner);
            drop(frame);
            return;
        }
        inner.items.push_back(frame);
        drop(inner);
        self.cv.notify_one();
    }

    /// Append only when the queue is currently empty (preview policy).
    ///
    /// Returns the frame back when the queue is occupied or closed so the
    /// caller's reference is released rather than silently retained.
    pub fn push_if_empty(&self, frame: FrameRef) -> Result<(), FrameRef> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed || !inner.items.is_empty() {
            return Err(frame);
        }
        inner.items.push_back(frame);
        drop(inner);
        self.cv.notify_one();
        Ok(())
    }

    /// Pop the oldest frame, blocking while the queue is empty and open.
    ///
    /// Returns `None` only when the queue is closed *and* drained, so a
    /// lossless consumer processes its whole backlog before exiting.
    pub fn pop_blocking(&self) -> Option<FrameRef> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(frame) = inner.items.pop_front() {
                return Some(frame);
            }
            if inner.closed {
                return None;
            }
            inner = self.cv.wait(inner).unwrap();
        }
    }

    /// Block for a frame, then release everything except the newest and
    /// return the newest (lossy-latest policy).
    ///
    /// Returns `None` as soon as the queue is closed, discarding any
    /// backlog; lossy consumers have no use for stale frames at shutdown.
    pub fn pop_latest_blocking(&self) -> Option<FrameRef> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.closed {
                let stale: Vec<FrameRef> = inner.items.drain(..).collect();
                drop(inner);
                drop(stale);
                return None;
            }
            if !inner.items.is_empty() {
                let newest = inner.items.pop_back();
                let stale: Vec<FrameRef> = inner.items.drain(..).collect();
                drop(inner);
                drop(stale);
                return newest;
            }
            inner = self.cv.wait(inner).unwrap();
        }
    }

    /// Close the queue and wake every waiter.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.cv.notify_all();
    }

    /// Release every queued frame.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        let stale: Vec<FrameRef> = inner.items.drain(..).collect();
        drop(inner);
        drop(stale);
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().items.is_empty()
    }
}
