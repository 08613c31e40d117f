//! Unbounded FIFO queue bridging push-style producers to pull consumers.
//!
//! The streaming connection and the polling loop push results as they are
//! produced; the driver's `next()` pulls them. Invariant: buffered items and
//! pending takers are never both non-empty.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::oneshot;

#[derive(Debug)]
struct Inner<T> {
    buffered: VecDeque<T>,
    waiters: VecDeque<oneshot::Sender<T>>,
}

/// Producer/consumer primitive. `put` never blocks; `take` suspends until an
/// item is available. Concurrent pending takes resolve strictly in call order.
#[derive(Debug)]
pub struct AsyncQueue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AsyncQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffered: VecDeque::new(),
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Delivers to the oldest pending taker if one exists, else buffers.
    pub fn put(&self, item: T) {
        let mut item = item;
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        // A taker may have been cancelled (its future dropped); skip over any
        // dead senders until the item lands or no waiters remain.
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.send(item) {
                Ok(()) => return,
                Err(returned) => item = returned,
            }
        }
        inner.buffered.push_back(item);
    }

    /// Returns a buffered item immediately (FIFO) or suspends until a future
    /// `put` delivers one.
    pub async fn take(&self) -> T {
        let receiver = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if let Some(item) = inner.buffered.pop_front() {
                return item;
            }
            let (sender, receiver) = oneshot::channel();
            inner.waiters.push_back(sender);
            receiver
        };
        match receiver.await {
            Ok(item) => item,
            // The sender lives in `self`, which we borrow for the whole call.
            Err(_) => unreachable!("queue dropped while take was pending"),
        }
    }

    /// Non-suspending take.
    pub fn try_take(&self) -> Option<T> {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .buffered
            .pop_front()
    }

    /// Drops buffered items only; pending takers stay registered.
    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .buffered
            .clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").buffered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================
