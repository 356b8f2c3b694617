use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard},
    time::Duration,
};

use tracing::info;

use crate::{field::Message, poll::PollWait};

/// Thread-safe FIFO of received messages.
///
/// The I/O driver pushes, the script thread pops. A single lock guards the
/// queue and a condition variable wakes a waiting consumer on arrival. Only
/// one consumer is supported; concurrent consumers would race on ordering.
#[derive(Debug, Default)]
pub struct Inbox {
    queue: Mutex<VecDeque<Message>>,
    arrived: Condvar,
}

impl Inbox {
    /// Create an empty inbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the tail and wake the consumer.
    pub fn push(&self, message: Message) {
        self.lock().push_back(message);
        self.arrived.notify_one();
    }

    /// Remove and return the head, if any. Never blocks on arrival.
    pub fn try_pop(&self) -> Option<Message> {
        let message = self.lock().pop_front()?;
        info!(fields = %message.fields, "recvd");
        Some(message)
    }

    /// Wait for the next message under `wait`.
    ///
    /// Between checks the consumer sleeps on the arrival signal instead of a
    /// plain timer, so a pushed message is picked up immediately. With no
    /// arrival the call returns `None` after `wait.max_wait()`.
    pub fn pop_wait(&self, wait: &PollWait) -> Option<Message> {
        wait.run_with(|| self.try_pop(), |interval| self.wait_for_arrival(interval))
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Block until the queue is non-empty or `interval` elapses.
    fn wait_for_arrival(&self, interval: Duration) {
        let guard = self.lock();
        let _ = self
            .arrived
            .wait_timeout_while(guard, interval, |queue| queue.is_empty());
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        // Poison is ignored: every critical section is a single deque call.
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}
