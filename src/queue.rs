//! Bounded per-guild queue of pending utterances.
//!
//! Producers never wait: when the queue is full the incoming item is dropped
//! and everything already waiting stays. Exactly one consumer may hold the
//! receiving end at a time.

use crate::{constants::QUEUE_CAPACITY, text::Utterance};
use std::sync::Arc;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex, OwnedMutexGuard,
};
use tokio_util::sync::CancellationToken;

pub type SpeechQueue = BoundedQueue<Utterance>;

pub struct BoundedQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueue without waiting. Returns `false` if the item was dropped.
    pub fn try_enqueue(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Speech queue full, dropping incoming item");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Claim the receiving end. `None` while another consumer holds it.
    pub fn consumer(&self) -> Option<QueueConsumer<T>> {
        self.rx
            .clone()
            .try_lock_owned()
            .ok()
            .map(|rx| QueueConsumer { rx })
    }
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::new(QUEUE_CAPACITY)
    }
}

/// Exclusive receiving end of a [`BoundedQueue`]. Dropping it hands the
/// queue, with whatever is still in it, back for the next consumer.
pub struct QueueConsumer<T> {
    rx: OwnedMutexGuard<mpsc::Receiver<T>>,
}

impl<T> QueueConsumer<T> {
    /// Wait for the next item or cancellation, whichever comes first.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}
