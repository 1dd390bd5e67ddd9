//! Bounded single-consumer queue with drop-oldest overflow.
//!
//! The fan-out loop pushes into one of these per subscriber and never waits:
//! when the consumer falls behind the oldest queued item is discarded. The
//! consumer is the connection's socket writer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// What happened to a pushed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after discarding the oldest item
    DroppedOldest,
    /// The receiving side is gone; the item was discarded
    Closed,
}

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

#[derive(Debug)]
struct Shared<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            state.closed = true;
            state.items.clear();
            drop(state);
            self.notify.notify_one();
        }
    }
}

/// Producer half, cloneable
#[derive(Debug)]
pub struct SinkSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for SinkSender<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// Consumer half. Dropping it closes the queue.
#[derive(Debug)]
pub struct SinkReceiver<T> {
    shared: Arc<Shared<T>>,
}

/// Create a queue holding at most `capacity` items (minimum 1)
pub fn channel<T>(capacity: usize) -> (SinkSender<T>, SinkReceiver<T>) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            items: VecDeque::with_capacity(capacity),
            closed: false,
        }),
        notify: Notify::new(),
        capacity,
        dropped: AtomicU64::new(0),
    });
    (
        SinkSender {
            shared: shared.clone(),
        },
        SinkReceiver { shared },
    )
}

impl<T> SinkSender<T> {
    /// Enqueue without waiting
    pub fn push(&self, item: T) -> PushOutcome {
        let mut state = self.shared.lock();
        if state.closed {
            return PushOutcome::Closed;
        }

        let outcome = if state.items.len() >= self.shared.capacity {
            state.items.pop_front();
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            PushOutcome::DroppedOldest
        } else {
            PushOutcome::Queued
        };
        state.items.push_back(item);
        drop(state);

        self.shared.notify.notify_one();
        outcome
    }

    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Items discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> SinkReceiver<T> {
    /// Wait for the next item. `None` once the queue is closed.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            {
                let mut state = self.shared.lock();
                if state.closed {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
            }
            // notify_one stores a permit, so a push between the check and
            // this await is not lost
            self.shared.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.shared.close();
    }
}

impl<T> Drop for SinkReceiver<T> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_delivers_in_order() {
        let (tx, mut rx) = channel(4);
        assert_eq!(tx.push(1), PushOutcome::Queued);
        assert_eq!(tx.push(2), PushOutcome::Queued);
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let (tx, mut rx) = channel(2);
        tx.push("a");
        tx.push("b");
        assert_eq!(tx.push("c"), PushOutcome::DroppedOldest);
        assert_eq!(tx.dropped(), 1);
        assert_eq!(tx.len(), 2);
        assert_eq!(rx.recv().await, Some("b"));
        assert_eq!(rx.recv().await, Some("c"));
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let (tx, mut rx) = channel(2);
        let waiter = tokio::spawn(async move { rx.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.push(42u32);
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(42));
    }

    #[tokio::test]
    async fn test_close_wakes_receiver_and_rejects_pushes() {
        let (tx, mut rx) = channel::<u8>(2);
        let sender = tx.clone();
        let waiter = tokio::spawn(async move { rx.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        sender.close();

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, None);
        assert!(tx.is_closed());
        assert_eq!(tx.push(1), PushOutcome::Closed);
    }

    #[test]
    fn test_dropping_receiver_closes() {
        let (tx, rx) = channel::<u8>(1);
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.push(7), PushOutcome::Closed);
    }
}
