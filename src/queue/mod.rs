//! Work queue shared between the page enumerator and the worker pool.
//!
//! The queue is an unbounded FIFO of [`QueueItem`]s. The enumerator is the only
//! producer of page references and pushes exactly one [`QueueItem::Terminate`]
//! once pagination ends. Workers requeue the marker before exiting so that every
//! concurrently running worker observes it; no count of live workers is needed.
//!
//! # Example
//!
//! ```
//! use harvest_core::queue::{PageRef, QueueItem, WorkQueue};
//!
//! # async fn example() {
//! let queue = WorkQueue::new();
//! queue.push(QueueItem::Page(PageRef::new("https://m.example.com/photo.php?fbid=1")));
//! queue.push(QueueItem::Terminate);
//!
//! while let QueueItem::Page(page) = queue.pop().await {
//!     println!("processing {page}");
//! }
//! # }
//! ```

mod item;

pub use item::{PageRef, QueueItem};

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;
use tracing::trace;

/// Concurrent-safe unbounded FIFO with a blocking `pop`.
///
/// `pop` is the only suspension point a worker has while idle. A push wakes at
/// most one waiter; a push that happens with no waiter leaves a permit behind,
/// so a worker that checks the queue and then waits never misses it.
#[derive(Debug, Default)]
pub struct WorkQueue {
    items: Mutex<VecDeque<QueueItem>>,
    available: Notify,
}

impl WorkQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an item and wakes one waiting consumer.
    pub fn push(&self, item: QueueItem) {
        {
            let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
            items.push_back(item);
            trace!(len = items.len(), "queue push");
        }
        self.available.notify_one();
    }

    /// Removes the oldest item, waiting until one is available.
    pub async fn pop(&self) -> QueueItem {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.available.notified().await;
        }
    }

    /// Removes the oldest item without waiting.
    #[must_use]
    pub fn try_pop(&self) -> Option<QueueItem> {
        let item = self
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        // Pass the wakeup along if more work is waiting behind this item.
        if item.is_some() && !self.is_empty() {
            self.available.notify_one();
        }
        item
    }

    /// Returns the number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
