use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

pub type ListenerId = u64;

/// Fan-out registry of observers.
///
/// Every dispatched item is delivered to every registered subscriber; subscribers
/// filter for what they care about themselves. Delivery is a non-blocking send into
/// an unbounded per-subscriber channel, so dispatch order equals call order and a
/// slow subscriber never stalls the dispatcher.
pub struct ListenerSet<T> {
    next_id: AtomicU64,
    senders: Mutex<BTreeMap<ListenerId, mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> ListenerSet<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            senders: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn register(self: &Arc<Self>) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().insert(id, tx);
        Subscription {
            id,
            rx,
            set: Arc::downgrade(self),
        }
    }

    /// Returns `false` when `id` was not registered (already removed or dropped).
    pub fn remove(&self, id: ListenerId) -> bool {
        self.senders.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.senders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `item` to every live subscriber and return how many received it.
    pub fn dispatch(&self, item: &T) -> usize {
        let mut senders = self.senders.lock();
        let mut delivered = 0;
        senders.retain(|_, tx| {
            let alive = tx.send(item.clone()).is_ok();
            delivered += usize::from(alive);
            alive
        });
        delivered
    }
}

/// Receiving half of a [`ListenerSet`] registration. Dropping it unregisters.
pub struct Subscription<T> {
    id: ListenerId,
    rx: mpsc::UnboundedReceiver<T>,
    set: Weak<ListenerSet<T>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Next item, or `None` once the subscription was removed or the set closed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.senders.lock().remove(&self.id);
        }
    }
}
