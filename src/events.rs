//! Change Notification
//!
//! Services keep their state privately and publish snapshots plus change
//! events. Listeners are plain callbacks, so any UI framework can bridge them.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<E> = Rc<dyn Fn(&E)>;

pub struct Listeners<E> {
    next_id: Cell<u64>,
    slots: RefCell<Vec<(ListenerId, Callback<E>)>>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            next_id: Cell::new(0),
            slots: RefCell::new(Vec::new()),
        }
    }
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl Fn(&E) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.slots.borrow_mut().push((id, Rc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.slots.borrow_mut().retain(|(slot, _)| *slot != id);
    }

    pub fn emit(&self, event: &E) {
        // Copy out first: a callback may subscribe or unsubscribe
        let callbacks: Vec<Callback<E>> = self.slots.borrow().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    Connecting,
    Connected(String),
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CampaignEvent {
    /// The whole campaign set was reloaded
    Replaced,
    Upserted(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DonationEvent {
    Loaded(u64),
    Cleared,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_subscribers() {
        let listeners = Listeners::<u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let id = listeners.subscribe(move |v| sink.borrow_mut().push(*v));

        listeners.emit(&1);
        listeners.unsubscribe(id);
        listeners.emit(&2);

        assert_eq!(*seen.borrow(), vec![1]);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_callback_may_subscribe_during_emit() {
        let listeners = Rc::new(Listeners::<u32>::new());
        let inner = listeners.clone();
        listeners.subscribe(move |_| {
            inner.subscribe(|_| {});
        });
        listeners.emit(&0);
        assert_eq!(listeners.len(), 2);
    }
}
