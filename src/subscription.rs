use std::{
    cell::RefCell,
    mem::take,
    rc::{Rc, Weak},
};

use crate::{
    core::{Callback, Domain, SubscriptionId},
    error::OrFatal,
    Error, Result,
};

thread_local! {
    static CAPTURES: RefCell<Vec<Weak<RefCell<Vec<Subscription>>>>> = const { RefCell::new(Vec::new()) };
}


/// Disposable handle returned by `subscribe` and `listen`. Dropping it unsubscribes.
#[derive(Default)]
#[must_use]
pub struct Subscription(RawSubscription);

impl Subscription {
    /// A subscription that releases nothing.
    pub fn empty() -> Self {
        Subscription(RawSubscription::Empty)
    }
    /// Calls `f` when released.
    pub fn from_fn(f: impl FnOnce() + 'static) -> Self {
        Subscription(RawSubscription::Fn(Box::new(f)))
    }
    pub(crate) fn from_node(
        domain: Domain,
        id: SubscriptionId,
        callback: Option<Rc<dyn Fn()>>,
    ) -> Self {
        Subscription(RawSubscription::Node {
            domain,
            id,
            callback,
        })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.0, RawSubscription::Empty)
    }

    /// Moves this subscription into `bag`.
    pub fn add_to(self, bag: &Subscriptions) {
        bag.add(self);
    }

    /// Moves this subscription into the bag running the innermost
    /// [`Subscriptions::capture`] on this thread.
    ///
    /// Without an active capture the subscription is released and an error is returned.
    pub fn try_add_to_capture(self) -> Result<()> {
        let bag = CAPTURES.with(|captures| captures.borrow().last().and_then(Weak::upgrade));
        match bag {
            Some(bag) => {
                bag.borrow_mut().push(self);
                Ok(())
            }
            None => Err(Error::NoCapture),
        }
    }
    pub fn add_to_capture(self) {
        self.try_add_to_capture().or_fatal()
    }

    /// Drops the handle but leaves the subscription registered.
    ///
    /// A weak-mode node subscription is converted into a strong one, since the handle
    /// was what kept its callback alive.
    pub fn detach(mut self) {
        if let RawSubscription::Node {
            domain,
            id,
            callback: Some(callback),
        } = take(&mut self.0)
        {
            if let Ok(state) = domain.state() {
                let _ = state.with_node(id.node, |node| {
                    if let Some(subscriber) = node.subscriber_mut(id) {
                        subscriber.callback = Callback::Strong(callback);
                    }
                });
            }
        }
    }
}
impl Drop for Subscription {
    fn drop(&mut self) {
        match take(&mut self.0) {
            RawSubscription::Empty => {}
            RawSubscription::Fn(f) => f(),
            RawSubscription::Node { domain, id, .. } => domain.unsubscribe(id),
        }
    }
}

#[derive(Default)]
enum RawSubscription {
    #[default]
    Empty,
    Fn(Box<dyn FnOnce() + 'static>),
    Node {
        domain: Domain,
        id: SubscriptionId,
        callback: Option<Rc<dyn Fn()>>,
    },
}

/// A bag of subscriptions released together by [`clear`](Self::clear) or on drop.
#[derive(Default)]
pub struct Subscriptions(Rc<RefCell<Vec<Subscription>>>);

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps `subscription` until the bag is cleared or dropped.
    pub fn add(&self, subscription: Subscription) {
        self.0.borrow_mut().push(subscription);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Releases every subscription in the bag. The bag stays usable.
    pub fn clear(&self) {
        let subscriptions = take(&mut *self.0.borrow_mut());
        drop(subscriptions);
    }

    /// Runs `f`. Subscriptions passed to [`Subscription::add_to_capture`] meanwhile land in
    /// this bag.
    pub fn capture<T>(&self, f: impl FnOnce() -> T) -> T {
        CAPTURES.with(|captures| captures.borrow_mut().push(Rc::downgrade(&self.0)));
        let _guard = CaptureGuard;
        f()
    }
}

struct CaptureGuard;

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let _ = CAPTURES.try_with(|captures| captures.borrow_mut().pop());
    }
}
