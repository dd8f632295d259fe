#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc};

use concise::*;

/// Binds a fresh domain to the test thread.
pub fn bind(name: &str) -> (Domain, DomainRunner) {
    let domain = Domain::new(name);
    let runner = domain.bind_current_thread().unwrap();
    (domain, runner)
}

/// Values of an observable seen by a subscriber, one per cycle in which it changed.
pub struct Recorder<T> {
    values: Rc<RefCell<Vec<T>>>,
    _subscription: Subscription,
}

pub fn record<O>(o: &O) -> Recorder<O::Value>
where
    O: Observable + Clone + 'static,
    O::Value: Clone,
{
    let values = Rc::new(RefCell::new(Vec::new()));
    let subscription = o.subscribe({
        let values = values.clone();
        let o = o.clone();
        move || values.borrow_mut().push(o.get())
    });
    Recorder {
        values,
        _subscription: subscription,
    }
}

impl<T: Clone> Recorder<T> {
    pub fn take(&self) -> Vec<T> {
        self.values.take()
    }
}
