use std::{cell::RefCell, rc::Rc};

use derive_ex::Ex;
use slabmap::SlabMap;

use crate::Subscription;

/// Registry of plain listeners, used by collections and property notifiers.
#[derive(Ex)]
#[derive_ex(Clone, Default)]
#[default(Self::new())]
pub(crate) struct Listeners<F: ?Sized + 'static>(Rc<RefCell<SlabMap<Rc<F>>>>);

impl<F: ?Sized + 'static> Listeners<F> {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(SlabMap::new())))
    }

    pub fn insert(&self, f: Rc<F>) -> Subscription {
        let key = self.0.borrow_mut().insert(f);
        let listeners = Rc::downgrade(&self.0);
        Subscription::from_fn(move || {
            if let Some(listeners) = listeners.upgrade() {
                let removed = listeners.borrow_mut().remove(key);
                drop(removed);
            }
        })
    }

    /// Listeners registered at the time of the call. Listeners added while the
    /// snapshot is being invoked are not part of it.
    pub fn snapshot(&self) -> Vec<Rc<F>> {
        self.0.borrow().values().cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
}
