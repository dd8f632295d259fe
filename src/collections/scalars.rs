use std::{
    any::{Any, TypeId},
    cell::{Ref, RefCell},
    marker::PhantomData,
    rc::Rc,
    sync::Arc,
};

use derive_ex::derive_ex;

use crate::{
    core::{Domain, DomainState, NodeKey, NodeValue},
    error::OrFatal,
    observable::{impl_observable_node, NodeRef},
    utils::short_type_name,
    Observable, Result, Subscription,
};

use super::{ListEvent, ObservableList};

#[cfg(test)]
mod tests;

/// Number of items of an [`ObservableList`].
///
/// All `Count`s of one list created in the same domain share a node while any of them is alive.
#[derive(Clone)]
pub struct Count {
    node: Arc<NodeRef>,
}

impl Count {
    /// Observes the length of `source` from `domain`.
    pub fn try_new<T: 'static>(domain: &Domain, source: &impl ObservableList<T>) -> Result<Self> {
        let node = observe_list::<T, usize, Self>(domain, source, |items| items.len())?;
        Ok(Self { node })
    }
    pub fn new<T: 'static>(domain: &Domain, source: &impl ObservableList<T>) -> Self {
        Self::try_new(domain, source).or_fatal()
    }
}

impl_observable_node!(Count);

impl Observable for Count {
    type Value = usize;
}

/// First item of an [`ObservableList`], or `None` if it is empty.
///
/// Shared per list and domain, like [`Count`].
#[derive_ex(Clone, bound())]
pub struct First<T: 'static> {
    node: Arc<NodeRef>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Clone + PartialEq + 'static> First<T> {
    pub fn try_new(domain: &Domain, source: &impl ObservableList<T>) -> Result<Self> {
        let node = observe_list::<T, Option<T>, Self>(domain, source, |items| {
            items.first().cloned()
        })?;
        Ok(Self {
            node,
            _phantom: PhantomData,
        })
    }
    pub fn new(domain: &Domain, source: &impl ObservableList<T>) -> Self {
        Self::try_new(domain, source).or_fatal()
    }
}

impl_observable_node!(First<T>);

impl<T: 'static> Observable for First<T> {
    type Value = Option<T>;
}

fn observe_list<T: 'static, V: PartialEq + 'static, H: 'static>(
    domain: &Domain,
    source: &impl ObservableList<T>,
    compute: impl Fn(&[T]) -> V + 'static,
) -> Result<Arc<NodeRef>> {
    source
        .shared_nodes()
        .get_or_try_insert(domain, TypeId::of::<H>(), || {
            create_list_node::<T, V, H>(domain, source, compute)
        })
}

fn create_list_node<T: 'static, V: PartialEq + 'static, H: 'static>(
    domain: &Domain,
    source: &impl ObservableList<T>,
    compute: impl Fn(&[T]) -> V + 'static,
) -> Result<Arc<NodeRef>> {
    let state = domain.state()?;
    let node = Rc::new(ListScalarNode::<V, H> {
        value: RefCell::new(source.with_items(&compute)),
        pending: RefCell::new(None),
        subscription: RefCell::new(None),
        _phantom: PhantomData,
    });
    let key = state.insert(node.clone());
    let this = Rc::downgrade(&node);
    let owner = domain.clone();
    let subscription = source.listen(move |e: &ListEvent<T>| {
        if let Some(this) = this.upgrade() {
            if this.offer(compute(e.items)) {
                owner.state().or_fatal().mark_dirty(key);
            }
        }
    });
    *node.subscription.borrow_mut() = Some(subscription);
    Ok(NodeRef::new(domain.clone(), key))
}

struct ListScalarNode<V, H> {
    value: RefCell<V>,
    pending: RefCell<Option<V>>,
    subscription: RefCell<Option<Subscription>>,
    _phantom: PhantomData<fn() -> H>,
}

impl<V: PartialEq, H> ListScalarNode<V, H> {
    /// Stores `candidate` for the next recompute if it differs from the value that would
    /// otherwise be delivered next.
    fn offer(&self, candidate: V) -> bool {
        let mut pending = self.pending.borrow_mut();
        let differs = match &*pending {
            Some(next) => *next != candidate,
            None => *self.value.borrow() != candidate,
        };
        if differs {
            let old = pending.replace(candidate);
            drop(pending);
            drop(old);
        }
        differs
    }
}

impl<V: PartialEq + 'static, H: 'static> NodeValue for ListScalarNode<V, H> {
    fn recompute(&self, _key: NodeKey, _state: &DomainState) -> bool {
        let pending = self.pending.borrow_mut().take();
        let Some(value) = pending else {
            return false;
        };
        if *self.value.borrow() == value {
            return false;
        }
        let old = self.value.replace(value);
        drop(old);
        true
    }
    fn current(&self) -> Option<Ref<'_, dyn Any>> {
        Some(Ref::map(self.value.borrow(), |value| value as &dyn Any))
    }
    fn dispose(&self, _state: &DomainState) {
        let subscription = self.subscription.borrow_mut().take();
        drop(subscription);
    }
    fn type_name(&self) -> String {
        short_type_name::<H>()
    }
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}
