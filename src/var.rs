use std::{
    any::Any,
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
    Observable, Result,
};


/// A mutable leaf of the graph.
///
/// Writes are buffered until the next cycle (or the next read), then compared with the
/// current value. Dependents and subscribers are only notified if the value differs.
#[derive_ex(Clone, bound())]
pub struct Var<T: 'static> {
    node: Arc<NodeRef>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: PartialEq + 'static> Var<T> {
    /// Creates a variable in `domain` holding `value`.
    pub fn try_new(domain: &Domain, value: T) -> Result<Self> {
        let state = domain.state()?;
        let key = state.insert(Rc::new(VarNode {
            value: RefCell::new(value),
            pending: RefCell::new(None),
        }));
        Ok(Self {
            node: NodeRef::new(domain.clone(), key),
            _phantom: PhantomData,
        })
    }
    pub fn new(domain: &Domain, value: T) -> Self {
        Self::try_new(domain, value).or_fatal()
    }

    /// Buffers `value` as the next value.
    ///
    /// The comparison with the current value happens at the next cycle or read, so
    /// setting a value and setting it back within one cycle notifies nobody.
    pub fn try_set(&self, value: T) -> Result<()> {
        let state = self.node.domain().state()?;
        let key = self.node.key();
        let node = state.node_value::<VarNode<T>>(key)?;
        if node.write(value) {
            state.mark_dirty(key);
        }
        Ok(())
    }
    pub fn set(&self, value: T) {
        self.try_set(value).or_fatal()
    }

    /// Writes the result of `f` applied to the current value.
    pub fn try_update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let value = self.try_with(f)?;
        self.try_set(value)
    }
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        self.try_update(f).or_fatal()
    }
}

impl_observable_node!(Var<T>);

impl<T: 'static> Observable for Var<T> {
    type Value = T;
}

pub(crate) struct VarNode<T> {
    value: RefCell<T>,
    pending: RefCell<Option<T>>,
}

impl<T: PartialEq> VarNode<T> {
    /// Stores `value` for the next recompute. Returns `true` if it differs from the value
    /// that would otherwise be delivered next.
    fn write(&self, value: T) -> bool {
        let mut pending = self.pending.borrow_mut();
        let differs = match &*pending {
            Some(next) => *next != value,
            None => *self.value.borrow() != value,
        };
        let old = pending.replace(value);
        drop(pending);
        drop(old);
        differs
    }
}

impl<T: PartialEq + 'static> NodeValue for VarNode<T> {
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
    fn type_name(&self) -> String {
        short_type_name::<Var<T>>()
    }
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}
