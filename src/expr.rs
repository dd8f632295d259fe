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

#[cfg(test)]
mod tests;

/// A value derived from other observables.
///
/// The function is evaluated immediately, and again in every cycle in which one of the
/// observables it read during its previous evaluation changed.
#[derive_ex(Clone, bound())]
pub struct Expr<T: 'static> {
    node: Arc<NodeRef>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: PartialEq + 'static> Expr<T> {
    /// Evaluates `f` once and records the observables it reads as its sources.
    pub fn try_new(domain: &Domain, f: impl Fn() -> T + 'static) -> Result<Self> {
        let state = domain.state()?;
        let (value, sources) = state.capture(&f);
        let key = state.insert(Rc::new(ExprNode {
            f: Box::new(f),
            value: RefCell::new(value),
        }));
        state.relink(key, sources);
        Ok(Self {
            node: NodeRef::new(domain.clone(), key),
            _phantom: PhantomData,
        })
    }
    pub fn new(domain: &Domain, f: impl Fn() -> T + 'static) -> Self {
        Self::try_new(domain, f).or_fatal()
    }
}

impl_observable_node!(Expr<T>);

impl<T: 'static> Observable for Expr<T> {
    type Value = T;
}

struct ExprNode<T> {
    f: Box<dyn Fn() -> T>,
    value: RefCell<T>,
}

impl<T: PartialEq + 'static> NodeValue for ExprNode<T> {
    fn recompute(&self, key: NodeKey, state: &DomainState) -> bool {
        let (value, sources) = state.capture(&self.f);
        state.relink(key, sources);
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
        short_type_name::<Expr<T>>()
    }
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}
