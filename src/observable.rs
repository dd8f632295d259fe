use std::{marker::PhantomData, rc::Rc, sync::Arc};

use derive_ex::derive_ex;

use crate::{
    core::{Callback, Domain, NodeId, NodeKey},
    error::OrFatal,
    Error, Result, Subscription,
};

#[cfg(test)]
mod tests;

/// Owning reference to a node.
///
/// When the last reference is dropped, the node is disposed on its domain's thread,
/// whichever thread the drop happens on.
#[doc(hidden)]
pub struct NodeRef {
    domain: Domain,
    key: NodeKey,
}

impl NodeRef {
    pub(crate) fn new(domain: Domain, key: NodeKey) -> Arc<Self> {
        Arc::new(Self { domain, key })
    }
    pub fn domain(&self) -> &Domain {
        &self.domain
    }
    pub fn key(&self) -> NodeKey {
        self.key
    }
}
impl Drop for NodeRef {
    fn drop(&mut self) {
        self.domain.discard(self.key);
    }
}

/// Operations shared by every node handle.
///
/// All methods except [`domain`](Self::domain) and [`id`](Self::id) must be called on
/// the thread the owning domain is bound to. The plain forms panic on misuse,
/// the `try_*` forms return the error.
pub trait ObservableNode {
    #[doc(hidden)]
    fn node(&self) -> &Arc<NodeRef>;

    fn domain(&self) -> &Domain {
        &self.node().domain
    }
    fn id(&self) -> NodeId {
        self.node().key.id()
    }

    /// Calls `f` once per cycle in which the value of this node changed.
    ///
    /// The subscription is weak if the node is in weak-subscription mode,
    /// in which case the returned handle keeps `f` alive.
    fn try_subscribe(&self, f: impl Fn() + 'static) -> Result<Subscription>
    where
        Self: Sized,
    {
        let node = self.node();
        let state = node.domain.state()?;
        let weak = state.with_node(node.key, |node| node.weak_subscriptions)?;
        let f: Rc<dyn Fn()> = Rc::new(f);
        let id = state.subscribe(node.key, Callback::new(&f, weak))?;
        Ok(Subscription::from_node(
            node.domain.clone(),
            id,
            weak.then_some(f),
        ))
    }
    fn subscribe(&self, f: impl Fn() + 'static) -> Subscription
    where
        Self: Sized,
    {
        self.try_subscribe(f).or_fatal()
    }

    /// Subscribes without keeping `f` alive. Once `f` is dropped the subscription is skipped
    /// and removed.
    fn try_subscribe_weak(&self, f: &Rc<dyn Fn()>) -> Result<Subscription> {
        let node = self.node();
        let id = node
            .domain
            .state()?
            .subscribe(node.key, Callback::new(f, true))?;
        Ok(Subscription::from_node(node.domain.clone(), id, None))
    }
    fn subscribe_weak(&self, f: &Rc<dyn Fn()>) -> Subscription {
        self.try_subscribe_weak(f).or_fatal()
    }

    /// Number of registered subscriptions whose callback is still alive.
    fn try_subscription_count(&self) -> Result<usize> {
        let node = self.node();
        node.domain.state()?.subscription_count(node.key)
    }
    fn subscription_count(&self) -> usize {
        self.try_subscription_count().or_fatal()
    }

    /// Returns `true` if the node has been invalidated and not yet recomputed.
    fn try_needs_update(&self) -> Result<bool> {
        let node = self.node();
        node.domain.state()?.with_node(node.key, |node| node.dirty)
    }
    fn needs_update(&self) -> bool {
        self.try_needs_update().or_fatal()
    }

    fn try_tag(&self) -> Result<Option<String>> {
        let node = self.node();
        node.domain
            .state()?
            .with_node(node.key, |node| node.tag.clone())
    }
    fn tag(&self) -> Option<String> {
        self.try_tag().or_fatal()
    }
    fn set_tag(&self, tag: impl Into<String>)
    where
        Self: Sized,
    {
        let node = self.node();
        let state = node.domain.state().or_fatal();
        let tag = tag.into();
        state
            .with_node(node.key, |node| node.tag = Some(tag))
            .or_fatal();
    }

    /// Sets the strength used by [`subscribe`](Self::subscribe) for this node.
    fn set_weak_subscriptions(&self, weak: bool) {
        let node = self.node();
        let state = node.domain.state().or_fatal();
        state
            .with_node(node.key, |node| node.weak_subscriptions = weak)
            .or_fatal();
    }

    /// `Type#ID(tag)`, e.g. `Var<i32>#002A(Person.age)`.
    fn description(&self) -> String {
        let node = self.node();
        let state = node.domain.state().or_fatal();
        state
            .with_node(node.key, |node| node.description())
            .unwrap_or_else(|_| format!("#{}(disposed)", node.key.id()))
    }

    /// Removes the node from the graph. Later reads and writes fail with [`Error::Disposed`].
    ///
    /// Calling it more than once has no effect. Called from another thread,
    /// disposal happens asynchronously on the domain's thread.
    fn dispose(&self) {
        let node = self.node();
        match node.domain.state() {
            Ok(state) => state.dispose(node.key),
            Err(_) => node.domain.discard(node.key),
        }
    }
    fn is_disposed(&self) -> bool {
        let node = self.node();
        match node.domain.state() {
            Ok(state) => !state.is_alive(node.key),
            Err(Error::Stopped { .. }) => true,
            Err(e) => panic!("{e}"),
        }
    }
}

/// A node holding a single value of type [`Value`](Self::Value).
pub trait Observable: ObservableNode {
    type Value: 'static;

    /// Borrows the current value, recomputing first if needed.
    ///
    /// When called while a derived value is being computed, this node becomes one
    /// of its dependencies. `f` must not read other observables.
    fn try_with<R>(&self, f: impl FnOnce(&Self::Value) -> R) -> Result<R>
    where
        Self: Sized,
    {
        let node = self.node();
        node.domain.state()?.read(node.key, f)
    }
    fn with<R>(&self, f: impl FnOnce(&Self::Value) -> R) -> R
    where
        Self: Sized,
    {
        self.try_with(f).or_fatal()
    }

    fn try_get(&self) -> Result<Self::Value>
    where
        Self: Sized,
        Self::Value: Clone,
    {
        self.try_with(Clone::clone)
    }
    fn get(&self) -> Self::Value
    where
        Self: Sized,
        Self::Value: Clone,
    {
        self.try_get().or_fatal()
    }

    /// Type-erased handle to the same node.
    fn to_obs(&self) -> Obs<Self::Value> {
        Obs::from_node(self.node().clone())
    }
}

/// Read-only handle to any node holding a value of type `T`.
#[derive_ex(Clone, bound())]
pub struct Obs<T: 'static> {
    node: Arc<NodeRef>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: 'static> Obs<T> {
    pub(crate) fn from_node(node: Arc<NodeRef>) -> Self {
        Self {
            node,
            _phantom: PhantomData,
        }
    }
}

macro_rules! impl_observable_node {
    ($name:ident $(<$($param:ident),*>)?) => {
        impl $(<$($param: 'static),*>)? $crate::ObservableNode for $name $(<$($param),*>)? {
            fn node(&self) -> &::std::sync::Arc<$crate::observable::NodeRef> {
                &self.node
            }
        }
        impl $(<$($param: 'static),*>)? ::std::fmt::Debug for $name $(<$($param),*>)? {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.debug_tuple(stringify!($name))
                    .field(&self.node.key().id())
                    .finish()
            }
        }
    };
}
pub(crate) use impl_observable_node;

impl_observable_node!(Obs<T>);

impl<T: 'static> Observable for Obs<T> {
    type Value = T;
}
