use std::{
    any::Any,
    cell::{Ref, RefCell},
    marker::PhantomData,
    rc::Rc,
    sync::Arc,
};

use derive_ex::derive_ex;
use tracing::debug;

use crate::{
    core::{Callback, Domain, DomainState, NodeKey, NodeValue, SubscriptionId},
    error::OrFatal,
    observable::{impl_observable_node, NodeRef},
    utils::short_type_name,
    Observable, Result,
};


/// A value in one domain mirroring a value computed in another.
///
/// The source is created, watched and torn down on the target domain's thread. Every
/// change of the source is copied into a task on the proxy's domain, so neither domain
/// touches the other's nodes.
#[derive_ex(Clone, bound())]
pub struct Proxy<T: 'static> {
    node: Arc<NodeRef>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Clone + PartialEq + Send + 'static> Proxy<T> {
    /// Creates a proxy in `domain` holding `initial` until the value produced by `create`
    /// on `target` arrives.
    pub fn try_from_domain<O>(
        domain: &Domain,
        target: &Domain,
        create: impl FnOnce() -> O + Send + 'static,
        initial: T,
    ) -> Result<Self>
    where
        O: Observable<Value = T> + Send + 'static,
    {
        let state = domain.state()?;
        let key = state.insert(Rc::new(ProxyNode {
            value: RefCell::new(initial),
            pending: RefCell::new(None),
            link: RefCell::new(None),
        }));
        let owner = domain.clone();
        let source_domain = target.clone();
        target.enqueue(move || {
            if let Err(e) = connect::<T, O, _>(&source_domain, &owner, key, create) {
                debug!(domain = source_domain.name(), "proxy source not connected: {e}");
            }
        });
        Ok(Self {
            node: NodeRef::new(domain.clone(), key),
            _phantom: PhantomData,
        })
    }
    pub fn from_domain<O>(
        domain: &Domain,
        target: &Domain,
        create: impl FnOnce() -> O + Send + 'static,
        initial: T,
    ) -> Self
    where
        O: Observable<Value = T> + Send + 'static,
    {
        Self::try_from_domain(domain, target, create, initial).or_fatal()
    }
}

impl_observable_node!(Proxy<T>);

impl<T: 'static> Observable for Proxy<T> {
    type Value = T;
}

/// Runs on the target domain: creates the source, forwards its current value and keeps
/// forwarding on every change.
fn connect<T, O, F>(target: &Domain, owner: &Domain, proxy: NodeKey, create: F) -> Result<()>
where
    T: Clone + PartialEq + Send + 'static,
    O: Observable<Value = T> + Send + 'static,
    F: FnOnce() -> O,
{
    let handle = create();
    let source = handle.node().key();
    let state = target.state()?;
    let forward: Rc<dyn Fn()> = Rc::new({
        let target = target.clone();
        let owner = owner.clone();
        move || forward::<T>(&target, source, &owner, proxy)
    });
    forward();
    let subscription = state.subscribe(source, Callback::new(&forward, false))?;
    let link = TargetLink {
        target: target.clone(),
        subscription,
        _source: Box::new(handle),
    };
    let owner_domain = owner.clone();
    owner.enqueue(move || attach::<T>(&owner_domain, proxy, link));
    Ok(())
}

fn forward<T: Clone + PartialEq + Send + 'static>(
    target: &Domain,
    source: NodeKey,
    owner: &Domain,
    proxy: NodeKey,
) {
    let Ok(state) = target.state() else {
        return;
    };
    let Ok(value) = state.read::<T, _>(source, T::clone) else {
        return;
    };
    let owner_domain = owner.clone();
    owner.enqueue(move || receive(&owner_domain, proxy, value));
}

fn receive<T: PartialEq + 'static>(owner: &Domain, proxy: NodeKey, value: T) {
    let Ok(state) = owner.state() else {
        return;
    };
    let Ok(node) = state.node_value::<ProxyNode<T>>(proxy) else {
        return;
    };
    if node.write(value) {
        state.mark_dirty(proxy);
    }
}

fn attach<T: PartialEq + 'static>(owner: &Domain, proxy: NodeKey, link: TargetLink) {
    let node = owner
        .state()
        .and_then(|state| state.node_value::<ProxyNode<T>>(proxy));
    match node {
        Ok(node) => {
            let old = node.link.replace(Some(link));
            drop(old);
        }
        Err(_) => drop(link),
    }
}

/// The proxy's hold on its source. Dropping it unsubscribes and releases the source
/// through the target domain's queue.
struct TargetLink {
    target: Domain,
    subscription: SubscriptionId,
    _source: Box<dyn Any + Send>,
}

impl Drop for TargetLink {
    fn drop(&mut self) {
        self.target.unsubscribe(self.subscription);
    }
}

struct ProxyNode<T> {
    value: RefCell<T>,
    pending: RefCell<Option<T>>,
    link: RefCell<Option<TargetLink>>,
}

impl<T: PartialEq> ProxyNode<T> {
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

impl<T: PartialEq + 'static> NodeValue for ProxyNode<T> {
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
        let link = self.link.take();
        drop(link);
    }
    fn type_name(&self) -> String {
        short_type_name::<Proxy<T>>()
    }
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}
