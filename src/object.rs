use std::{
    any::{type_name, Any},
    cell::RefCell,
    marker::PhantomData,
    rc::Rc,
    sync::Arc,
};

use derive_ex::{derive_ex, Ex};

use crate::{
    core::{Domain, DomainState, NodeKey, NodeValue},
    error::OrFatal,
    notify::Listeners,
    observable::{impl_observable_node, NodeRef},
    utils::short_type_name,
    Error, ObservableNode, Result, Subscription,
};


/// Change notification source embedded in an external object.
#[derive(Ex)]
#[derive_ex(Clone, Default)]
pub struct PropertyNotifier(Listeners<dyn Fn(&str)>);

impl PropertyNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports that the property `name` changed.
    pub fn notify(&self, name: &str) {
        for listener in self.0.snapshot() {
            listener(name);
        }
    }

    /// Calls `f` with the property name on every [`notify`](Self::notify).
    pub fn listen(&self, f: impl Fn(&str) + 'static) -> Subscription {
        self.0.insert(Rc::new(f))
    }
}

/// An object outside the graph that reports property changes by name.
pub trait NotifyPropertyChanged: 'static {
    fn property_notifier(&self) -> &PropertyNotifier;
}

trait PropertyValue: Any {
    fn eq_dyn(&self, other: &dyn PropertyValue) -> bool;
    fn as_any(&self) -> &dyn Any;
}
impl<T: PartialEq + 'static> PropertyValue for T {
    fn eq_dyn(&self, other: &dyn PropertyValue) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

type Getter<O> = Box<dyn Fn(&O) -> Box<dyn PropertyValue>>;
type Setter<O> = Box<dyn Fn(&mut O, Box<dyn Any>)>;

struct Property<O> {
    name: &'static str,
    type_name: &'static str,
    get: Getter<O>,
    set: Option<Setter<O>>,
}

/// Registration table describing the properties of `O` that an [`ObjectWrapper`] tracks.
#[derive(Ex)]
#[derive_ex(Default)]
#[default(Self::new())]
pub struct Properties<O: 'static> {
    properties: Vec<Property<O>>,
}

impl<O: 'static> Properties<O> {
    pub fn new() -> Self {
        Self {
            properties: Vec::new(),
        }
    }

    /// Adds a read-only property.
    pub fn property<T: PartialEq + 'static>(
        mut self,
        name: &'static str,
        get: impl Fn(&O) -> T + 'static,
    ) -> Self {
        self.push(name, get, None);
        self
    }

    /// Adds a property that can be written through [`ObjectWrapper::set`].
    pub fn property_mut<T: PartialEq + 'static>(
        mut self,
        name: &'static str,
        get: impl Fn(&O) -> T + 'static,
        set: impl Fn(&mut O, T) + 'static,
    ) -> Self {
        let set: Setter<O> = Box::new(move |target, value| {
            if let Ok(value) = value.downcast::<T>() {
                set(target, *value);
            }
        });
        self.push(name, get, Some(set));
        self
    }

    /// Property names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.properties.iter().map(|p| p.name)
    }

    fn push<T: PartialEq + 'static>(
        &mut self,
        name: &'static str,
        get: impl Fn(&O) -> T + 'static,
        set: Option<Setter<O>>,
    ) {
        let property = Property {
            name,
            type_name: type_name::<T>(),
            get: Box::new(move |target: &O| -> Box<dyn PropertyValue> { Box::new(get(target)) }),
            set,
        };
        match self.position(name) {
            Some(index) => self.properties[index] = property,
            None => self.properties.push(property),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }
    fn find(&self, name: &str) -> Result<(usize, &Property<O>)> {
        let index = self.position(name).ok_or_else(|| Error::UnknownProperty {
            name: name.to_owned(),
        })?;
        Ok((index, &self.properties[index]))
    }
}

/// Brings an externally notifying object into the graph.
///
/// The wrapper keeps a snapshot of every registered property. Each notification from the
/// object invalidates the wrapper; the next recompute compares the buffered values with
/// the snapshot, and subscribers are notified only if at least one property actually
/// changed. [`changed_properties`](Self::changed_properties) tells which.
#[derive_ex(Clone, bound())]
pub struct ObjectWrapper<O: 'static> {
    node: Arc<NodeRef>,
    _phantom: PhantomData<fn() -> O>,
}

impl<O: NotifyPropertyChanged> ObjectWrapper<O> {
    /// Wraps `target`, taking a snapshot of every property in `properties`.
    pub fn try_new(
        domain: &Domain,
        target: Rc<RefCell<O>>,
        properties: Properties<O>,
    ) -> Result<Self> {
        let state = domain.state()?;
        let snapshot = {
            let object = target.borrow();
            properties
                .properties
                .iter()
                .map(|p| (p.get)(&*object))
                .collect()
        };
        let node = Rc::new(WrapperNode {
            target: target.clone(),
            properties,
            snapshot: RefCell::new(snapshot),
            buffer: RefCell::new(Vec::new()),
            changed: RefCell::new(Vec::new()),
            subscription: RefCell::new(None),
        });
        let key = state.insert(node.clone());
        let this = Rc::downgrade(&node);
        let owner = domain.clone();
        let subscription = target.borrow().property_notifier().listen(move |name| {
            if let Some(this) = this.upgrade() {
                if this.buffer_change(name) {
                    owner.state().or_fatal().mark_dirty(key);
                }
            }
        });
        *node.subscription.borrow_mut() = Some(subscription);
        Ok(Self {
            node: NodeRef::new(domain.clone(), key),
            _phantom: PhantomData,
        })
    }
    pub fn new(domain: &Domain, target: Rc<RefCell<O>>, properties: Properties<O>) -> Self {
        Self::try_new(domain, target, properties).or_fatal()
    }

    fn wrapper(&self) -> Result<(Rc<DomainState>, Rc<WrapperNode<O>>)> {
        let state = self.node.domain().state()?;
        let node = state.node_value::<WrapperNode<O>>(self.node.key())?;
        Ok((state, node))
    }

    /// The wrapped object.
    pub fn try_target(&self) -> Result<Rc<RefCell<O>>> {
        Ok(self.wrapper()?.1.target.clone())
    }
    pub fn target(&self) -> Rc<RefCell<O>> {
        self.try_target().or_fatal()
    }

    /// Snapshot value of a property, after applying pending notifications.
    pub fn try_get<T: Clone + 'static>(&self, name: &str) -> Result<T> {
        let (state, node) = self.wrapper()?;
        state.pull(self.node.key())?;
        let (index, property) = node.properties.find(name)?;
        let snapshot = node.snapshot.borrow();
        snapshot[index]
            .as_any()
            .downcast_ref::<T>()
            .cloned()
            .ok_or(Error::TypeMismatch {
                expected: property.type_name,
            })
    }
    pub fn get<T: Clone + 'static>(&self, name: &str) -> T {
        self.try_get(name).or_fatal()
    }

    /// Writes a property of the target object through its registered setter.
    ///
    /// The snapshot follows once the object reports the change.
    pub fn try_set<T: 'static>(&self, name: &str, value: T) -> Result<()> {
        let (_, node) = self.wrapper()?;
        let (_, property) = node.properties.find(name)?;
        let set = property.set.as_ref().ok_or_else(|| Error::ReadOnlyProperty {
            name: name.to_owned(),
        })?;
        if property.type_name != type_name::<T>() {
            return Err(Error::TypeMismatch {
                expected: property.type_name,
            });
        }
        let value: Box<dyn Any> = Box::new(value);
        set(&mut *node.target.borrow_mut(), value);
        Ok(())
    }
    pub fn set<T: 'static>(&self, name: &str, value: T) {
        self.try_set(name, value).or_fatal()
    }

    /// Properties that changed since subscribers were last notified.
    pub fn changed_properties(&self) -> Vec<&'static str> {
        self.wrapper()
            .map(|(_, node)| node.changed.borrow().clone())
            .or_fatal()
    }

    /// Calls `f` once per cycle in which the property `name` changed.
    pub fn try_subscribe_property(
        &self,
        name: &str,
        f: impl Fn() + 'static,
    ) -> Result<Subscription> {
        let (_, node) = self.wrapper()?;
        let (_, property) = node.properties.find(name)?;
        let name = property.name;
        let domain = self.node.domain().clone();
        let key = self.node.key();
        self.try_subscribe(move || {
            let changed = domain
                .state()
                .and_then(|state| state.node_value::<WrapperNode<O>>(key))
                .is_ok_and(|node| node.changed.borrow().contains(&name));
            if changed {
                f();
            }
        })
    }
    pub fn subscribe_property(&self, name: &str, f: impl Fn() + 'static) -> Subscription {
        self.try_subscribe_property(name, f).or_fatal()
    }
}

impl_observable_node!(ObjectWrapper<O>);

struct WrapperNode<O: 'static> {
    target: Rc<RefCell<O>>,
    properties: Properties<O>,
    snapshot: RefCell<Vec<Box<dyn PropertyValue>>>,
    buffer: RefCell<Vec<(usize, Option<Box<dyn PropertyValue>>)>>,
    changed: RefCell<Vec<&'static str>>,
    subscription: RefCell<Option<Subscription>>,
}

impl<O: 'static> WrapperNode<O> {
    /// Buffers the value of `name`. If the object is currently borrowed, typically because
    /// the notification comes from inside a setter, the value is read at recompute time.
    fn buffer_change(&self, name: &str) -> bool {
        let Some(index) = self.properties.position(name) else {
            return false;
        };
        let value = self
            .target
            .try_borrow()
            .ok()
            .map(|object| (self.properties.properties[index].get)(&*object));
        self.buffer.borrow_mut().push((index, value));
        true
    }
}

impl<O: 'static> NodeValue for WrapperNode<O> {
    fn recompute(&self, key: NodeKey, state: &DomainState) -> bool {
        let buffer = self.buffer.take();
        let mut latest: Vec<(usize, Box<dyn PropertyValue>)> = Vec::new();
        let mut deferred = Vec::new();
        for (index, value) in buffer {
            let value = match value {
                Some(value) => value,
                None => match self.target.try_borrow() {
                    Ok(object) => (self.properties.properties[index].get)(&*object),
                    Err(_) => {
                        deferred.push((index, None));
                        continue;
                    }
                },
            };
            match latest.iter_mut().find(|(i, _)| *i == index) {
                Some(entry) => entry.1 = value,
                None => latest.push((index, value)),
            }
        }
        if !deferred.is_empty() {
            self.buffer.borrow_mut().extend(deferred);
            state.mark_dirty(key);
        }

        let mut any_changed = false;
        let mut snapshot = self.snapshot.borrow_mut();
        let mut changed = self.changed.borrow_mut();
        for (index, value) in latest {
            if !snapshot[index].eq_dyn(&*value) {
                snapshot[index] = value;
                let name = self.properties.properties[index].name;
                if !changed.contains(&name) {
                    changed.push(name);
                }
                any_changed = true;
            }
        }
        any_changed
    }
    fn notified(&self) {
        self.changed.borrow_mut().clear();
    }
    fn dispose(&self, _state: &DomainState) {
        let subscription = self.subscription.borrow_mut().take();
        drop(subscription);
    }
    fn type_name(&self) -> String {
        short_type_name::<ObjectWrapper<O>>()
    }
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}
