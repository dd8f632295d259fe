use std::{any::Any, collections::BTreeMap};

use crate::{
    core::Domain, error::OrFatal, Error, Expr, Obs, Observable, ObservableNode, Result,
    Subscription, Subscriptions, Var,
};


struct Entry {
    obs: Box<dyn Any + Send + Sync>,
    var: Option<Box<dyn Any + Send + Sync>>,
    subscribe: fn(&dyn Any, Box<dyn Fn()>) -> Result<Subscription>,
}

/// A named bag of leaves and expressions belonging to one domain.
///
/// Each node is tagged `Type.property`, where `Type` is the name given at construction.
pub struct ObservableObject {
    domain: Domain,
    type_name: String,
    entries: BTreeMap<String, Entry>,
    weak_subscriptions: bool,
    subscriptions: Subscriptions,
}

impl ObservableObject {
    /// An object without properties. `type_name` is used to tag property nodes.
    pub fn new(domain: &Domain, type_name: impl Into<String>) -> Self {
        Self {
            domain: domain.clone(),
            type_name: type_name.into(),
            entries: BTreeMap::new(),
            weak_subscriptions: false,
            subscriptions: Subscriptions::new(),
        }
    }

    /// Puts every property added from now on in weak-subscription mode.
    pub fn set_weak_subscriptions(&mut self, weak: bool) {
        self.weak_subscriptions = weak;
    }
    pub fn weak_subscriptions(&self) -> bool {
        self.weak_subscriptions
    }

    /// Subscriptions owned by the object, released when it is dropped.
    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
    /// Property names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Adds a writable property backed by a new [`Var`].
    pub fn try_add_var<T: PartialEq + 'static>(&mut self, name: &str, value: T) -> Result<Var<T>> {
        let var = Var::try_new(&self.domain, value)?;
        let erased: Box<dyn Any + Send + Sync> = Box::new(var.clone());
        self.insert(name, &var, Some(erased));
        Ok(var)
    }
    pub fn add_var<T: PartialEq + 'static>(&mut self, name: &str, value: T) -> Var<T> {
        self.try_add_var(name, value).or_fatal()
    }

    /// Adds a read-only property computed by a new [`Expr`].
    pub fn try_add_expr<T: PartialEq + 'static>(
        &mut self,
        name: &str,
        f: impl Fn() -> T + 'static,
    ) -> Result<Expr<T>> {
        let expr = Expr::try_new(&self.domain, f)?;
        self.insert(name, &expr, None);
        Ok(expr)
    }
    pub fn add_expr<T: PartialEq + 'static>(
        &mut self,
        name: &str,
        f: impl Fn() -> T + 'static,
    ) -> Expr<T> {
        self.try_add_expr(name, f).or_fatal()
    }

    fn insert<O: Observable>(
        &mut self,
        name: &str,
        node: &O,
        var: Option<Box<dyn Any + Send + Sync>>,
    ) {
        node.set_tag(format!("{}.{name}", self.type_name));
        if self.weak_subscriptions {
            node.set_weak_subscriptions(true);
        }
        let entry = Entry {
            obs: Box::new(node.to_obs()),
            var,
            subscribe: subscribe_erased::<O::Value>,
        };
        self.entries.insert(name.to_owned(), entry);
    }

    fn entry(&self, name: &str) -> Result<&Entry> {
        self.entries.get(name).ok_or_else(|| Error::UnknownProperty {
            name: name.to_owned(),
        })
    }

    /// Handle to the property `name`.
    pub fn try_obs<T: 'static>(&self, name: &str) -> Result<Obs<T>> {
        self.entry(name)?
            .obs
            .downcast_ref::<Obs<T>>()
            .cloned()
            .ok_or_else(Error::type_mismatch::<T>)
    }

    /// Handle to the property `name`, if it was added with `add_var`.
    pub fn try_var<T: 'static>(&self, name: &str) -> Result<Var<T>> {
        let entry = self.entry(name)?;
        let var = entry.var.as_ref().ok_or_else(|| Error::ReadOnlyProperty {
            name: name.to_owned(),
        })?;
        var.downcast_ref::<Var<T>>()
            .cloned()
            .ok_or_else(Error::type_mismatch::<T>)
    }

    /// Current value of the property `name`.
    pub fn try_get<T: Clone + 'static>(&self, name: &str) -> Result<T> {
        self.try_obs::<T>(name)?.try_get()
    }
    pub fn get<T: Clone + 'static>(&self, name: &str) -> T {
        self.try_get(name).or_fatal()
    }

    /// Writes a property added with [`add_var`](Self::add_var).
    pub fn try_set<T: PartialEq + 'static>(&self, name: &str, value: T) -> Result<()> {
        self.try_var::<T>(name)?.try_set(value)
    }
    pub fn set<T: PartialEq + 'static>(&self, name: &str, value: T) {
        self.try_set(name, value).or_fatal()
    }

    /// Calls `f` once per cycle in which the property `name` changed.
    pub fn try_subscribe(&self, name: &str, f: impl Fn() + 'static) -> Result<Subscription> {
        let entry = self.entry(name)?;
        (entry.subscribe)(entry.obs.as_ref(), Box::new(f))
    }
    pub fn subscribe(&self, name: &str, f: impl Fn() + 'static) -> Subscription {
        self.try_subscribe(name, f).or_fatal()
    }
}

fn subscribe_erased<T: 'static>(obs: &dyn Any, f: Box<dyn Fn()>) -> Result<Subscription> {
    obs.downcast_ref::<Obs<T>>()
        .ok_or_else(Error::type_mismatch::<T>)?
        .try_subscribe(f)
}
