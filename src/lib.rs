//! A fine-grained reactive dataflow engine.
//!
//! Values live in a [`Domain`], a scheduler bound to one thread. Leaves ([`Var`]) are
//! written, derived values ([`Expr`]) discover their dependencies by reading, and once per
//! cycle the domain recomputes what was invalidated and notifies subscribers of the values
//! that actually changed. Values computed in another domain are mirrored with [`Proxy`].

pub mod collections;
pub mod core;

mod clock;
mod domains;
mod error;
mod expr;
mod notify;
mod object;
mod observable;
mod proxy;
mod record;
mod subscription;
mod utils;
mod var;

pub use crate::core::{Domain, DomainConfig, DomainId, DomainRunner, DomainThread, NodeId, NodeKey};
pub use clock::{Clock, Resolution};
pub use collections::{Count, First, ListChange, ListEvent, MappedList, ObservableList, SourceList};
pub use domains::{Domains, DomainsConfig};
pub use error::{Error, Result};
pub use expr::Expr;
pub use object::{NotifyPropertyChanged, ObjectWrapper, Properties, PropertyNotifier};
pub use observable::{Obs, Observable, ObservableNode};
pub use proxy::Proxy;
pub use record::ObservableObject;
pub use subscription::{Subscription, Subscriptions};
pub use var::Var;
