use std::{
    any::Any,
    cell::Ref,
    fmt,
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
};

use slabmap::SlabMap;

use super::DomainState;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SUBSCRIBER_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Process-wide identity of a node, assigned in creation order.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
    /// The raw value.
    pub fn get(self) -> u64 {
        self.0
    }
}
impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// Arena address of a node.
///
/// `slot` is reused after disposal, `id` never is, so a key whose `id` no longer matches
/// the occupant of its slot refers to a disposed node.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeKey {
    pub(crate) slot: usize,
    pub(crate) id: NodeId,
}

impl NodeKey {
    /// Identity of the node this key was issued for.
    pub fn id(self) -> NodeId {
        self.id
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct SubscriptionId {
    pub node: NodeKey,
    pub key: usize,
    pub serial: u64,
}

/// Polymorphic value object owned by a node.
pub(crate) trait NodeValue: 'static {
    /// Pull a fresh value. Returns `true` if it differs from the cached one.
    fn recompute(&self, key: NodeKey, state: &DomainState) -> bool;

    /// The cached value, for nodes that hold a single value.
    fn current(&self) -> Option<Ref<'_, dyn Any>> {
        None
    }

    /// Called after the subscription phase that reported this node as changed.
    fn notified(&self) {}

    /// Called once, after the node has been removed from the arena.
    fn dispose(&self, _state: &DomainState) {}

    fn type_name(&self) -> String;

    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

pub(crate) struct Subscriber {
    pub serial: u64,
    pub callback: Callback,
}

impl Subscriber {
    pub fn new(callback: Callback) -> Self {
        Self {
            serial: NEXT_SUBSCRIBER_SERIAL.fetch_add(1, Ordering::Relaxed),
            callback,
        }
    }
    pub fn is_alive(&self) -> bool {
        match &self.callback {
            Callback::Strong(_) => true,
            Callback::Weak(f) => f.strong_count() > 0,
        }
    }
}

pub(crate) enum Callback {
    Strong(Rc<dyn Fn()>),
    Weak(Weak<dyn Fn()>),
}
impl Callback {
    pub fn new(f: &Rc<dyn Fn()>, weak: bool) -> Self {
        if weak {
            Callback::Weak(Rc::downgrade(f))
        } else {
            Callback::Strong(f.clone())
        }
    }
    pub fn upgrade(&self) -> Option<Rc<dyn Fn()>> {
        match self {
            Callback::Strong(f) => Some(f.clone()),
            Callback::Weak(f) => f.upgrade(),
        }
    }
}

pub(crate) struct Node {
    pub id: NodeId,
    pub dirty: bool,
    pub tag: Option<String>,
    pub weak_subscriptions: bool,
    pub value: Rc<dyn NodeValue>,
    pub sources: Vec<NodeKey>,
    pub sinks: Vec<NodeKey>,
    pub subscriptions: SlabMap<Subscriber>,
}

impl Node {
    pub fn new(id: NodeId, value: Rc<dyn NodeValue>, weak_subscriptions: bool) -> Self {
        Self {
            id,
            dirty: false,
            tag: None,
            weak_subscriptions,
            value,
            sources: Vec::new(),
            sinks: Vec::new(),
            subscriptions: SlabMap::new(),
        }
    }
    pub fn add_sink(&mut self, sink: NodeKey) {
        if !self.sinks.contains(&sink) {
            self.sinks.push(sink);
        }
    }
    pub fn remove_sink(&mut self, sink: NodeKey) {
        self.sinks.retain(|s| *s != sink);
    }
    pub fn subscriber_mut(&mut self, id: SubscriptionId) -> Option<&mut Subscriber> {
        self.subscriptions
            .get_mut(id.key)
            .filter(|s| s.serial == id.serial)
    }
    pub fn description(&self) -> String {
        format!(
            "{}#{}({})",
            self.value.type_name(),
            self.id,
            self.tag.as_deref().unwrap_or("")
        )
    }
}

pub(crate) fn live(nodes: &SlabMap<Node>, key: NodeKey) -> Option<&Node> {
    nodes.get(key.slot).filter(|n| n.id == key.id)
}
pub(crate) fn live_mut(nodes: &mut SlabMap<Node>, key: NodeKey) -> Option<&mut Node> {
    nodes.get_mut(key.slot).filter(|n| n.id == key.id)
}
