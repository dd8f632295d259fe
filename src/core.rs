use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap, VecDeque},
    fmt,
    mem::{replace, take},
    panic::{catch_unwind, AssertUnwindSafe},
    rc::Rc,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
    thread::{self, JoinHandle, ThreadId},
};

use derive_ex::Ex;
use futures::{
    channel::{mpsc, oneshot},
    executor::block_on,
    StreamExt,
};
use parse_display::Display;
use serde::{Deserialize, Serialize};
use slabmap::SlabMap;
use tracing::{debug, debug_span, error, trace};

use crate::{
    clock::{Clock, Resolution},
    utils::panic_message,
    Error, Result,
};

mod node;

pub(crate) use node::{live, live_mut, Callback, Node, NodeValue, Subscriber, SubscriptionId};
pub use node::{NodeId, NodeKey};


thread_local! {
    static STATES: RefCell<HashMap<DomainId, Rc<DomainState>>> = RefCell::new(HashMap::new());
}

static NEXT_DOMAIN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("{0}")]
pub struct DomainId(u64);

/// Settings of a [`Domain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Ex)]
#[derive_ex(Default)]
#[default(Self::new("domain"))]
#[serde(default)]
pub struct DomainConfig {
    /// Used in log output and as the name of the thread started by [`Domain::spawn`].
    pub name: String,

    /// Default strength of subscriptions made with `subscribe` on nodes of this domain.
    pub weak_subscriptions: bool,
}

impl DomainConfig {
    /// Strong subscriptions and the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weak_subscriptions: false,
        }
    }
}

enum Message {
    Tick,
    Task(Task),
    Discard(NodeKey),
    Unsubscribe(SubscriptionId),
    Shutdown,
}

struct Task(Box<dyn FnOnce() + Send>);

impl Task {
    fn run(self) {
        (self.0)()
    }
}

/// A scheduler that owns a set of observable values and is bound to exactly one thread.
///
/// `Domain` itself is a cheap, thread-safe handle. Values created in a domain can only be
/// read or written on the thread the domain is bound to; everything else
/// goes through [`enqueue`](Self::enqueue).
#[derive(Clone)]
pub struct Domain(Arc<DomainShared>);

struct DomainShared {
    id: DomainId,
    config: DomainConfig,
    thread: OnceLock<ThreadId>,
    sender: mpsc::UnboundedSender<Message>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    cycle_pending: AtomicBool,
}

impl Domain {
    /// Creates an unbound domain with the default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(DomainConfig::new(name))
    }
    /// Creates an unbound domain.
    ///
    /// It is bound by [`bind_current_thread`](Self::bind_current_thread) or [`spawn`](Self::spawn).
    pub fn with_config(config: DomainConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded();
        Self(Arc::new(DomainShared {
            id: DomainId(NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed)),
            config,
            thread: OnceLock::new(),
            sender,
            receiver: Mutex::new(Some(receiver)),
            cycle_pending: AtomicBool::new(false),
        }))
    }

    /// Process-unique identifier.
    pub fn id(&self) -> DomainId {
        self.0.id
    }
    pub fn name(&self) -> &str {
        &self.0.config.name
    }
    pub fn config(&self) -> &DomainConfig {
        &self.0.config
    }

    /// Returns `true` once the domain has been bound to a thread.
    pub fn is_bound(&self) -> bool {
        self.0.thread.get().is_some()
    }

    /// Returns `true` if the calling thread is the one this domain is bound to.
    pub fn is_current(&self) -> bool {
        self.0.thread.get() == Some(&thread::current().id())
    }

    /// Fails with [`Error::Unbound`] or [`Error::Confinement`] unless called on the bound thread.
    pub fn ensure_current(&self) -> Result<()> {
        match self.0.thread.get() {
            None => Err(Error::Unbound {
                domain: self.name().to_owned(),
            }),
            Some(id) if *id == thread::current().id() => Ok(()),
            Some(_) => Err(Error::Confinement {
                domain: self.name().to_owned(),
            }),
        }
    }

    /// Binds this domain to the calling thread.
    ///
    /// Work enqueued before binding stays queued and is run by the returned runner.
    pub fn bind_current_thread(&self) -> Result<DomainRunner> {
        let already_bound = || Error::AlreadyBound {
            domain: self.name().to_owned(),
        };
        let current = thread::current().id();
        self.0.thread.set(current).map_err(|_| already_bound())?;
        let receiver = self
            .0
            .receiver
            .lock()
            .ok()
            .and_then(|mut receiver| receiver.take())
            .ok_or_else(already_bound)?;
        let state = Rc::new(DomainState::new(self.clone()));
        STATES.with(|states| states.borrow_mut().insert(self.id(), state.clone()));
        debug!(domain = self.name(), thread = ?current, "domain bound");
        Ok(DomainRunner {
            state,
            receiver,
            stopped: false,
        })
    }

    /// Starts a thread named after this domain, binds the domain to it and runs its loop
    /// until [`DomainThread::shutdown`] is called.
    pub fn spawn(&self) -> Result<DomainThread> {
        let (sender, receiver) = oneshot::channel();
        let domain = self.clone();
        let handle = thread::Builder::new()
            .name(self.name().to_owned())
            .spawn(move || match domain.bind_current_thread() {
                Ok(runner) => {
                    let _ = sender.send(Ok(()));
                    runner.run();
                }
                Err(e) => {
                    let _ = sender.send(Err(e));
                }
            })
            .map_err(|e| Error::Spawn(e.to_string()))?;
        match block_on(receiver) {
            Ok(Ok(())) => {
                debug!(domain = self.name(), "domain thread started");
                Ok(DomainThread {
                    domain: self.clone(),
                    handle: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(Error::Spawn(format!(
                "thread of domain `{}` exited before binding",
                self.name()
            ))),
        }
    }

    /// Schedules `f` to run on this domain's thread after the subscription phase of a cycle.
    ///
    /// Can be called from any thread. Tasks run in the order they were enqueued.
    pub fn enqueue(&self, f: impl FnOnce() + Send + 'static) {
        self.post(Message::Task(Task(Box::new(f))));
    }

    /// Asks the domain loop to stop after the messages already queued.
    pub fn shutdown(&self) {
        self.post(Message::Shutdown);
    }

    /// Returns `true` while a cycle has been requested but has not started yet.
    pub fn needs_update(&self) -> bool {
        self.0.cycle_pending.load(Ordering::Acquire)
    }

    /// Recomputes every dirty node now instead of waiting for the next cycle.
    pub fn update_values_if_needed(&self) -> Result<bool> {
        Ok(self.state()?.update_values_if_needed())
    }

    /// Runs `f` and returns the nodes it read.
    pub fn capture_reads<T>(&self, f: impl FnOnce() -> T) -> Result<(T, Vec<NodeId>)> {
        let state = self.state()?;
        let (value, reads) = state.capture(f);
        Ok((value, reads.into_iter().map(|key| key.id).collect()))
    }

    pub(crate) fn state(&self) -> Result<Rc<DomainState>> {
        self.ensure_current()?;
        STATES
            .try_with(|states| states.borrow().get(&self.id()).cloned())
            .ok()
            .flatten()
            .ok_or_else(|| Error::Stopped {
                domain: self.name().to_owned(),
            })
    }

    pub(crate) fn discard(&self, key: NodeKey) {
        self.post(Message::Discard(key));
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(state) = self.state() {
            state.unsubscribe(id);
        } else {
            self.post(Message::Unsubscribe(id));
        }
    }

    fn schedule_cycle(&self) {
        if !self.0.cycle_pending.swap(true, Ordering::AcqRel) {
            self.post(Message::Tick);
        }
    }

    fn post(&self, message: Message) {
        let _ = self.0.sender.unbounded_send(message);
    }
}
impl PartialEq for Domain {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Domain {}
impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

/// Drives a domain on the thread it was bound to.
pub struct DomainRunner {
    state: Rc<DomainState>,
    receiver: mpsc::UnboundedReceiver<Message>,
    stopped: bool,
}

impl DomainRunner {
    /// The domain this runner drives.
    pub fn domain(&self) -> &Domain {
        &self.state.domain
    }
    /// Returns `true` after a shutdown message has been processed.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Processes queued messages until the queue is empty, without blocking.
    ///
    /// Returns `true` if any message was processed.
    pub fn run_pending(&mut self) -> bool {
        let mut processed = false;
        while !self.stopped {
            match self.receiver.try_next() {
                Ok(Some(message)) => {
                    self.dispatch(message);
                    processed = true;
                }
                Ok(None) | Err(_) => break,
            }
        }
        processed
    }

    /// Blocks the thread until the domain is shut down.
    pub fn run(self) {
        block_on(self.run_async())
    }

    /// Processes messages as they arrive until the domain is shut down.
    pub async fn run_async(mut self) {
        while !self.stopped {
            match self.receiver.next().await {
                Some(message) => self.dispatch(message),
                None => break,
            }
        }
    }

    fn dispatch(&mut self, message: Message) {
        match message {
            Message::Tick => self.state.run_cycle(),
            Message::Task(task) => {
                self.state.tasks.borrow_mut().push_back(task);
                self.state.domain.schedule_cycle();
            }
            Message::Discard(key) => self.state.dispose(key),
            Message::Unsubscribe(id) => self.state.unsubscribe(id),
            Message::Shutdown => self.stopped = true,
        }
    }
}
impl Drop for DomainRunner {
    fn drop(&mut self) {
        let id = self.state.domain.id();
        let state = STATES
            .try_with(|states| states.borrow_mut().remove(&id))
            .ok()
            .flatten();
        if let Some(state) = state {
            state.clear();
        }
        debug!(domain = self.state.domain.name(), "domain stopped");
    }
}

/// A domain running on its own thread.
///
/// Dropping it requests shutdown without waiting for the thread.
pub struct DomainThread {
    domain: Domain,
    handle: Option<JoinHandle<()>>,
}

impl DomainThread {
    /// Handle to the domain running on the thread.
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Stops the domain loop and waits for the thread to finish.
    pub fn shutdown(mut self) -> thread::Result<()> {
        self.domain.shutdown();
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}
impl Drop for DomainThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.domain.shutdown();
        }
    }
}

#[derive(Default)]
struct DirtyList {
    active: Vec<NodeKey>,
    cursor: usize,
    deferred: Vec<NodeKey>,
}

pub(crate) type ClockKey = (Resolution, bool);

/// Thread-confined part of a domain.
pub(crate) struct DomainState {
    domain: Domain,
    nodes: RefCell<SlabMap<Node>>,
    dirty: RefCell<DirtyList>,
    pass_depth: Cell<usize>,
    recomputed: Cell<usize>,
    changed: RefCell<BTreeMap<NodeId, NodeKey>>,
    tasks: RefCell<VecDeque<Task>>,
    captures: RefCell<Vec<Vec<NodeKey>>>,
    clocks: RefCell<HashMap<ClockKey, Clock>>,
}

impl DomainState {
    fn new(domain: Domain) -> Self {
        Self {
            domain,
            nodes: RefCell::new(SlabMap::new()),
            dirty: RefCell::new(DirtyList::default()),
            pass_depth: Cell::new(0),
            recomputed: Cell::new(0),
            changed: RefCell::new(BTreeMap::new()),
            tasks: RefCell::new(VecDeque::new()),
            captures: RefCell::new(Vec::new()),
            clocks: RefCell::new(HashMap::new()),
        }
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn clocks(&self) -> &RefCell<HashMap<ClockKey, Clock>> {
        &self.clocks
    }

    pub fn insert(&self, value: Rc<dyn NodeValue>) -> NodeKey {
        let id = NodeId::next();
        let weak = self.domain.config().weak_subscriptions;
        let slot = self.nodes.borrow_mut().insert(Node::new(id, value, weak));
        NodeKey { slot, id }
    }

    pub fn with_node<T>(&self, key: NodeKey, f: impl FnOnce(&mut Node) -> T) -> Result<T> {
        let mut nodes = self.nodes.borrow_mut();
        live_mut(&mut nodes, key).map(f).ok_or(Error::Disposed)
    }

    pub fn is_alive(&self, key: NodeKey) -> bool {
        live(&self.nodes.borrow(), key).is_some()
    }

    /// The value object of a node, without bringing it up to date.
    pub fn node_value<V: NodeValue>(&self, key: NodeKey) -> Result<Rc<V>> {
        let value = self.with_node(key, |node| node.value.clone())?;
        value
            .into_any()
            .downcast::<V>()
            .map_err(|_| Error::type_mismatch::<V>())
    }

    /// The value object of a node, recomputed first if it is dirty. Records the read.
    pub fn pull(&self, key: NodeKey) -> Result<Rc<dyn NodeValue>> {
        if self.with_node(key, |node| node.dirty)? {
            if self.pass_depth.get() == 0 {
                self.update_values_if_needed();
            }
            self.recompute(key);
        }
        self.record_read(key);
        self.with_node(key, |node| node.value.clone())
    }

    pub fn read<T: 'static, R>(&self, key: NodeKey, f: impl FnOnce(&T) -> R) -> Result<R> {
        let value = self.pull(key)?;
        let current = value.current().ok_or_else(Error::type_mismatch::<T>)?;
        let current = current
            .downcast_ref::<T>()
            .ok_or_else(Error::type_mismatch::<T>)?;
        Ok(f(current))
    }

    /// Marks `key` and everything that depends on it as needing recomputation.
    pub fn mark_dirty(&self, key: NodeKey) {
        let mut stack = vec![key];
        let mut marked = false;
        while let Some(key) = stack.pop() {
            let sinks = {
                let mut nodes = self.nodes.borrow_mut();
                let Some(node) = live_mut(&mut nodes, key) else {
                    continue;
                };
                if node.dirty {
                    continue;
                }
                node.dirty = true;
                node.sinks.clone()
            };
            let mut dirty = self.dirty.borrow_mut();
            if self.pass_depth.get() == 0 {
                dirty.active.push(key);
            } else {
                dirty.deferred.push(key);
            }
            marked = true;
            stack.extend(sinks);
        }
        if marked {
            self.domain.schedule_cycle();
        }
    }

    pub fn update_values_if_needed(&self) -> bool {
        let _pass = Pass::enter(self);
        let mut changed = false;
        while let Some(key) = self.next_dirty() {
            changed |= self.recompute(key);
        }
        changed
    }

    fn next_dirty(&self) -> Option<NodeKey> {
        let mut dirty = self.dirty.borrow_mut();
        let key = dirty.active.get(dirty.cursor).copied()?;
        dirty.cursor += 1;
        Some(key)
    }

    fn recompute(&self, key: NodeKey) -> bool {
        let value = {
            let mut nodes = self.nodes.borrow_mut();
            match live_mut(&mut nodes, key) {
                Some(node) if node.dirty => {
                    node.dirty = false;
                    node.value.clone()
                }
                _ => return false,
            }
        };
        self.recomputed.set(self.recomputed.get() + 1);
        let changed = value.recompute(key, self);
        if changed {
            self.changed.borrow_mut().insert(key.id, key);
        }
        changed
    }

    pub fn capture<T>(&self, f: impl FnOnce() -> T) -> (T, Vec<NodeKey>) {
        self.captures.borrow_mut().push(Vec::new());
        let capture = Capture {
            state: self,
            finished: false,
        };
        let value = f();
        (value, capture.finish())
    }

    fn record_read(&self, key: NodeKey) {
        if let Some(reads) = self.captures.borrow_mut().last_mut() {
            if !reads.contains(&key) {
                reads.push(key);
            }
        }
    }

    /// Replaces the dependencies of `key` and updates the reverse edges of its sources.
    pub fn relink(&self, key: NodeKey, mut sources: Vec<NodeKey>) {
        sources.retain(|source| *source != key);
        let Ok(old) = self.with_node(key, |node| replace(&mut node.sources, sources.clone())) else {
            return;
        };
        let mut nodes = self.nodes.borrow_mut();
        for source in old.iter().filter(|s| !sources.contains(s)) {
            if let Some(node) = live_mut(&mut nodes, *source) {
                node.remove_sink(key);
            }
        }
        for source in sources.iter().filter(|s| !old.contains(s)) {
            if let Some(node) = live_mut(&mut nodes, *source) {
                node.add_sink(key);
            }
        }
    }

    pub fn dispose(&self, key: NodeKey) {
        let node = {
            let mut nodes = self.nodes.borrow_mut();
            if live(&nodes, key).is_none() {
                return;
            }
            nodes.remove(key.slot)
        };
        let Some(node) = node else {
            return;
        };
        {
            let mut nodes = self.nodes.borrow_mut();
            for source in &node.sources {
                if let Some(source) = live_mut(&mut nodes, *source) {
                    source.remove_sink(key);
                }
            }
        }
        self.changed.borrow_mut().remove(&key.id);
        trace!(node = %node.description(), "disposed");
        node.value.dispose(self);
    }

    pub fn subscribe(&self, key: NodeKey, callback: Callback) -> Result<SubscriptionId> {
        self.with_node(key, |node| {
            let weak = matches!(callback, Callback::Weak(_));
            let subscriber = Subscriber::new(callback);
            let serial = subscriber.serial;
            let sub = node.subscriptions.insert(subscriber);
            debug!(node = %node.description(), subscription = sub, weak, "subscribed");
            SubscriptionId {
                node: key,
                key: sub,
                serial,
            }
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let removed = self.with_node(id.node, |node| {
            node.subscriber_mut(id)?;
            debug!(node = %node.description(), subscription = id.key, "unsubscribed");
            node.subscriptions.remove(id.key)
        });
        drop(removed);
    }

    pub fn subscription_count(&self, key: NodeKey) -> Result<usize> {
        self.with_node(key, |node| {
            node.subscriptions
                .values()
                .filter(|subscriber| subscriber.is_alive())
                .count()
        })
    }

    /// Live callbacks of `key`, pruning dead weak entries.
    fn collect_subscriptions(&self, key: NodeKey, out: &mut Vec<(SubscriptionId, Rc<dyn Fn()>)>) {
        let mut nodes = self.nodes.borrow_mut();
        let Some(node) = live_mut(&mut nodes, key) else {
            return;
        };
        let mut dead = Vec::new();
        for (sub, subscriber) in node.subscriptions.iter() {
            let id = SubscriptionId {
                node: key,
                key: sub,
                serial: subscriber.serial,
            };
            match subscriber.callback.upgrade() {
                Some(f) => out.push((id, f)),
                None => dead.push(sub),
            }
        }
        if !dead.is_empty() {
            debug!(node = %node.description(), count = dead.len(), "pruned dead weak subscriptions");
        }
        for sub in dead {
            node.subscriptions.remove(sub);
        }
    }

    /// Invokes the subscriptions registered on `keys` when the call starts.
    fn invoke_subscriptions(&self, keys: &[NodeKey]) {
        let mut callbacks = Vec::new();
        for key in keys {
            self.collect_subscriptions(*key, &mut callbacks);
        }
        for (id, f) in callbacks {
            let registered = self
                .with_node(id.node, |node| node.subscriber_mut(id).is_some())
                .unwrap_or(false);
            if registered {
                f();
            }
        }
    }

    fn run_cycle(&self) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.run_cycle_phases())) {
            error!(
                domain = self.domain.name(),
                "panic during update cycle: {}",
                panic_message(&*payload)
            );
            self.domain.0.cycle_pending.store(false, Ordering::Release);
            if !self.tasks.borrow().is_empty() || self.has_dirty() {
                self.domain.schedule_cycle();
            }
        }
    }

    fn run_cycle_phases(&self) {
        let span = debug_span!("cycle", domain = self.domain.name());
        let _enter = span.enter();

        self.update_values_if_needed();
        let recomputed = self.recomputed.replace(0);
        let changed: Vec<NodeKey> = take(&mut *self.changed.borrow_mut())
            .into_values()
            .collect();
        self.domain.0.cycle_pending.store(false, Ordering::Release);
        if self.has_dirty() {
            self.domain.schedule_cycle();
        }

        let notified = Notified {
            state: self,
            keys: &changed,
        };
        self.invoke_subscriptions(&changed);
        drop(notified);

        let task_count = self.tasks.borrow().len();
        for _ in 0..task_count {
            let Some(task) = self.tasks.borrow_mut().pop_front() else {
                break;
            };
            task.run();
        }
        trace!(
            recomputed,
            changed = changed.len(),
            tasks = task_count,
            "cycle finished"
        );
    }

    fn has_dirty(&self) -> bool {
        !self.dirty.borrow().active.is_empty()
    }

    fn clear(&self) {
        drop(take(&mut *self.clocks.borrow_mut()));
        drop(take(&mut *self.tasks.borrow_mut()));
        let nodes = take(&mut *self.nodes.borrow_mut());
        for node in nodes.values() {
            node.value.dispose(self);
        }
        drop(nodes);
        *self.dirty.borrow_mut() = DirtyList::default();
        self.changed.borrow_mut().clear();
    }
}

struct Pass<'a>(&'a DomainState);

impl<'a> Pass<'a> {
    fn enter(state: &'a DomainState) -> Self {
        state.pass_depth.set(state.pass_depth.get() + 1);
        Self(state)
    }
}
impl Drop for Pass<'_> {
    fn drop(&mut self) {
        let depth = self.0.pass_depth.get() - 1;
        self.0.pass_depth.set(depth);
        if depth == 0 {
            let mut dirty = self.0.dirty.borrow_mut();
            let processed = dirty.cursor;
            dirty.active.drain(..processed);
            dirty.cursor = 0;
            let deferred = take(&mut dirty.deferred);
            dirty.active.extend(deferred);
        }
    }
}

/// Tells the nodes of a subscription phase that it is over, even if a subscriber panicked.
struct Notified<'a> {
    state: &'a DomainState,
    keys: &'a [NodeKey],
}
impl Drop for Notified<'_> {
    fn drop(&mut self) {
        for key in self.keys {
            if let Ok(value) = self.state.with_node(*key, |node| node.value.clone()) {
                value.notified();
            }
        }
    }
}

struct Capture<'a> {
    state: &'a DomainState,
    finished: bool,
}

impl Capture<'_> {
    fn finish(mut self) -> Vec<NodeKey> {
        self.finished = true;
        self.state.captures.borrow_mut().pop().unwrap_or_default()
    }
}
impl Drop for Capture<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state.captures.borrow_mut().pop();
        }
    }
}
