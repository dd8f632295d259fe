use std::{
    any::TypeId,
    cell::RefCell,
    collections::HashMap,
    rc::Rc,
    sync::{Arc, Weak},
};

use derive_ex::derive_ex;

use crate::{
    core::{Domain, DomainId},
    notify::Listeners,
    observable::NodeRef,
    Result, Subscription,
};

#[cfg(test)]
mod tests;

/// A structural change of an ordered collection.
///
/// Indices of `Insert`, `Replace` and `Move` refer to the collection after the change,
/// except `old_index` of `Move`, which refers to the collection before it.
/// A move is applied as removing the run at `old_index`, then inserting it at `new_index`.
#[derive(Debug, PartialEq, Eq)]
pub enum ListChange<'a, T> {
    Insert {
        index: usize,
        items: &'a [T],
    },
    Remove {
        index: usize,
        count: usize,
    },
    Replace {
        index: usize,
        old_count: usize,
        items: &'a [T],
    },
    Move {
        old_index: usize,
        new_index: usize,
        items: &'a [T],
    },
    Reset,
}

/// A change together with the full contents of the collection after it.
#[derive(Debug)]
pub struct ListEvent<'a, T> {
    pub change: ListChange<'a, T>,
    pub items: &'a [T],
}

/// An ordered collection that reports each structural change to its listeners.
pub trait ObservableList<T: 'static> {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn with_items<R>(&self, f: impl FnOnce(&[T]) -> R) -> R;
    fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.with_items(|items| items.to_vec())
    }

    /// Calls `f` synchronously after every structural change.
    fn listen(&self, f: impl Fn(&ListEvent<T>) + 'static) -> Subscription;

    #[doc(hidden)]
    fn shared_nodes(&self) -> &SharedNodes;
}

/// Nodes derived from one list, shared by every handle of the same kind in the same domain.
#[doc(hidden)]
#[derive(Default)]
pub struct SharedNodes(RefCell<HashMap<(DomainId, TypeId), Weak<NodeRef>>>);

impl SharedNodes {
    /// The live node of kind `kind` in `domain`, or a new one made by `create`.
    pub(crate) fn get_or_try_insert(
        &self,
        domain: &Domain,
        kind: TypeId,
        create: impl FnOnce() -> Result<Arc<NodeRef>>,
    ) -> Result<Arc<NodeRef>> {
        let state = domain.state()?;
        let key = (domain.id(), kind);
        let existing = self.0.borrow().get(&key).and_then(Weak::upgrade);
        if let Some(node) = existing {
            if state.is_alive(node.key()) {
                return Ok(node);
            }
        }
        let node = create()?;
        let mut nodes = self.0.borrow_mut();
        nodes.retain(|_, node| node.strong_count() > 0);
        nodes.insert(key, Arc::downgrade(&node));
        Ok(node)
    }
}

/// A plain list that emits one [`ListEvent`] per operation.
///
/// Listeners must not modify the list they are listening to.
#[derive_ex(Clone, bound())]
pub struct SourceList<T: 'static>(Rc<SourceListData<T>>);

struct SourceListData<T: 'static> {
    items: RefCell<Vec<T>>,
    listeners: Listeners<dyn Fn(&ListEvent<T>)>,
    shared: SharedNodes,
}

impl<T: 'static> SourceList<T> {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }
    /// A list holding `items`, without notifying anyone.
    pub fn from_vec(items: Vec<T>) -> Self {
        Self(Rc::new(SourceListData {
            items: RefCell::new(items),
            listeners: Listeners::new(),
            shared: SharedNodes::default(),
        }))
    }

    pub fn push(&self, item: T) {
        let index = self.len();
        self.insert_many(index, [item]);
    }
    pub fn insert(&self, index: usize, item: T) {
        self.insert_many(index, [item]);
    }
    /// Inserts `items` at `index` and emits a single insert event.
    pub fn insert_many(&self, index: usize, items: impl IntoIterator<Item = T>) {
        let count = {
            let mut list = self.0.items.borrow_mut();
            let len = list.len();
            drop(list.splice(index..index, items));
            list.len() - len
        };
        self.emit(|items| ListChange::Insert {
            index,
            items: &items[index..index + count],
        });
    }

    pub fn remove(&self, index: usize) -> T {
        let mut removed = self.remove_range(index, 1);
        removed.remove(0)
    }
    /// Removes `count` items starting at `index` and returns them.
    pub fn remove_range(&self, index: usize, count: usize) -> Vec<T> {
        let removed: Vec<T> = self
            .0
            .items
            .borrow_mut()
            .drain(index..index + count)
            .collect();
        self.emit(|_| ListChange::Remove { index, count });
        removed
    }

    pub fn replace(&self, index: usize, item: T) -> T {
        let mut old = self.replace_range(index, 1, [item]);
        old.remove(0)
    }
    /// Replaces `old_count` items at `index` with `items` and returns the old ones.
    pub fn replace_range(
        &self,
        index: usize,
        old_count: usize,
        items: impl IntoIterator<Item = T>,
    ) -> Vec<T> {
        let (old, count) = {
            let mut list = self.0.items.borrow_mut();
            let len = list.len();
            let old: Vec<T> = list.splice(index..index + old_count, items).collect();
            let count = list.len() + old_count - len;
            (old, count)
        };
        self.emit(|items| ListChange::Replace {
            index,
            old_count,
            items: &items[index..index + count],
        });
        old
    }

    /// Moves `count` items from `old_index` so that they start at `new_index` afterwards.
    pub fn move_range(&self, old_index: usize, new_index: usize, count: usize) {
        {
            let mut list = self.0.items.borrow_mut();
            let moved: Vec<T> = list.drain(old_index..old_index + count).collect();
            drop(list.splice(new_index..new_index, moved));
        }
        self.emit(|items| ListChange::Move {
            old_index,
            new_index,
            items: &items[new_index..new_index + count],
        });
    }

    /// Replaces the whole content and emits a reset event.
    pub fn reset(&self, items: Vec<T>) {
        let old = self.0.items.replace(items);
        drop(old);
        self.emit(|_| ListChange::Reset);
    }
    pub fn clear(&self) {
        self.reset(Vec::new());
    }

    pub fn get(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        self.0.items.borrow().get(index).cloned()
    }

    fn emit(&self, change: impl FnOnce(&[T]) -> ListChange<'_, T>) {
        let list = self.0.items.borrow();
        let items: &[T] = &list;
        let event = ListEvent {
            change: change(items),
            items,
        };
        for listener in self.0.listeners.snapshot() {
            listener(&event);
        }
    }
}

impl<T: 'static> Default for SourceList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> FromIterator<T> for SourceList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<T: 'static> ObservableList<T> for SourceList<T> {
    fn len(&self) -> usize {
        self.0.items.borrow().len()
    }
    fn with_items<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.0.items.borrow()[..])
    }
    fn listen(&self, f: impl Fn(&ListEvent<T>) + 'static) -> Subscription {
        self.0.listeners.insert(Rc::new(f))
    }
    fn shared_nodes(&self) -> &SharedNodes {
        &self.0.shared
    }
}
