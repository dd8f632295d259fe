use std::{cell::RefCell, rc::Rc};

use derive_ex::derive_ex;

use crate::{notify::Listeners, Subscription};

use super::{ListChange, ListEvent, ObservableList, SharedNodes};


/// A list holding `map(item)` for every item of a source list, kept in step with the
/// source's change events.
///
/// Only the items affected by a change are mapped again. A `Reset` maps everything.
/// Moves are expected to describe a contiguous run; anything else leaves the mapped list
/// out of step with its source.
#[derive_ex(Clone, bound())]
pub struct MappedList<S: 'static, T: 'static>(Rc<MappedListData<S, T>>);

struct MappedListData<S: 'static, T: 'static> {
    items: RefCell<Vec<T>>,
    map: Box<dyn Fn(&S) -> T>,
    listeners: Listeners<dyn Fn(&ListEvent<T>)>,
    len_listeners: Listeners<dyn Fn(usize)>,
    source: RefCell<Option<Subscription>>,
    shared: SharedNodes,
}

impl<S: 'static, T: 'static> MappedList<S, T> {
    /// Maps the current items of `source` and follows its changes.
    pub fn new(source: &impl ObservableList<S>, map: impl Fn(&S) -> T + 'static) -> Self {
        let items: Vec<T> = source.with_items(|items| items.iter().map(&map).collect());
        let data = Rc::new(MappedListData {
            items: RefCell::new(items),
            map: Box::new(map),
            listeners: Listeners::new(),
            len_listeners: Listeners::new(),
            source: RefCell::new(None),
            shared: SharedNodes::default(),
        });
        let this = Rc::downgrade(&data);
        let subscription = source.listen(move |e| {
            if let Some(this) = this.upgrade() {
                this.apply(e);
            }
        });
        *data.source.borrow_mut() = Some(subscription);
        Self(data)
    }

    /// Calls `f` with the new length whenever a change alters the length.
    pub fn listen_len(&self, f: impl Fn(usize) + 'static) -> Subscription {
        self.0.len_listeners.insert(Rc::new(f))
    }

    pub fn get(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        self.0.items.borrow().get(index).cloned()
    }
}

impl<S: 'static, T: 'static> MappedListData<S, T> {
    fn map_all(&self, items: &[S]) -> Vec<T> {
        items.iter().map(&self.map).collect()
    }

    fn apply(&self, e: &ListEvent<S>) {
        let old_len = self.items.borrow().len();
        let change = match e.change {
            ListChange::Insert { index, items } => {
                let mapped = self.map_all(items);
                let count = mapped.len();
                drop(self.items.borrow_mut().splice(index..index, mapped));
                Change::Insert { index, count }
            }
            ListChange::Remove { index, count } => {
                let removed: Vec<T> = self
                    .items
                    .borrow_mut()
                    .drain(index..index + count)
                    .collect();
                drop(removed);
                Change::Remove { index, count }
            }
            ListChange::Replace {
                index,
                old_count,
                items,
            } => {
                let mapped = self.map_all(items);
                let count = mapped.len();
                let old: Vec<T> = self
                    .items
                    .borrow_mut()
                    .splice(index..index + old_count, mapped)
                    .collect();
                drop(old);
                Change::Replace {
                    index,
                    old_count,
                    count,
                }
            }
            ListChange::Move {
                old_index,
                new_index,
                items,
            } => {
                let count = items.len();
                let mut shadow = self.items.borrow_mut();
                let moved: Vec<T> = shadow.drain(old_index..old_index + count).collect();
                drop(shadow.splice(new_index..new_index, moved));
                Change::Move {
                    old_index,
                    new_index,
                    count,
                }
            }
            ListChange::Reset => {
                let mapped = self.map_all(e.items);
                let old = self.items.replace(mapped);
                drop(old);
                Change::Reset
            }
        };
        self.emit(change);

        let len = self.items.borrow().len();
        if len != old_len {
            for listener in self.len_listeners.snapshot() {
                listener(len);
            }
        }
    }

    fn emit(&self, change: Change) {
        let shadow = self.items.borrow();
        let items: &[T] = &shadow;
        let change = match change {
            Change::Insert { index, count } => ListChange::Insert {
                index,
                items: &items[index..index + count],
            },
            Change::Remove { index, count } => ListChange::Remove { index, count },
            Change::Replace {
                index,
                old_count,
                count,
            } => ListChange::Replace {
                index,
                old_count,
                items: &items[index..index + count],
            },
            Change::Move {
                old_index,
                new_index,
                count,
            } => ListChange::Move {
                old_index,
                new_index,
                items: &items[new_index..new_index + count],
            },
            Change::Reset => ListChange::Reset,
        };
        let event = ListEvent { change, items };
        for listener in self.listeners.snapshot() {
            listener(&event);
        }
    }
}

enum Change {
    Insert {
        index: usize,
        count: usize,
    },
    Remove {
        index: usize,
        count: usize,
    },
    Replace {
        index: usize,
        old_count: usize,
        count: usize,
    },
    Move {
        old_index: usize,
        new_index: usize,
        count: usize,
    },
    Reset,
}

impl<S: 'static, T: 'static> ObservableList<T> for MappedList<S, T> {
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
