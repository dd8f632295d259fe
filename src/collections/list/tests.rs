use std::{cell::RefCell, rc::Rc};

use assert_call::{call, CallRecorder};

use super::*;

fn record(list: &SourceList<i32>) -> Subscription {
    list.listen(|e| {
        let items = format!("{:?}", e.items);
        match e.change {
            ListChange::Insert { index, items: new } => call!("insert {index} {new:?} {items}"),
            ListChange::Remove { index, count } => call!("remove {index} {count} {items}"),
            ListChange::Replace {
                index,
                old_count,
                items: new,
            } => call!("replace {index} {old_count} {new:?} {items}"),
            ListChange::Move {
                old_index,
                new_index,
                items: moved,
            } => call!("move {old_index} {new_index} {moved:?} {items}"),
            ListChange::Reset => call!("reset {items}"),
        }
    })
}

#[test]
fn insert_events() {
    let mut cr = CallRecorder::new();
    let list = SourceList::from_vec(vec![1, 2]);
    let _s = record(&list);
    list.push(3);
    list.insert_many(1, [7, 8]);
    cr.verify(["insert 2 [3] [1, 2, 3]", "insert 1 [7, 8] [1, 7, 8, 2, 3]"]);
}

#[test]
fn remove_and_replace_events() {
    let mut cr = CallRecorder::new();
    let list: SourceList<i32> = (0..5).collect();
    let _s = record(&list);
    assert_eq!(list.remove_range(1, 2), vec![1, 2]);
    assert_eq!(list.replace(0, 9), 0);
    assert_eq!(list.replace_range(1, 2, [5, 6, 7]), vec![3, 4]);
    cr.verify([
        "remove 1 2 [0, 3, 4]",
        "replace 0 1 [9] [9, 3, 4]",
        "replace 1 2 [5, 6, 7] [9, 5, 6, 7]",
    ]);
}

#[test]
fn move_and_reset_events() {
    let mut cr = CallRecorder::new();
    let list: SourceList<i32> = (0..5).collect();
    let _s = record(&list);
    list.move_range(0, 2, 2);
    list.reset(vec![4]);
    list.clear();
    cr.verify([
        "move 0 2 [0, 1] [2, 3, 0, 1, 4]",
        "reset [4]",
        "reset []",
    ]);
}

#[test]
fn listener_removed_on_drop() {
    let mut cr = CallRecorder::new();
    let list = SourceList::new();
    let s = record(&list);
    drop(s);
    list.push(1);
    cr.verify(());
    assert_eq!(list.to_vec(), vec![1]);
    assert_eq!(list.get(0), Some(1));
    assert!(!list.is_empty());
}

#[test]
fn listener_may_read_list() {
    let list = SourceList::from_vec(vec![1]);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let _s = list.listen({
        let (list, seen) = (list.clone(), seen.clone());
        move |_| seen.borrow_mut().push(list.len())
    });
    list.push(2);
    list.remove(0);
    assert_eq!(*seen.borrow(), vec![2, 1]);
}
