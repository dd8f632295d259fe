use assert_call::{call, CallRecorder};

use crate::{
    collections::{Count, First, MappedList, SourceList},
    utils::test_helpers::bind,
    Observable, ObservableNode,
};

#[test]
fn count_follows_list() {
    let mut cr = CallRecorder::new();
    let (domain, mut runner) = bind("test");
    let list: SourceList<i32> = (0..3).collect();
    let count = Count::new(&domain, &list);
    assert_eq!(count.get(), 3);
    let _s = count.subscribe({
        let count = count.clone();
        move || call!("{}", count.get())
    });
    list.push(3);
    list.push(4);
    runner.run_pending();
    cr.verify("5");
}

#[test]
fn count_change_and_change_back_does_not_fire() {
    let mut cr = CallRecorder::new();
    let (domain, mut runner) = bind("test");
    let list: SourceList<i32> = (0..3).collect();
    let count = Count::new(&domain, &list);
    let _s = count.subscribe(|| call!("fired"));
    list.push(3);
    list.remove(0);
    runner.run_pending();
    cr.verify(());
    assert_eq!(count.get(), 3);
}

#[test]
fn count_ignores_same_length_changes() {
    let (domain, _runner) = bind("test");
    let list: SourceList<i32> = (0..3).collect();
    let count = Count::new(&domain, &list);
    list.replace(0, 7);
    list.move_range(0, 2, 1);
    assert!(!count.needs_update());
}

#[test]
fn first_follows_list() {
    let mut cr = CallRecorder::new();
    let (domain, mut runner) = bind("test");
    let list = SourceList::new();
    let first = First::new(&domain, &list);
    assert_eq!(first.get(), None);
    let _s = first.subscribe({
        let first = first.clone();
        move || call!("{:?}", first.get())
    });
    list.push("a");
    runner.run_pending();
    cr.verify("Some(\"a\")");
    list.push("b");
    runner.run_pending();
    cr.verify(());
    list.remove(0);
    runner.run_pending();
    cr.verify("Some(\"b\")");
    list.clear();
    runner.run_pending();
    cr.verify("None");
}

#[test]
fn count_over_mapped_list() {
    let (domain, _runner) = bind("test");
    let list: SourceList<i32> = (0..2).collect();
    let mapped = MappedList::new(&list, |x: &i32| x + 1);
    let count = Count::new(&domain, &mapped);
    list.insert_many(0, [5, 6]);
    assert_eq!(count.get(), 4);
    assert!(count.description().starts_with("Count#"));
}

#[test]
fn disposed_count_stops_listening() {
    let (domain, _runner) = bind("test");
    let list: SourceList<i32> = (0..2).collect();
    let count = Count::new(&domain, &list);
    count.dispose();
    list.push(1);
    assert!(count.is_disposed());
}

#[test]
fn first_change_and_change_back_does_not_fire() {
    let mut cr = CallRecorder::new();
    let (domain, mut runner) = bind("test");
    let list = SourceList::from_vec(vec!["a", "b"]);
    let first = First::new(&domain, &list);
    let _s = first.subscribe(|| call!("fired"));
    list.insert(0, "z");
    list.remove(0);
    runner.run_pending();
    cr.verify(());
    assert_eq!(first.get(), Some("a"));
}

#[test]
fn nodes_are_shared_per_list() {
    let (domain, _runner) = bind("test");
    let list: SourceList<i32> = (0..3).collect();
    let other: SourceList<i32> = (0..3).collect();
    let a = Count::new(&domain, &list);
    let b = Count::new(&domain, &list);
    assert_eq!(a.id(), b.id());
    assert_ne!(a.id(), Count::new(&domain, &other).id());
    assert_ne!(a.id(), First::new(&domain, &list).id());
    assert_eq!(
        First::new(&domain, &list).id(),
        First::new(&domain, &list).id()
    );

    let id = a.id();
    drop(a);
    drop(b);
    let c = Count::new(&domain, &list);
    assert_ne!(c.id(), id);

    c.dispose();
    let d = Count::new(&domain, &list);
    assert_ne!(d.id(), c.id());
    assert_eq!(d.get(), 3);
}
