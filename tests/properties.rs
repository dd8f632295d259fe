mod test_utils;

use std::{cell::Cell, rc::Rc, thread};

use assert_call::{call, CallRecorder};
use concise::*;
use rstest::rstest;

use self::test_utils::*;

#[rstest]
fn same_value_write_fires_nothing(#[values(0, 1, 42)] value: i32) {
    let (domain, mut runner) = bind("test");
    let a = Var::new(&domain, value);
    let b = {
        let a = a.clone();
        Expr::new(&domain, move || a.get() * 2)
    };
    let ra = record(&a);
    let rb = record(&b);
    a.set(value);
    runner.run_pending();
    assert_eq!(ra.take(), Vec::<i32>::new());
    assert_eq!(rb.take(), Vec::<i32>::new());
}

#[test]
fn diamond_recomputes_once_per_cycle() {
    let (domain, mut runner) = bind("test");
    let count = Rc::new(Cell::new(0));
    let a = Var::new(&domain, 1);
    let b = Var::new(&domain, 2);
    let left = {
        let a = a.clone();
        Expr::new(&domain, move || a.get() + 1)
    };
    let right = {
        let b = b.clone();
        Expr::new(&domain, move || b.get() + 1)
    };
    let sum = {
        let count = count.clone();
        let left = left.clone();
        let right = right.clone();
        Expr::new(&domain, move || {
            count.set(count.get() + 1);
            left.get() + right.get()
        })
    };
    let r = record(&sum);
    count.set(0);

    a.set(10);
    b.set(20);
    runner.run_pending();
    assert_eq!(count.get(), 1);
    assert_eq!(r.take(), vec![32]);
}

#[test]
fn dependencies_follow_last_evaluation() {
    let (domain, mut runner) = bind("test");
    let condition = Var::new(&domain, false);
    let a = Var::new(&domain, 1);
    let b = Var::new(&domain, 2);
    let derived = {
        let (condition, a, b) = (condition.clone(), a.clone(), b.clone());
        Expr::new(&domain, move || if condition.get() { a.get() } else { b.get() })
    };
    let r = record(&derived);

    a.set(5);
    assert!(!derived.needs_update());
    runner.run_pending();
    assert_eq!(r.take(), Vec::<i32>::new());

    condition.set(true);
    runner.run_pending();
    assert_eq!(r.take(), vec![5]);

    a.set(6);
    assert!(derived.needs_update());
    b.set(7);
    runner.run_pending();
    assert_eq!(r.take(), vec![6]);
}

#[test]
fn subscribers_see_settled_graph() {
    let mut cr = CallRecorder::new();
    let (domain, mut runner) = bind("test");
    let a = Var::new(&domain, 1);
    let double = {
        let a = a.clone();
        Expr::new(&domain, move || a.get() * 2)
    };
    let quad = {
        let double = double.clone();
        Expr::new(&domain, move || double.get() * 2)
    };
    let _s = a.subscribe({
        let (a, double, quad) = (a.clone(), double.clone(), quad.clone());
        move || call!("{} {} {}", a.get(), double.get(), quad.get())
    });
    a.set(3);
    runner.run_pending();
    cr.verify("3 6 12");
}

#[test]
fn confinement_is_enforced_for_leaves_and_expressions() {
    let (domain, _runner) = bind("test");
    let a = Var::new(&domain, 1);
    let b = {
        let a = a.clone();
        Expr::new(&domain, move || a.get() + 1)
    };
    let (a2, b2) = (a.clone(), b.clone());
    let (read_a, write_a, read_b) = thread::spawn(move || {
        (a2.try_get(), a2.try_set(5), b2.try_get())
    })
    .join()
    .unwrap();
    assert!(matches!(read_a, Err(Error::Confinement { .. })));
    assert!(matches!(write_a, Err(Error::Confinement { .. })));
    assert!(matches!(read_b, Err(Error::Confinement { .. })));
    assert_eq!(b.get(), 2);
}

#[test]
fn mapped_list_matches_full_remap() {
    let source: SourceList<i32> = (0..5).collect();
    let mapped = MappedList::new(&source, |x| x * 10);
    source.insert_many(2, [100, 101, 102]);
    source.remove(0);
    let expected: Vec<i32> = source.to_vec().iter().map(|x| x * 10).collect();
    assert_eq!(mapped.len(), expected.len());
    assert_eq!(mapped.to_vec(), expected);
}

#[test]
fn dead_weak_subscriptions_are_skipped_and_pruned() {
    let (domain, mut runner) = bind("test");
    let a = Var::new(&domain, 0);
    let mut handles = Vec::new();
    for i in 1..=10 {
        let f: Rc<dyn Fn()> = Rc::new(|| panic!("dead subscription invoked"));
        handles.push(a.subscribe_weak(&f));
        drop(f);
        a.set(i);
        runner.run_pending();
        assert_eq!(a.subscription_count(), 0);
    }
    drop(handles);
}

#[test]
fn count_change_and_change_back_fires_nothing() {
    let (domain, mut runner) = bind("test");
    let list: SourceList<i32> = (0..3).collect();
    let count = Count::new(&domain, &list);
    let r = record(&count);
    list.push(3);
    list.remove(3);
    runner.run_pending();
    assert_eq!(r.take(), Vec::<usize>::new());
    assert_eq!(count.get(), 3);
}

#[test]
fn work_enqueued_before_binding_runs_after() {
    let mut cr = CallRecorder::new();
    let domain = Domain::new("late");
    domain.enqueue(|| call!("task"));
    assert!(matches!(
        Var::try_new(&domain, 0),
        Err(Error::Unbound { .. })
    ));
    let mut runner = domain.bind_current_thread().unwrap();
    cr.verify(());
    runner.run_pending();
    cr.verify("task");
}

#[test]
fn panicking_subscriber_does_not_stop_tasks() {
    let mut cr = CallRecorder::new();
    let (domain, mut runner) = bind("test");
    let a = Var::new(&domain, 0);
    let _s = a.subscribe(|| panic!("subscriber failed"));
    a.set(1);
    domain.enqueue(|| call!("task"));
    runner.run_pending();
    cr.verify("task");
}
