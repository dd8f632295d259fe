use std::{cell::Cell, rc::Rc};

use assert_call::{call, CallRecorder};

use crate::{utils::test_helpers::bind, Expr, Observable, ObservableNode, Var};

#[test]
fn computes_on_creation() {
    let (domain, _runner) = bind("test");
    let a = Var::new(&domain, 2);
    let a2 = a.clone();
    let e = Expr::new(&domain, move || a2.get() * 10);
    assert_eq!(e.get(), 20);
}

#[test]
fn follows_dependency() {
    let mut cr = CallRecorder::new();
    let (domain, mut runner) = bind("test");
    let a = Var::new(&domain, 2);
    let e = Expr::new(&domain, {
        let a = a.clone();
        move || a.get() * 10
    });
    let _s = e.subscribe({
        let e = e.clone();
        move || call!("{}", e.get())
    });
    a.set(3);
    runner.run_pending();
    cr.verify("30");
}

#[test]
fn diamond_recomputes_once() {
    let (domain, mut runner) = bind("test");
    let count = Rc::new(Cell::new(0));
    let a = Var::new(&domain, 1);
    let b = Var::new(&domain, 2);
    let left = Expr::new(&domain, {
        let a = a.clone();
        move || a.get() + 1
    });
    let right = Expr::new(&domain, {
        let b = b.clone();
        move || b.get() + 1
    });
    let sum = Expr::new(&domain, {
        let (left, right, count) = (left.clone(), right.clone(), count.clone());
        move || {
            count.set(count.get() + 1);
            left.get() + right.get()
        }
    });
    count.set(0);
    a.set(10);
    b.set(20);
    runner.run_pending();
    assert_eq!(count.get(), 1);
    assert_eq!(sum.get(), 32);
    assert_eq!(count.get(), 1);
}

#[test]
fn dependencies_are_rediscovered() {
    let (domain, mut runner) = bind("test");
    let condition = Var::new(&domain, false);
    let a = Var::new(&domain, 1);
    let b = Var::new(&domain, 2);
    let e = Expr::new(&domain, {
        let (condition, a, b) = (condition.clone(), a.clone(), b.clone());
        move || if condition.get() { a.get() } else { b.get() }
    });
    a.set(5);
    assert!(!e.needs_update());
    runner.run_pending();

    condition.set(true);
    runner.run_pending();
    assert_eq!(e.get(), 5);

    a.set(6);
    assert!(e.needs_update());
    b.set(7);
    runner.run_pending();
    assert_eq!(e.get(), 6);
    b.set(8);
    assert!(!e.needs_update());
}

#[test]
fn unchanged_result_does_not_propagate() {
    let mut cr = CallRecorder::new();
    let (domain, mut runner) = bind("test");
    let a = Var::new(&domain, 1);
    let parity = Expr::new(&domain, {
        let a = a.clone();
        move || a.get() % 2
    });
    let _s = parity.subscribe(|| call!("parity"));
    a.set(3);
    runner.run_pending();
    cr.verify(());
    a.set(4);
    runner.run_pending();
    cr.verify("parity");
}

#[test]
fn subscribers_observe_settled_graph() {
    let mut cr = CallRecorder::new();
    let (domain, mut runner) = bind("test");
    let a = Var::new(&domain, 1);
    let first = Expr::new(&domain, {
        let a = a.clone();
        move || a.get() + 1
    });
    let second = Expr::new(&domain, {
        let first = first.clone();
        move || first.get() * 2
    });
    let _s = first.subscribe({
        let (first, second) = (first.clone(), second.clone());
        move || call!("{} {}", first.get(), second.get())
    });
    a.set(2);
    runner.run_pending();
    cr.verify("3 6");
}

#[test]
fn chain_reads_fresh_values_inside_pass() {
    let (domain, mut runner) = bind("test");
    let a = Var::new(&domain, 1);
    let mut last = Expr::new(&domain, {
        let a = a.clone();
        move || a.get()
    });
    let mut chain = Vec::new();
    for _ in 0..5 {
        let prev = last.clone();
        chain.push(last);
        last = Expr::new(&domain, move || prev.get() + 1);
    }
    a.set(10);
    runner.run_pending();
    assert_eq!(last.get(), 15);
}

#[test]
fn capture_reads_reports_nodes() {
    let (domain, _runner) = bind("test");
    let a = Var::new(&domain, 1);
    let b = Var::new(&domain, 2);
    let (sum, reads) = domain
        .capture_reads(|| a.get() + b.get() + a.get())
        .unwrap();
    assert_eq!(sum, 4);
    assert_eq!(reads, vec![a.id(), b.id()]);
}

#[test]
fn disposed_expression_stops_following() {
    let mut cr = CallRecorder::new();
    let (domain, mut runner) = bind("test");
    let a = Var::new(&domain, 1);
    let e = Expr::new(&domain, {
        let a = a.clone();
        move || a.get()
    });
    let _s = e.subscribe(|| call!("fired"));
    e.dispose();
    a.set(2);
    runner.run_pending();
    cr.verify(());
    assert!(e.is_disposed());
}

#[test]
fn dropped_handle_disposes_node() {
    let (domain, mut runner) = bind("test");
    let a = Var::new(&domain, 1);
    let e = Expr::new(&domain, {
        let a = a.clone();
        move || a.get()
    });
    let obs = e.to_obs();
    drop(e);
    runner.run_pending();
    assert!(!obs.is_disposed());
    drop(obs);
    runner.run_pending();
    assert_eq!(a.get(), 1);
}
