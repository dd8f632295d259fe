use assert_call::{call, CallRecorder};

use crate::{utils::test_helpers::bind, Error, Expr, Obs, Observable, ObservableNode, Var};

#[test]
fn obs_shares_node() {
    let (domain, _runner) = bind("test");
    let v = Var::new(&domain, 3);
    let obs: Obs<i32> = v.to_obs();
    assert_eq!(obs.id(), v.id());
    v.set(4);
    assert_eq!(obs.get(), 4);
    assert_eq!(obs.description(), v.description());
}

#[test]
fn obs_keeps_node_alive() {
    let (domain, mut runner) = bind("test");
    let obs = Var::new(&domain, 3).to_obs();
    runner.run_pending();
    assert!(!obs.is_disposed());
    assert_eq!(obs.get(), 3);
}

#[test]
fn tag_and_description() {
    let (domain, _runner) = bind("test");
    let v = Var::new(&domain, 1u8);
    assert_eq!(v.tag(), None);
    assert_eq!(v.description(), format!("Var<u8>#{}()", v.id()));
    v.set_tag("Counter.value");
    assert_eq!(v.tag().as_deref(), Some("Counter.value"));
    assert_eq!(
        v.description(),
        format!("Var<u8>#{}(Counter.value)", v.id())
    );
    v.dispose();
    assert_eq!(v.description(), format!("#{}(disposed)", v.id()));
}

#[test]
fn debug_shows_type_and_id() {
    let (domain, _runner) = bind("test");
    let v = Var::new(&domain, 1);
    assert_eq!(format!("{v:?}"), format!("Var({:?})", v.id()));
}

#[test]
fn dispose_is_idempotent() {
    let (domain, mut runner) = bind("test");
    let a = Var::new(&domain, 1);
    let b = {
        let a = a.clone();
        Expr::new(&domain, move || a.get() + 1)
    };
    b.dispose();
    b.dispose();
    assert!(b.is_disposed());
    assert!(b.try_get().is_err());
    a.set(5);
    runner.run_pending();
    assert_eq!(a.get(), 5);
}

#[test]
fn weak_subscriptions_per_node() {
    let mut cr = CallRecorder::new();
    let (domain, mut runner) = bind("test");
    let v = Var::new(&domain, 0);
    v.set_weak_subscriptions(true);
    let s = v.subscribe(|| call!("fired"));
    assert_eq!(v.subscription_count(), 1);
    v.set(1);
    runner.run_pending();
    cr.verify("fired");

    drop(s);
    assert_eq!(v.subscription_count(), 0);
    v.set(2);
    runner.run_pending();
    cr.verify(());
}

#[test]
fn runner_drop_disposes_everything() {
    let (domain, runner) = bind("test");
    let v = Var::new(&domain, 0);
    drop(runner);
    assert!(v.is_disposed());
}

#[test]
fn disposed_node_reports_disposed() {
    let (domain, _runner) = bind("test");
    let v = Var::new(&domain, 0);
    v.dispose();
    assert_eq!(v.try_tag(), Err(Error::Disposed));
    assert_eq!(v.try_needs_update(), Err(Error::Disposed));
    assert_eq!(v.try_subscription_count(), Err(Error::Disposed));
}

#[test]
#[should_panic(expected = "observable value has been disposed")]
fn disposed_node_panics_on_needs_update() {
    let (domain, _runner) = bind("test");
    let v = Var::new(&domain, 0);
    v.dispose();
    v.needs_update();
}
