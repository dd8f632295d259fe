mod test_utils;

use std::{
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use concise::*;

/// Runs the view domain until `done` holds or the deadline passes.
fn run_until(runner: &mut DomainRunner, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        runner.run_pending();
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Runs `f` on the model thread and waits for its result.
fn on_model<T: Send + 'static>(model: &Domain, f: impl FnOnce() -> T + Send + 'static) -> T {
    let (sender, receiver) = mpsc::channel();
    model.enqueue(move || {
        let _ = sender.send(f());
    });
    receiver.recv().unwrap()
}

#[test]
fn proxy_follows_model_thread() {
    let domains = Domains::new();
    let (mut view, model) = domains.initialize().unwrap();

    let model_domain = domains.model.clone();
    let source = on_model(&domains.model, move || Var::new(&model_domain, 1));
    let proxy = Proxy::from_domain(
        &domains.view,
        &domains.model,
        {
            let source = source.clone();
            move || source
        },
        0,
    );
    assert!(run_until(&mut view, || proxy.get() == 1));

    let s = source.clone();
    on_model(&domains.model, move || s.set(2));
    assert!(run_until(&mut view, || proxy.get() == 2));

    proxy.dispose();
    let s = source.clone();
    on_model(&domains.model, move || s.set(3));
    let s = source.clone();
    let count = on_model(&domains.model, move || s.subscription_count());
    assert_eq!(count, 0);
    assert!(proxy.is_disposed());

    drop(source);
    model.shutdown().unwrap();
}

#[test]
fn model_values_are_confined_to_model_thread() {
    let domains = Domains::new();
    let (_view, model) = domains.initialize().unwrap();

    let model_domain = domains.model.clone();
    let source = on_model(&domains.model, move || Var::new(&model_domain, 1));
    assert!(matches!(source.try_get(), Err(Error::Confinement { .. })));
    assert!(matches!(
        Var::try_new(&domains.model, 0),
        Err(Error::Confinement { .. })
    ));

    let s = source.clone();
    assert_eq!(on_model(&domains.model, move || s.get()), 1);
    drop(source);
    model.shutdown().unwrap();
}

#[test]
fn shutdown_stops_model_thread() {
    let model = Domain::new("worker");
    let thread = model.spawn().unwrap();
    assert!(model.is_bound());
    assert!(!model.is_current());
    thread.shutdown().unwrap();
    let m = model.clone();
    assert!(matches!(
        thread::spawn(move || m.bind_current_thread().map(|_| ()))
            .join()
            .unwrap(),
        Err(Error::AlreadyBound { .. })
    ));
}
