use std::any::Any;

use assert_call::call;

use crate::{Domain, DomainRunner};

/// Binds a fresh domain to the test thread.
pub fn bind(name: &str) -> (Domain, DomainRunner) {
    let domain = Domain::new(name);
    let runner = domain.bind_current_thread().unwrap();
    (domain, runner)
}

pub fn call_on_drop(s: &'static str) -> impl Any + Send {
    struct OnDrop(&'static str);
    impl Drop for OnDrop {
        fn drop(&mut self) {
            call!("{}", self.0);
        }
    }
    OnDrop(s)
}
