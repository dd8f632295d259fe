use std::{
    sync::mpsc,
    time::{Duration, Instant},
};

use super::*;

#[test]
fn fires_after_instant() {
    let (tx, rx) = mpsc::channel();
    let start = Instant::now();
    let _handle = schedule_at(start + Duration::from_millis(20), move || {
        let _ = tx.send(Instant::now());
    });
    let fired = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(fired >= start + Duration::from_millis(20));
}

#[test]
fn fires_in_instant_order() {
    let (tx, rx) = mpsc::channel();
    let now = Instant::now();
    let mut handles = Vec::new();
    for (id, delay) in [(2, 40), (0, 10), (1, 25)] {
        let tx = tx.clone();
        handles.push(schedule_at(now + Duration::from_millis(delay), move || {
            let _ = tx.send(id);
        }));
    }
    let order: Vec<i32> = (0..3)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    assert_eq!(order, vec![0, 1, 2]);
}

#[test]
fn drop_handle_cancels() {
    let (tx, rx) = mpsc::channel();
    let handle = schedule_at(Instant::now() + Duration::from_millis(30), move || {
        let _ = tx.send(());
    });
    drop(handle);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn drop_after_fire_is_harmless() {
    let (tx, rx) = mpsc::channel();
    let handle = schedule_at(Instant::now(), move || {
        let _ = tx.send(());
    });
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    drop(handle);
}
