use std::{
    collections::BTreeMap,
    sync::{Condvar, LazyLock, Mutex, MutexGuard},
    thread,
    time::Instant,
};

use slabmap::SlabMap;
use tracing::debug;

static SLEEP_REGISTRY: LazyLock<SleepRegistry> = LazyLock::new(|| SleepRegistry {
    queue: Mutex::new(SleepQueue::new()),
    condvar: Condvar::new(),
});

type Callback = Box<dyn FnOnce() + Send>;

struct SleepRegistry {
    queue: Mutex<SleepQueue>,
    condvar: Condvar,
}
impl SleepRegistry {
    fn lock(&self) -> MutexGuard<'_, SleepQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn run_worker(&self) {
        let mut due = Vec::new();
        let mut queue = self.lock();
        loop {
            let now = Instant::now();
            while let Some(task) = queue.tasks.first_entry() {
                if task.key().instant > now {
                    break;
                }
                let id = task.remove();
                if let Some(entry) = queue.entries.remove(id) {
                    due.push(entry.callback);
                }
            }
            if !due.is_empty() {
                drop(queue);
                for callback in due.drain(..) {
                    callback();
                }
                queue = self.lock();
                continue;
            }
            queue = if let Some((key, _)) = queue.tasks.first_key_value() {
                let wait = key.instant.saturating_duration_since(now);
                match self.condvar.wait_timeout(queue, wait) {
                    Ok((queue, _)) => queue,
                    Err(e) => e.into_inner().0,
                }
            } else {
                self.condvar.wait(queue).unwrap_or_else(|e| e.into_inner())
            };
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    instant: Instant,
    seq: u64,
}

struct Entry {
    callback: Callback,
    key: Key,
}

struct SleepQueue {
    next_seq: u64,
    tasks: BTreeMap<Key, usize>,
    entries: SlabMap<Entry>,
    thread_running: bool,
}

impl SleepQueue {
    fn new() -> Self {
        Self {
            next_seq: 0,
            tasks: BTreeMap::new(),
            entries: SlabMap::new(),
            thread_running: false,
        }
    }

    fn insert(&mut self, instant: Instant, callback: Callback, condvar: &Condvar) -> usize {
        self.ensure_thread_running();
        let key = Key {
            instant,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        let notify = match self.tasks.first_key_value() {
            Some((first, _)) => key < *first,
            None => true,
        };
        let id = self.entries.insert(Entry { callback, key });
        self.tasks.insert(key, id);
        if notify {
            condvar.notify_one();
        }
        id
    }

    fn ensure_thread_running(&mut self) {
        if self.thread_running {
            return;
        }
        self.thread_running = true;
        debug!("starting timer thread");
        let spawned = thread::Builder::new()
            .name("concise-timer".into())
            .spawn(|| SLEEP_REGISTRY.run_worker());
        if spawned.is_err() {
            self.thread_running = false;
        }
    }

    fn remove(&mut self, id: usize, seq: u64) -> Option<Entry> {
        if self.entries.get(id)?.key.seq != seq {
            return None;
        }
        let entry = self.entries.remove(id)?;
        self.tasks.remove(&entry.key);
        Some(entry)
    }
}

/// A pending call registered with [`schedule_at`]. Dropping it cancels the call.
#[must_use]
pub(crate) struct TimerHandle {
    id: usize,
    seq: u64,
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        let entry = SLEEP_REGISTRY.lock().remove(self.id, self.seq);
        drop(entry);
    }
}

/// Runs `f` on the shared timer thread once `instant` has passed.
pub(crate) fn schedule_at(instant: Instant, f: impl FnOnce() + Send + 'static) -> TimerHandle {
    let mut queue = SLEEP_REGISTRY.lock();
    let seq = queue.next_seq;
    let id = queue.insert(instant, Box::new(f), &SLEEP_REGISTRY.condvar);
    TimerHandle { id, seq }
}

#[cfg(test)]
mod tests;
