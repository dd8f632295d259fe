use std::{
    any::Any,
    cell::{Ref, RefCell},
    rc::Rc,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, FixedOffset, Local};
use parse_display::Display;
use serde::{Deserialize, Serialize};

use crate::{
    core::{Domain, DomainState, NodeKey, NodeValue},
    error::OrFatal,
    observable::{impl_observable_node, NodeRef},
    utils::{
        short_type_name,
        timer::{schedule_at, TimerHandle},
    },
    Observable, Result,
};


/// Granularity at which a [`Clock`] advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Second,
    Minute,
    Hour,
    Day,
}

impl Resolution {
    /// Length of one unit.
    pub fn duration(self) -> Duration {
        match self {
            Resolution::Second => Duration::from_secs(1),
            Resolution::Minute => Duration::from_secs(60),
            Resolution::Hour => Duration::from_secs(60 * 60),
            Resolution::Day => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Time from `now` to the next boundary of this resolution.
    ///
    /// Boundaries are counted in UTC, or in the offset of `now` if `local` is set.
    /// Exactly on a boundary, the next one is a full unit away.
    pub fn until_next(self, now: DateTime<FixedOffset>, local: bool) -> Duration {
        let unit = self.duration().as_millis() as i64;
        let mut ms = now.timestamp_millis();
        if local {
            ms += i64::from(now.offset().local_minus_utc()) * 1000;
        }
        Duration::from_millis((unit - ms.rem_euclid(unit)) as u64)
    }
}

/// The current time, invalidated at every boundary of its [`Resolution`].
///
/// Clocks are shared: every lookup for the same resolution in the same domain returns
/// the same node, which lives until the domain stops.
#[derive(Clone)]
pub struct Clock {
    node: Arc<NodeRef>,
}

impl Clock {
    /// The clock of `domain` for `resolution`, with boundaries in UTC.
    pub fn try_by(domain: &Domain, resolution: Resolution) -> Result<Self> {
        Self::lookup(domain, resolution, false)
    }
    pub fn by(domain: &Domain, resolution: Resolution) -> Self {
        Self::try_by(domain, resolution).or_fatal()
    }

    /// A clock whose boundaries follow local time, e.g. local midnight for [`Resolution::Day`].
    pub fn try_by_local(domain: &Domain, resolution: Resolution) -> Result<Self> {
        Self::lookup(domain, resolution, true)
    }
    pub fn by_local(domain: &Domain, resolution: Resolution) -> Self {
        Self::try_by_local(domain, resolution).or_fatal()
    }

    pub fn resolution(&self) -> Resolution {
        self.clock_node().map(|node| node.resolution).or_fatal()
    }
    pub fn is_local(&self) -> bool {
        self.clock_node().map(|node| node.local).or_fatal()
    }

    fn lookup(domain: &Domain, resolution: Resolution, local: bool) -> Result<Self> {
        let state = domain.state()?;
        let cached = state.clocks().borrow().get(&(resolution, local)).cloned();
        if let Some(clock) = cached {
            if state.is_alive(clock.node.key()) {
                return Ok(clock);
            }
        }
        let node = Rc::new(ClockNode {
            value: RefCell::new(Local::now()),
            resolution,
            local,
            domain: domain.clone(),
            timer: RefCell::new(None),
        });
        let key = state.insert(node.clone());
        node.schedule(key);
        let clock = Clock {
            node: NodeRef::new(domain.clone(), key),
        };
        let old = state
            .clocks()
            .borrow_mut()
            .insert((resolution, local), clock.clone());
        drop(old);
        Ok(clock)
    }

    fn clock_node(&self) -> Result<Rc<ClockNode>> {
        let state = self.node.domain().state()?;
        state.node_value::<ClockNode>(self.node.key())
    }
}

impl_observable_node!(Clock);

impl Observable for Clock {
    type Value = DateTime<Local>;
}

struct ClockNode {
    value: RefCell<DateTime<Local>>,
    resolution: Resolution,
    local: bool,
    domain: Domain,
    timer: RefCell<Option<TimerHandle>>,
}

impl ClockNode {
    fn schedule(&self, key: NodeKey) {
        let delay = self
            .resolution
            .until_next(Local::now().fixed_offset(), self.local);
        let domain = self.domain.clone();
        let handle = schedule_at(Instant::now() + delay, move || {
            let owner = domain.clone();
            domain.enqueue(move || {
                if let Ok(state) = owner.state() {
                    state.mark_dirty(key);
                }
            });
        });
        let old = self.timer.replace(Some(handle));
        drop(old);
    }
}

impl NodeValue for ClockNode {
    fn recompute(&self, key: NodeKey, _state: &DomainState) -> bool {
        *self.value.borrow_mut() = Local::now();
        self.schedule(key);
        true
    }
    fn current(&self) -> Option<Ref<'_, dyn Any>> {
        Some(Ref::map(self.value.borrow(), |value| value as &dyn Any))
    }
    fn dispose(&self, _state: &DomainState) {
        let timer = self.timer.take();
        drop(timer);
    }
    fn type_name(&self) -> String {
        short_type_name::<Clock>()
    }
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}
