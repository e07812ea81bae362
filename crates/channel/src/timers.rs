// SPDX-License-Identifier: Apache-2.0

//! Real-time sourcing for `timeout`, `debounce` and `clock`.
//!
//! The deferred-dispatch queue in [`crate::scheduler`] only orders continuations that
//! are *already* runnable; it has no notion of wall-clock time. Timers need an external
//! wake-up. [`Clock`] is that seam: the production implementation rides `tokio::time`
//! on a single-threaded, current-thread executor (so no OS thread parallelism is
//! introduced), while [`ManualClock`] lets the crate's own tests advance time
//! deterministically.

use crate::scheduler::{Continuation, Scheduler, TickQueue};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

/// Identifies a scheduled, cancellable timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// A source of delayed continuations.
pub trait Clock {
    /// Schedules `cb` to be deferred onto the owning channel's scheduler after `dur`.
    fn after(&self, dur: Duration, cb: Continuation) -> TimerId;

    /// Cancels a previously scheduled timer, if it has not already fired.
    fn cancel(&self, id: TimerId);
}

/// Production [`Clock`] backed by `tokio::time`, requiring a current-thread Tokio runtime
/// with an active [`tokio::task::LocalSet`] (the same requirement the crate's test helpers
/// already carry for driving `!Send` futures).
pub struct TokioClock {
    scheduler: Rc<TickQueue>,
    next_id: RefCell<u64>,
    handles: Rc<RefCell<HashMap<TimerId, tokio::task::JoinHandle<()>>>>,
}

impl TokioClock {
    /// Builds a clock that defers fired timers onto `scheduler`.
    pub fn new(scheduler: Rc<TickQueue>) -> Self {
        Self {
            scheduler,
            next_id: RefCell::new(0),
            handles: Rc::new(RefCell::new(HashMap::new())),
        }
    }
}

impl Clock for TokioClock {
    fn after(&self, dur: Duration, cb: Continuation) -> TimerId {
        let id = {
            let mut next = self.next_id.borrow_mut();
            let id = TimerId(*next);
            *next += 1;
            id
        };
        let scheduler = self.scheduler.clone();
        let handles = self.handles.clone();
        let join = tokio::task::spawn_local(async move {
            tokio::time::sleep(dur).await;
            handles.borrow_mut().remove(&id);
            scheduler.defer(cb);
        });
        let _ = self.handles.borrow_mut().insert(id, join);
        id
    }

    fn cancel(&self, id: TimerId) {
        if let Some(handle) = self.handles.borrow_mut().remove(&id) {
            handle.abort();
        }
    }
}

struct PendingTimer {
    deadline: Duration,
    cb: Option<Continuation>,
}

/// Deterministic [`Clock`] for tests: time only advances when [`ManualClock::advance`]
/// is called, and firing a timer defers its continuation onto the scheduler exactly as
/// the production clock does.
pub struct ManualClock {
    scheduler: Rc<TickQueue>,
    now: RefCell<Duration>,
    pending: RefCell<HashMap<TimerId, PendingTimer>>,
    next_id: RefCell<u64>,
}

impl ManualClock {
    /// Builds a manual clock starting at time zero.
    pub fn new(scheduler: Rc<TickQueue>) -> Self {
        Self {
            scheduler,
            now: RefCell::new(Duration::ZERO),
            pending: RefCell::new(HashMap::new()),
            next_id: RefCell::new(0),
        }
    }

    /// Advances the clock by `dur`, deferring every timer whose deadline has been
    /// reached. Firing order matches deadline order, ties broken by registration order.
    pub fn advance(&self, dur: Duration) {
        let new_now = *self.now.borrow() + dur;
        *self.now.borrow_mut() = new_now;

        let mut due: Vec<(TimerId, Duration)> = self
            .pending
            .borrow()
            .iter()
            .filter(|(_, t)| t.deadline <= new_now)
            .map(|(id, t)| (*id, t.deadline))
            .collect();
        due.sort_by_key(|(id, deadline)| (*deadline, id.0));

        for (id, _) in due {
            if let Some(mut timer) = self.pending.borrow_mut().remove(&id) {
                if let Some(cb) = timer.cb.take() {
                    self.scheduler.defer(cb);
                }
            }
        }
    }
}

impl Clock for ManualClock {
    fn after(&self, dur: Duration, cb: Continuation) -> TimerId {
        let id = {
            let mut next = self.next_id.borrow_mut();
            let id = TimerId(*next);
            *next += 1;
            id
        };
        let deadline = *self.now.borrow() + dur;
        let _ = self.pending.borrow_mut().insert(
            id,
            PendingTimer {
                deadline,
                cb: Some(cb),
            },
        );
        id
    }

    fn cancel(&self, id: TimerId) {
        let _ = self.pending.borrow_mut().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn manual_clock_fires_in_deadline_order() {
        let tq = TickQueue::new();
        let clock = ManualClock::new(tq.clone());
        let log = Rc::new(StdRefCell::new(Vec::new()));

        let l1 = log.clone();
        let _ = clock.after(Duration::from_millis(20), Box::new(move || l1.borrow_mut().push(20)));
        let l2 = log.clone();
        let _ = clock.after(Duration::from_millis(10), Box::new(move || l2.borrow_mut().push(10)));

        clock.advance(Duration::from_millis(25));
        tq.run_until_idle();
        assert_eq!(*log.borrow(), vec![10, 20]);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let tq = TickQueue::new();
        let clock = ManualClock::new(tq.clone());
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let l1 = log.clone();
        let id = clock.after(Duration::from_millis(5), Box::new(move || l1.borrow_mut().push(())));
        clock.cancel(id);
        clock.advance(Duration::from_millis(10));
        tq.run_until_idle();
        assert!(log.borrow().is_empty());
    }
}
