// SPDX-License-Identifier: Apache-2.0

//! The deferred-dispatch primitive: "run on next tick" scheduling of a
//! zero-argument continuation. This is the only concurrency primitive the rest of the
//! crate uses; every taker/ack callback is invoked through a [`Scheduler`] unless the
//! call site is explicitly documented as synchronous.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A zero-argument continuation deferred by [`Scheduler::defer`].
pub type Continuation = Box<dyn FnOnce()>;

/// Schedules continuations to run after the current call stack unwinds.
///
/// Implementations must preserve FIFO order among continuations deferred within the
/// same flush: if `a` is deferred before `b`, `a` runs before `b`, even if running `a`
/// defers further continuations of its own.
pub trait Scheduler {
    /// Schedules `cont` to run on a later tick.
    fn defer(&self, cont: Continuation);
}

/// A single-threaded FIFO tick queue.
///
/// [`TickQueue::run_until_idle`] drains the queue to completion, including continuations
/// that are deferred by continuations already running — the same run-to-completion
/// semantics a microtask checkpoint has in a real single-threaded event loop.
#[derive(Default)]
pub struct TickQueue {
    queue: RefCell<VecDeque<Continuation>>,
}

impl TickQueue {
    /// Creates an empty tick queue.
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Runs a single pending continuation, if any. Returns `true` if one ran.
    ///
    /// Useful for tests that assert ordering one step at a time instead of flushing
    /// everything with [`run_until_idle`](Self::run_until_idle).
    pub fn run_one(&self) -> bool {
        let next = self.queue.borrow_mut().pop_front();
        match next {
            Some(cont) => {
                cont();
                true
            }
            None => false,
        }
    }

    /// Drains the queue until no continuations remain pending.
    pub fn run_until_idle(&self) {
        while self.run_one() {}
    }

    /// Number of continuations currently pending.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl Scheduler for TickQueue {
    fn defer(&self, cont: Continuation) {
        self.queue.borrow_mut().push_back(cont);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn fifo_order_within_a_tick() {
        let tq = TickQueue::new();
        let log = Rc::new(StdRefCell::new(Vec::new()));

        let l1 = log.clone();
        tq.defer(Box::new(move || l1.borrow_mut().push(1)));
        let l2 = log.clone();
        tq.defer(Box::new(move || l2.borrow_mut().push(2)));
        let l3 = log.clone();
        tq.defer(Box::new(move || l3.borrow_mut().push(3)));

        tq.run_until_idle();
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn continuations_deferred_during_a_flush_still_run_fifo() {
        let tq = TickQueue::new();
        let log = Rc::new(StdRefCell::new(Vec::new()));

        let tq_clone = tq.clone();
        let l1 = log.clone();
        tq.defer(Box::new(move || {
            l1.borrow_mut().push(1);
            let l1b = l1.clone();
            tq_clone.defer(Box::new(move || l1b.borrow_mut().push(3)));
        }));
        let l2 = log.clone();
        tq.defer(Box::new(move || l2.borrow_mut().push(2)));

        tq.run_until_idle();
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn run_one_steps_a_single_continuation() {
        let tq = TickQueue::new();
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let l1 = log.clone();
        tq.defer(Box::new(move || l1.borrow_mut().push(1)));

        assert_eq!(tq.pending(), 1);
        assert!(tq.run_one());
        assert_eq!(*log.borrow(), vec![1]);
        assert!(!tq.run_one());
    }
}
