// SPDX-License-Identifier: Apache-2.0

//! The base channel: a rendezvous queue of `(value, ack)` pairs against
//! pending takers.
//!
//! `Channel<T>` is the single concrete handle type for the rendezvous queue. Transform
//! and buffer wrappers (see [`crate::transforms`], [`crate::buffers`]) hold their own
//! `Channel<T>` source and implement [`crate::ops::ChannelLike`] around it rather than
//! mutating this struct's fields in place, keeping every derived channel an explicit
//! wrapper type instead of an ad hoc extension of the base one.

use crate::error::ChannelError;
use crate::item::{AckFn, ChannelItem, TakeResult, TakerFn};
use crate::ops::{ChannelLike, MessageHandler, Takeable};
use crate::scheduler::{Scheduler, TickQueue};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

struct ChannelState<T> {
    ready: VecDeque<(ChannelItem<T>, AckFn<T>)>,
    waiters: VecDeque<TakerFn<T>>,
    filled: Option<T>,
}

impl<T> Default for ChannelState<T> {
    fn default() -> Self {
        Self {
            ready: VecDeque::new(),
            waiters: VecDeque::new(),
            filled: None,
        }
    }
}

struct ChannelInner<T> {
    state: RefCell<ChannelState<T>>,
    scheduler: Rc<TickQueue>,
    teardown: RefCell<Option<Box<dyn FnOnce()>>>,
}

/// A rendezvous queue of `(value, ack)` pairs against pending takers.
///
/// At every observable point at most one of the `ready` and `waiters` queues is
/// non-empty; [`Channel::backlog`] is `|ready| - |waiters|`.
pub struct Channel<T> {
    inner: Rc<ChannelInner<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("ptr", &Rc::as_ptr(&self.inner))
            .finish()
    }
}

impl<T: Clone + 'static> Channel<T> {
    /// Creates a new, empty channel driven by `scheduler`.
    pub fn new(scheduler: Rc<TickQueue>) -> Self {
        Self {
            inner: Rc::new(ChannelInner {
                state: RefCell::new(ChannelState::default()),
                scheduler,
                teardown: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn scheduler(&self) -> Rc<TickQueue> {
        self.inner.scheduler.clone()
    }

    /// Identity comparison between handles, used by `tap`/`fanout` to find a
    /// previously registered subscriber for disconnection.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Pops and discards the oldest parked value without acking its producer.
    ///
    /// Only meaningful on a channel whose puts already ack immediately (e.g.
    /// [`crate::buffers::ExpiringBuffer`]) — the discarded producer has nothing left
    /// to wait on, so its ack closure is simply dropped.
    pub(crate) fn pop_oldest_ready(&self) -> Option<ChannelItem<T>> {
        self.inner
            .state
            .borrow_mut()
            .ready
            .pop_front()
            .map(|(item, _ack)| item)
    }

    /// Takes the next value, or parks `cb` until one is available.
    ///
    /// `cb` fires exactly once, strictly after the current tick, either with the next
    /// produced value or with the channel's filled value if [`fill`](Self::fill) has run.
    pub fn take(&self, cb: TakerFn<T>) {
        let filled = self.inner.state.borrow().filled.clone();
        if let Some(v) = filled {
            self.inner
                .scheduler
                .defer(Box::new(move || cb(Ok(ChannelItem::Value(v)))));
            return;
        }

        let popped = self.inner.state.borrow_mut().ready.pop_front();
        match popped {
            Some((item, ack)) => {
                let item_for_ack = item.clone();
                self.inner
                    .scheduler
                    .defer(Box::new(move || ack(Ok(item_for_ack))));
                self.inner.scheduler.defer(Box::new(move || cb(Ok(item))));
            }
            None => self.inner.state.borrow_mut().waiters.push_back(cb),
        }
    }

    /// Produces `item`, or parks `(item, ack)` until a taker arrives.
    ///
    /// `ack` fires exactly once: with the produced value on delivery, or with
    /// [`ChannelError::Filled`] if the channel has been [`fill`](Self::fill)ed.
    pub fn put(&self, item: ChannelItem<T>, ack: AckFn<T>) {
        if self.inner.state.borrow().filled.is_some() {
            self.inner
                .scheduler
                .defer(Box::new(move || ack(Err(ChannelError::Filled))));
            return;
        }

        let popped = self.inner.state.borrow_mut().waiters.pop_front();
        match popped {
            Some(waiter) => {
                let item_for_waiter = item.clone();
                self.inner
                    .scheduler
                    .defer(Box::new(move || ack(Ok(item_for_waiter))));
                self.inner
                    .scheduler
                    .defer(Box::new(move || waiter(Ok(item))));
            }
            None => self.inner.state.borrow_mut().ready.push_back((item, ack)),
        }
    }

    /// Convenience for `put(ChannelItem::Value(v), ack)`.
    pub fn put_value(&self, v: T, ack: AckFn<T>) {
        self.put(ChannelItem::Value(v), ack);
    }

    /// Convenience for `put(ChannelItem::End, ack)`.
    pub fn put_end(&self, ack: AckFn<T>) {
        self.put(ChannelItem::End, ack);
    }

    /// Idempotent teardown hook. Runs and clears whatever cleanup has been registered by
    /// `fill`/derived wrappers' timers and tap subscriptions; a second call is a no-op.
    pub fn end(&self) {
        let hook = self.inner.teardown.borrow_mut().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Chains `extra` onto whatever teardown action is currently installed, running the
    /// previously-installed action first. Used by wrappers (tap, debounce, timers) to
    /// make sure `end()` releases every resource the wrapper chain has acquired.
    pub fn chain_teardown(&self, extra: impl FnOnce() + 'static) {
        let prev = self.inner.teardown.borrow_mut().take();
        let combined: Box<dyn FnOnce()> = Box::new(move || {
            if let Some(p) = prev {
                p();
            }
            extra();
        });
        *self.inner.teardown.borrow_mut() = Some(combined);
    }

    /// `|ready| - |waiters|`: positive means parked values, negative means parked takers.
    pub fn backlog(&self) -> isize {
        let state = self.inner.state.borrow();
        state.ready.len() as isize - state.waiters.len() as isize
    }

    /// `true` when a value is available and no taker is waiting.
    pub fn can_read(&self) -> bool {
        let state = self.inner.state.borrow();
        !state.ready.is_empty() && state.waiters.is_empty()
    }

    /// `true` when a taker is waiting, or the channel is empty (a put would rendezvous
    /// immediately rather than park behind existing backlog).
    pub fn can_write(&self) -> bool {
        let state = self.inner.state.borrow();
        !state.waiters.is_empty() || state.ready.is_empty()
    }

    /// Latches the channel to a constant source of `v`.
    ///
    /// Every future `take` yields `v`; every future `put` fails with
    /// [`ChannelError::Filled`]. Idempotent: a second call is ignored. Any takers already
    /// parked are resolved with `v` immediately (deferred to the next tick).
    pub fn fill(&self, v: T) {
        let waiters = {
            let mut state = self.inner.state.borrow_mut();
            if state.filled.is_some() {
                return;
            }
            if state.ready.len() as isize - state.waiters.len() as isize > 0 {
                tracing::warn!("fill() called with positive backlog; parked values will never be delivered");
            }
            state.filled = Some(v.clone());
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            let item = ChannelItem::Value(v.clone());
            self.inner
                .scheduler
                .defer(Box::new(move || waiter(Ok(item))));
        }
    }

    /// Installs a self-looping consumer: `f` is invoked with each take outcome, and the
    /// loop continues taking as long as `f` returns `true`.
    pub fn process<F>(&self, f: F)
    where
        F: FnMut(TakeResult<T>) -> bool + 'static,
    {
        Self::drive(self.clone(), Rc::new(RefCell::new(f)));
    }

    fn drive(ch: Channel<T>, f: Rc<RefCell<dyn FnMut(TakeResult<T>) -> bool>>) {
        let ch_for_cb = ch.clone();
        ch.take(Box::new(move |res| {
            let keep_going = (f.borrow_mut())(res);
            if keep_going {
                Channel::drive(ch_for_cb, f.clone());
            }
        }));
    }

    /// Installs a self-looping consumer that instantiates a fresh handler for every
    /// value taken from the channel, via `factory`, and dispatches the value to
    /// [`MessageHandler::handle`].
    ///
    /// `spawn` controls when the loop advances to the next `take`:
    /// - `true`: the loop re-takes immediately after dispatching, without waiting for
    ///   the handler to call its `done` continuation. Multiple handler instances can
    ///   be in flight concurrently (fire-and-forget).
    /// - `false`: the loop waits for `done` before re-taking, so at most one handler
    ///   instance is ever in flight (serialized processing).
    ///
    /// The loop stops, without instantiating a handler, on the end marker or a
    /// channel-protocol error.
    pub fn bind<H, F>(&self, factory: F, spawn: bool)
    where
        H: MessageHandler<T> + 'static,
        F: Fn() -> H + 'static,
    {
        Self::bind_drive(self.clone(), Rc::new(factory), spawn);
    }

    fn bind_drive<H, F>(ch: Channel<T>, factory: Rc<F>, spawn: bool)
    where
        H: MessageHandler<T> + 'static,
        F: Fn() -> H + 'static,
    {
        let ch_for_cb = ch.clone();
        ch.take(Box::new(move |res| {
            let value = match res {
                Ok(ChannelItem::Value(v)) => v,
                Ok(ChannelItem::End) | Err(_) => return,
            };
            let mut handler = factory();
            if spawn {
                Channel::bind_drive(ch_for_cb.clone(), factory.clone(), spawn);
                handler.handle(value, Box::new(|| {}));
            } else {
                let ch_for_done = ch_for_cb.clone();
                let factory_for_done = factory.clone();
                handler.handle(
                    value,
                    Box::new(move || {
                        Channel::bind_drive(ch_for_done, factory_for_done, spawn);
                    }),
                );
            }
        }));
    }

    /// Bridges a callback-style (node-style) producer into this channel: the returned
    /// function `put`s every `Ok` result it receives and drops channel-protocol errors
    /// (a callback-style producer has no queue to report send failures back into).
    pub fn receive(&self) -> AckFn<T> {
        let ch = self.clone();
        Box::new(move |result: TakeResult<T>| {
            if let Ok(item) = result {
                ch.put(item, Box::new(|_| {}));
            }
        })
    }

    /// Like [`receive`](Self::receive), but latches the channel with
    /// [`fill`](Self::fill) on the first value instead of enqueuing it.
    pub fn resolver(&self) -> AckFn<T> {
        let ch = self.clone();
        Box::new(move |result: TakeResult<T>| {
            if let Ok(ChannelItem::Value(v)) = result {
                ch.fill(v);
            }
        })
    }

    /// Sequentially `put`s every element of `items`, awaiting each ack before producing
    /// the next, then invokes `ack` with the full vector once all elements have been
    /// consumed.
    pub fn stream(&self, items: Vec<T>, ack: AckFn<Vec<T>>) {
        fn step<T: Clone + 'static>(ch: Channel<T>, mut items: std::vec::IntoIter<T>, all: Vec<T>, ack: AckFn<Vec<T>>) {
            match items.next() {
                Some(v) => {
                    let ch_for_next = ch.clone();
                    ch.put_value(
                        v,
                        Box::new(move |_| step(ch_for_next, items, all, ack)),
                    );
                }
                None => ack(Ok(ChannelItem::Value(all))),
            }
        }
        let all = items.clone();
        step(self.clone(), items.into_iter(), all, ack);
    }
}

impl<T: Clone + 'static> Takeable<T> for Channel<T> {
    fn take(&self, cb: TakerFn<T>) {
        Channel::take(self, cb)
    }
}

impl<T: Clone + 'static> ChannelLike<T> for Channel<T> {
    fn put(&self, item: ChannelItem<T>, ack: AckFn<T>) {
        Channel::put(self, item, ack)
    }

    fn end(&self) {
        Channel::end(self)
    }

    fn backlog(&self) -> isize {
        Channel::backlog(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    fn setup<T: Clone + 'static>() -> (Rc<TickQueue>, Channel<T>) {
        let tq = TickQueue::new();
        let ch = Channel::new(tq.clone());
        (tq, ch)
    }

    #[test]
    fn rendezvous_take_then_put() {
        let (tq, ch) = setup::<i32>();
        let received = Rc::new(StdRefCell::new(None));
        let r = received.clone();
        ch.take(Box::new(move |res| *r.borrow_mut() = Some(res)));
        ch.put_value(7, Box::new(|_| {}));
        tq.run_until_idle();
        assert_eq!(*received.borrow(), Some(Ok(ChannelItem::Value(7))));
    }

    #[test]
    fn put_before_take_parks_then_delivers() {
        let (tq, ch) = setup::<i32>();
        let acked = Rc::new(StdRefCell::new(false));
        let a = acked.clone();
        ch.put_value(
            1,
            Box::new(move |res| {
                assert_eq!(res, Ok(ChannelItem::Value(1)));
                *a.borrow_mut() = true;
            }),
        );
        assert!(!*acked.borrow());
        assert_eq!(ch.backlog(), 1);
        assert!(ch.can_read());

        let received = Rc::new(StdRefCell::new(None));
        let r = received.clone();
        ch.take(Box::new(move |res| *r.borrow_mut() = Some(res)));
        tq.run_until_idle();
        assert!(*acked.borrow());
        assert_eq!(*received.borrow(), Some(Ok(ChannelItem::Value(1))));
        assert_eq!(ch.backlog(), 0);
    }

    #[test]
    fn fill_latches_constant_value() {
        let (tq, ch) = setup::<i32>();
        ch.fill(42);

        let out = Rc::new(StdRefCell::new(None));
        let o = out.clone();
        ch.take(Box::new(move |res| *o.borrow_mut() = Some(res)));
        tq.run_until_idle();
        assert_eq!(*out.borrow(), Some(Ok(ChannelItem::Value(42))));

        let put_err = Rc::new(StdRefCell::new(None));
        let p = put_err.clone();
        ch.put_value(1, Box::new(move |res| *p.borrow_mut() = Some(res)));
        tq.run_until_idle();
        assert_eq!(*put_err.borrow(), Some(Err(ChannelError::Filled)));
    }

    #[test]
    fn end_runs_teardown_exactly_once() {
        let (_tq, ch) = setup::<i32>();
        let count = Rc::new(StdRefCell::new(0));
        let c1 = count.clone();
        ch.chain_teardown(move || *c1.borrow_mut() += 1);
        ch.end();
        ch.end();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn stream_then_take_n_yields_all_elements() {
        let (tq, ch) = setup::<i32>();
        let ack_result = Rc::new(StdRefCell::new(None));
        let a = ack_result.clone();
        ch.stream(vec![1, 2, 3], Box::new(move |res| *a.borrow_mut() = Some(res)));

        let received = Rc::new(StdRefCell::new(Vec::new()));
        for _ in 0..3 {
            let r = received.clone();
            ch.take(Box::new(move |res| {
                if let Ok(ChannelItem::Value(v)) = res {
                    r.borrow_mut().push(v);
                }
            }));
        }
        tq.run_until_idle();
        assert_eq!(*received.borrow(), vec![1, 2, 3]);
        assert_eq!(*ack_result.borrow(), Some(Ok(ChannelItem::Value(vec![1, 2, 3]))));
    }

    struct RecordingHandler {
        log: Rc<StdRefCell<Vec<i32>>>,
    }

    impl MessageHandler<i32> for RecordingHandler {
        fn handle(&mut self, value: i32, done: crate::ops::DoneFn) {
            self.log.borrow_mut().push(value);
            done();
        }
    }

    #[test]
    fn bind_spawn_false_instantiates_one_handler_per_message_serialized() {
        let (tq, ch) = setup::<i32>();
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let log_for_factory = log.clone();
        ch.bind(move || RecordingHandler { log: log_for_factory.clone() }, false);

        ch.put_value(1, Box::new(|_| {}));
        ch.put_value(2, Box::new(|_| {}));
        ch.put_value(3, Box::new(|_| {}));
        tq.run_until_idle();
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn bind_spawn_true_advances_loop_without_waiting_on_done() {
        let (tq, ch) = setup::<i32>();
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let pending_done: Rc<StdRefCell<Vec<crate::ops::DoneFn>>> =
            Rc::new(StdRefCell::new(Vec::new()));

        struct StallingHandler {
            log: Rc<StdRefCell<Vec<i32>>>,
            pending: Rc<StdRefCell<Vec<crate::ops::DoneFn>>>,
        }
        impl MessageHandler<i32> for StallingHandler {
            fn handle(&mut self, value: i32, done: crate::ops::DoneFn) {
                self.log.borrow_mut().push(value);
                self.pending.borrow_mut().push(done);
            }
        }

        let log_for_factory = log.clone();
        let pending_for_factory = pending_done.clone();
        ch.bind(
            move || StallingHandler {
                log: log_for_factory.clone(),
                pending: pending_for_factory.clone(),
            },
            true,
        );

        ch.put_value(1, Box::new(|_| {}));
        ch.put_value(2, Box::new(|_| {}));
        tq.run_until_idle();
        assert_eq!(*log.borrow(), vec![1, 2]);
        assert_eq!(pending_done.borrow().len(), 2);
    }
}
