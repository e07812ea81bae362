// SPDX-License-Identifier: Apache-2.0

//! Buffering and shaping wrappers: `buffer`, `dropping_buffer`,
//! `expiring_buffer`, `bucket`, `debounce`, `tap` and `fanout`.
//!
//! Each wraps an inner [`Channel`] that still does the actual rendezvous bookkeeping;
//! what changes is how eagerly `put` acks its caller and, for `bucket`, how `take` is
//! gated.

use crate::base::Channel;
use crate::item::{AckFn, ChannelItem, TakerFn};
use crate::ops::{ChannelLike, Takeable};
use crate::timers::{Clock, TimerId};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

fn discard_ack<T>() -> AckFn<T> {
    Box::new(|_| {})
}

/// `buffer(n)`: accepts up to `n` values without blocking the producer; once full,
/// behaves exactly like the base channel (the producer's ack waits for a taker).
pub struct Buffer<T> {
    inner: Channel<T>,
    capacity: usize,
}

impl<T: Clone + 'static> Buffer<T> {
    /// Wraps `inner` with room for `capacity` values ahead of any taker.
    pub fn new(inner: Channel<T>, capacity: usize) -> Self {
        Self { inner, capacity }
    }
}

impl<T: Clone + 'static> Takeable<T> for Buffer<T> {
    fn take(&self, cb: TakerFn<T>) {
        // The inner channel's own ready/waiters rendezvous already releases a parked
        // producer's ack exactly when its value is taken, which is all `take` needs to
        // do here regardless of how full the buffer currently is.
        self.inner.take(cb);
    }
}

impl<T: Clone + 'static> ChannelLike<T> for Buffer<T> {
    fn put(&self, item: ChannelItem<T>, ack: AckFn<T>) {
        if self.inner.backlog() < self.capacity as isize {
            let item_for_ack = item.clone();
            self.inner.put(item, discard_ack());
            self.inner
                .scheduler()
                .defer(Box::new(move || ack(Ok(item_for_ack))));
        } else {
            self.inner.put(item, ack);
        }
    }

    fn end(&self) {
        self.inner.end();
    }

    fn backlog(&self) -> isize {
        self.inner.backlog()
    }
}

/// `dropping_buffer(n)`: like [`Buffer`], but once full a `put` is silently discarded
/// instead of blocking the producer.
///
/// The discarded-value ack reuses `Ok(ChannelItem::End)` as the "accepted, but
/// dropped" marker rather than introducing a second ack payload type that would break
/// the uniform [`ChannelLike`] surface — a caller distinguishing "delivered" from
/// "dropped" already has to match on the ack's `ChannelItem`, and a synthetic `End`
/// here never reaches this buffer's own takers, only the producer that was dropped.
pub struct DroppingBuffer<T> {
    inner: Channel<T>,
    capacity: usize,
}

impl<T: Clone + 'static> DroppingBuffer<T> {
    /// Wraps `inner`, dropping puts once `capacity` values are already queued.
    pub fn new(inner: Channel<T>, capacity: usize) -> Self {
        Self { inner, capacity }
    }
}

impl<T: Clone + 'static> Takeable<T> for DroppingBuffer<T> {
    fn take(&self, cb: TakerFn<T>) {
        self.inner.take(cb);
    }
}

impl<T: Clone + 'static> ChannelLike<T> for DroppingBuffer<T> {
    fn put(&self, item: ChannelItem<T>, ack: AckFn<T>) {
        if self.inner.backlog() < self.capacity as isize {
            let item_for_ack = item.clone();
            self.inner.put(item, discard_ack());
            self.inner
                .scheduler()
                .defer(Box::new(move || ack(Ok(item_for_ack))));
        } else {
            self.inner
                .scheduler()
                .defer(Box::new(move || ack(Ok(ChannelItem::End))));
        }
    }

    fn end(&self) {
        self.inner.end();
    }

    fn backlog(&self) -> isize {
        self.inner.backlog()
    }
}

/// `expiring_buffer(n)`: never blocks the producer. Once full, the oldest queued
/// value is discarded to make room for the new one.
pub struct ExpiringBuffer<T> {
    inner: Channel<T>,
    capacity: usize,
}

impl<T: Clone + 'static> ExpiringBuffer<T> {
    /// Wraps `inner`, evicting the oldest value once `capacity` is reached.
    pub fn new(inner: Channel<T>, capacity: usize) -> Self {
        Self { inner, capacity }
    }
}

impl<T: Clone + 'static> Takeable<T> for ExpiringBuffer<T> {
    fn take(&self, cb: TakerFn<T>) {
        self.inner.take(cb);
    }
}

impl<T: Clone + 'static> ChannelLike<T> for ExpiringBuffer<T> {
    fn put(&self, item: ChannelItem<T>, ack: AckFn<T>) {
        while self.inner.backlog() >= self.capacity as isize {
            if self.inner.pop_oldest_ready().is_none() {
                break;
            }
        }
        let item_for_ack = item.clone();
        self.inner.put(item, discard_ack());
        self.inner
            .scheduler()
            .defer(Box::new(move || ack(Ok(item_for_ack))));
    }

    fn end(&self) {
        self.inner.end();
    }

    fn backlog(&self) -> isize {
        self.inner.backlog()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    WaitingTillFull,
    Draining,
}

/// `bucket(full, low)`: a buffered channel that parks takers in a local suspended
/// list until enough values have accumulated (`backlog > full`), then drains them
/// until `backlog <= low`, at which point it goes back to accumulating.
///
/// Guarantees a bursty producer is read in decent-sized batches rather than a taker
/// racing each value as it trickles in.
pub struct Bucket<T> {
    inner: Channel<T>,
    full: usize,
    low: usize,
    phase: Rc<RefCell<Phase>>,
    suspended: Rc<RefCell<VecDeque<TakerFn<T>>>>,
}

impl<T: Clone + 'static> Bucket<T> {
    /// Wraps `inner` with the given fill/drain thresholds.
    pub fn new(inner: Channel<T>, full: usize, low: usize) -> Self {
        Self {
            inner,
            full,
            low,
            phase: Rc::new(RefCell::new(Phase::WaitingTillFull)),
            suspended: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    fn drain_step(
        inner: Channel<T>,
        phase: Rc<RefCell<Phase>>,
        suspended: Rc<RefCell<VecDeque<TakerFn<T>>>>,
        low: usize,
    ) {
        let next = if *phase.borrow() == Phase::Draining {
            suspended.borrow_mut().pop_front()
        } else {
            None
        };
        let Some(cb) = next else { return };
        let inner_for_next = inner.clone();
        let phase_for_next = phase.clone();
        let suspended_for_next = suspended.clone();
        inner.take(Box::new(move |res| {
            cb(res);
            if inner_for_next.backlog() <= low as isize {
                *phase_for_next.borrow_mut() = Phase::WaitingTillFull;
            }
            Bucket::drain_step(inner_for_next, phase_for_next, suspended_for_next, low);
        }));
    }
}

impl<T: Clone + 'static> Takeable<T> for Bucket<T> {
    fn take(&self, cb: TakerFn<T>) {
        if *self.phase.borrow() == Phase::WaitingTillFull {
            self.suspended.borrow_mut().push_back(cb);
            return;
        }
        let inner = self.inner.clone();
        let phase = self.phase.clone();
        let low = self.low;
        self.inner.take(Box::new(move |res| {
            cb(res);
            if inner.backlog() <= low as isize {
                *phase.borrow_mut() = Phase::WaitingTillFull;
            }
        }));
    }
}

impl<T: Clone + 'static> ChannelLike<T> for Bucket<T> {
    fn put(&self, item: ChannelItem<T>, ack: AckFn<T>) {
        let item_for_ack = item.clone();
        self.inner.put(item, discard_ack());
        self.inner
            .scheduler()
            .defer(Box::new(move || ack(Ok(item_for_ack))));

        if *self.phase.borrow() == Phase::WaitingTillFull
            && self.inner.backlog() > self.full as isize
        {
            *self.phase.borrow_mut() = Phase::Draining;
            Bucket::drain_step(
                self.inner.clone(),
                self.phase.clone(),
                self.suspended.clone(),
                self.low,
            );
        }
    }

    fn end(&self) {
        self.inner.end();
    }

    fn backlog(&self) -> isize {
        self.inner.backlog()
    }
}

/// `debounce(duration)`: a `put` is delayed by `duration` before reaching the inner
/// channel; a further `put` arriving inside that window cancels and replaces the
/// pending one, so only the last value of a quiescent burst is ever delivered.
pub struct Debounce<T, C> {
    inner: Channel<T>,
    clock: Rc<C>,
    duration: Duration,
    pending: RefCell<Option<TimerId>>,
}

impl<T: Clone + 'static, C: Clock + 'static> Debounce<T, C> {
    /// Wraps `inner`, debouncing puts by `duration` using `clock`.
    pub fn new(inner: Channel<T>, clock: Rc<C>, duration: Duration) -> Self {
        Self {
            inner,
            clock,
            duration,
            pending: RefCell::new(None),
        }
    }
}

impl<T: Clone + 'static, C: Clock + 'static> Takeable<T> for Debounce<T, C> {
    fn take(&self, cb: TakerFn<T>) {
        self.inner.take(cb);
    }
}

impl<T: Clone + 'static, C: Clock + 'static> ChannelLike<T> for Debounce<T, C> {
    fn put(&self, item: ChannelItem<T>, ack: AckFn<T>) {
        if let Some(old) = self.pending.borrow_mut().take() {
            self.clock.cancel(old);
        }
        let inner = self.inner.clone();
        let duration = self.duration;
        let id = self.clock.after(
            duration,
            Box::new(move || {
                inner.put(item, ack);
            }),
        );
        *self.pending.borrow_mut() = Some(id);
    }

    fn end(&self) {
        if let Some(old) = self.pending.borrow_mut().take() {
            self.clock.cancel(old);
        }
        self.inner.end();
    }

    fn backlog(&self) -> isize {
        self.inner.backlog()
    }
}

/// Explicit, latched fan-out over a source channel's values. Unlike [`Tap`], no
/// internal `take` loop starts until [`Fanout::start`] is called, so values
/// accumulate on the source in the meantime instead of being silently observed.
pub struct Fanout<T> {
    source: Channel<T>,
    subscribers: Rc<RefCell<Vec<Channel<T>>>>,
    started: Rc<RefCell<bool>>,
}

impl<T: Clone + 'static> Fanout<T> {
    /// Builds a fanout over `source`; distribution does not begin until [`start`](Self::start).
    pub fn new(source: Channel<T>) -> Self {
        Self {
            source,
            subscribers: Rc::new(RefCell::new(Vec::new())),
            started: Rc::new(RefCell::new(false)),
        }
    }

    /// Registers `chan` to receive every future value.
    pub fn connect(&self, chan: Channel<T>) {
        self.subscribers.borrow_mut().push(chan);
    }

    /// Deregisters a previously connected channel.
    pub fn disconnect(&self, chan: &Channel<T>) {
        self.subscribers.borrow_mut().retain(|c| !c.ptr_eq(chan));
    }

    /// Begins taking from the source and copying each result to every connected
    /// subscriber. Idempotent.
    pub fn start(&self) {
        if *self.started.borrow() {
            return;
        }
        *self.started.borrow_mut() = true;
        Self::drive(self.source.clone(), self.subscribers.clone());
    }

    fn drive(source: Channel<T>, subscribers: Rc<RefCell<Vec<Channel<T>>>>) {
        let source_for_next = source.clone();
        let subs_for_next = subscribers.clone();
        source.take(Box::new(move |res| match res {
            Ok(ChannelItem::Value(v)) => {
                for sub in subs_for_next.borrow().iter() {
                    sub.put_value(v.clone(), discard_ack());
                }
                Self::drive(source_for_next, subs_for_next);
            }
            Ok(ChannelItem::End) => {
                for sub in subs_for_next.borrow().iter() {
                    sub.put_end(discard_ack());
                }
            }
            Err(err) => {
                tracing::warn!(%err, "fanout source errored; stopping distribution");
            }
        }));
    }
}

/// `tap`: a put-side fan-out. Every value offered to the wrapped channel is mirrored
/// to each attached tap *before* the base channel sees it; the base only actually
/// receives (and parks) the value when a real taker is already waiting, so values
/// consumed only by taps never pile up unread in the base channel.
pub struct Tap<T> {
    base: Channel<T>,
    taps: Rc<RefCell<Vec<Channel<T>>>>,
}

impl<T: Clone + 'static> Tap<T> {
    /// Wraps `base`, initially with no taps attached.
    pub fn new(base: Channel<T>) -> Self {
        Self {
            base,
            taps: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Attaches `tap` to receive a copy of every value. `tap.end()` later detaches it.
    pub fn add_tap(&self, tap: Channel<T>) {
        self.taps.borrow_mut().push(tap.clone());
        let taps = self.taps.clone();
        let tap_for_detach = tap.clone();
        tap.chain_teardown(move || {
            taps.borrow_mut().retain(|c| !c.ptr_eq(&tap_for_detach));
        });
    }
}

impl<T: Clone + 'static> Takeable<T> for Tap<T> {
    fn take(&self, cb: TakerFn<T>) {
        self.base.take(cb);
    }
}

impl<T: Clone + 'static> ChannelLike<T> for Tap<T> {
    fn put(&self, item: ChannelItem<T>, ack: AckFn<T>) {
        match item {
            ChannelItem::Value(v) => {
                for tap in self.taps.borrow().iter() {
                    tap.put_value(v.clone(), discard_ack());
                }
                if self.base.backlog() < 0 {
                    self.base.put_value(v, ack);
                } else {
                    let item_for_ack = ChannelItem::Value(v);
                    self.base
                        .scheduler()
                        .defer(Box::new(move || ack(Ok(item_for_ack))));
                }
            }
            ChannelItem::End => {
                let taps = std::mem::take(&mut *self.taps.borrow_mut());
                for tap in &taps {
                    tap.put_end(discard_ack());
                    tap.end();
                }
                self.base.put(ChannelItem::End, ack);
            }
        }
    }

    fn end(&self) {
        self.base.end();
    }

    fn backlog(&self) -> isize {
        self.base.backlog()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TickQueue;
    use crate::timers::ManualClock;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn buffer_acks_immediately_under_capacity() {
        let tq = TickQueue::new();
        let inner = Channel::new(tq.clone());
        let buf = Buffer::new(inner, 2);

        let acked = Rc::new(StdRefCell::new(false));
        let a = acked.clone();
        buf.put(ChannelItem::Value(1), Box::new(move |_| *a.borrow_mut() = true));
        tq.run_until_idle();
        assert!(*acked.borrow());
        assert_eq!(buf.backlog(), 1);
    }

    #[test]
    fn buffer_blocks_once_full() {
        let tq = TickQueue::new();
        let inner = Channel::new(tq.clone());
        let buf = Buffer::new(inner, 1);

        buf.put(ChannelItem::Value(1), discard_ack());
        tq.run_until_idle();
        assert_eq!(buf.backlog(), 1);

        let acked = Rc::new(StdRefCell::new(false));
        let a = acked.clone();
        buf.put(ChannelItem::Value(2), Box::new(move |_| *a.borrow_mut() = true));
        tq.run_until_idle();
        assert!(!*acked.borrow(), "producer must await a taker once full");

        let out = Rc::new(StdRefCell::new(None));
        let o = out.clone();
        buf.take(Box::new(move |res| *o.borrow_mut() = Some(res)));
        tq.run_until_idle();
        assert_eq!(*out.borrow(), Some(Ok(ChannelItem::Value(1))));

        let out2 = Rc::new(StdRefCell::new(None));
        let o2 = out2.clone();
        buf.take(Box::new(move |res| *o2.borrow_mut() = Some(res)));
        tq.run_until_idle();
        assert_eq!(*out2.borrow(), Some(Ok(ChannelItem::Value(2))));
        assert!(*acked.borrow());
    }

    #[test]
    fn dropping_buffer_discards_when_full() {
        let tq = TickQueue::new();
        let inner = Channel::new(tq.clone());
        let buf = DroppingBuffer::new(inner, 1);

        buf.put(ChannelItem::Value(1), discard_ack());
        tq.run_until_idle();

        let dropped = Rc::new(StdRefCell::new(None));
        let d = dropped.clone();
        buf.put(ChannelItem::Value(2), Box::new(move |res| *d.borrow_mut() = Some(res)));
        tq.run_until_idle();
        assert_eq!(*dropped.borrow(), Some(Ok(ChannelItem::End)));
        assert_eq!(buf.backlog(), 1);
    }

    #[test]
    fn expiring_buffer_evicts_oldest() {
        let tq = TickQueue::new();
        let inner = Channel::new(tq.clone());
        let buf = ExpiringBuffer::new(inner, 1);

        buf.put(ChannelItem::Value(1), discard_ack());
        buf.put(ChannelItem::Value(2), discard_ack());
        tq.run_until_idle();
        assert_eq!(buf.backlog(), 1);

        let out = Rc::new(StdRefCell::new(None));
        let o = out.clone();
        buf.take(Box::new(move |res| *o.borrow_mut() = Some(res)));
        tq.run_until_idle();
        assert_eq!(*out.borrow(), Some(Ok(ChannelItem::Value(2))));
    }

    #[test]
    fn debounce_delivers_only_the_last_value_of_a_burst() {
        let tq = TickQueue::new();
        let inner = Channel::new(tq.clone());
        let clock = Rc::new(ManualClock::new(tq.clone()));
        let deb = Debounce::new(inner, clock.clone(), Duration::from_millis(50));

        deb.put(ChannelItem::Value(1), discard_ack());
        deb.put(ChannelItem::Value(2), discard_ack());

        let out = Rc::new(StdRefCell::new(None));
        let o = out.clone();
        deb.take(Box::new(move |res| *o.borrow_mut() = Some(res)));

        clock.advance(Duration::from_millis(60));
        tq.run_until_idle();
        assert_eq!(*out.borrow(), Some(Ok(ChannelItem::Value(2))));
    }

    #[test]
    fn fanout_copies_each_value_to_every_subscriber_after_start() {
        let tq = TickQueue::new();
        let source = Channel::new(tq.clone());
        let fanout = Fanout::new(source.clone());
        let sub_a = Channel::new(tq.clone());
        let sub_b = Channel::new(tq.clone());
        fanout.connect(sub_a.clone());
        fanout.connect(sub_b.clone());

        source.put_value(9, discard_ack());
        fanout.start();
        tq.run_until_idle();

        let out_a = Rc::new(StdRefCell::new(None));
        let a = out_a.clone();
        sub_a.take(Box::new(move |res| *a.borrow_mut() = Some(res)));
        let out_b = Rc::new(StdRefCell::new(None));
        let b = out_b.clone();
        sub_b.take(Box::new(move |res| *b.borrow_mut() = Some(res)));
        tq.run_until_idle();

        assert_eq!(*out_a.borrow(), Some(Ok(ChannelItem::Value(9))));
        assert_eq!(*out_b.borrow(), Some(Ok(ChannelItem::Value(9))));
    }

    #[test]
    fn tap_mirrors_values_without_blocking_when_base_has_no_taker() {
        let tq = TickQueue::new();
        let base = Channel::new(tq.clone());
        let tap_wrapper = Tap::new(base.clone());
        let observer = Channel::new(tq.clone());
        tap_wrapper.add_tap(observer.clone());

        let acked = Rc::new(StdRefCell::new(false));
        let a = acked.clone();
        tap_wrapper.put(ChannelItem::Value(5), Box::new(move |_| *a.borrow_mut() = true));
        tq.run_until_idle();
        assert!(*acked.borrow());
        assert_eq!(base.backlog(), 0, "base should not accumulate tap-only values");

        let observed = Rc::new(StdRefCell::new(None));
        let o = observed.clone();
        observer.take(Box::new(move |res| *o.borrow_mut() = Some(res)));
        tq.run_until_idle();
        assert_eq!(*observed.borrow(), Some(Ok(ChannelItem::Value(5))));
    }
}
