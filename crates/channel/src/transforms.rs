// SPDX-License-Identifier: Apache-2.0

//! Take-only derivations: `map`, `filter`, `reduce`, `group`, `until`,
//! plus the standalone `timeout`/`take_n`/`take_some` helpers.
//!
//! Each of these changes what a taker sees without exposing a `put` of its own (`until`
//! is the one exception — it still delegates `put` straight through to its source, so it
//! implements the full [`ChannelLike`]). They compose by taking a [`Takeable`] source,
//! so a `map` can sit in front of a `filter`, a `buffer`, or a plain [`Channel`].

use crate::item::{ChannelItem, TakeResult, TakerFn};
use crate::ops::{ChannelLike, Takeable};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// `map(f)`: transforms the value seen by a taker. Errors and the end marker pass
/// through unchanged.
pub struct Map<T, U, S> {
    source: S,
    f: Rc<dyn Fn(T) -> U>,
}

impl<T, U, S> Map<T, U, S> {
    /// Wraps `source`, applying `f` to every value it yields.
    pub fn new(source: S, f: impl Fn(T) -> U + 'static) -> Self {
        Self {
            source,
            f: Rc::new(f),
        }
    }
}

impl<T: 'static, U: 'static, S: Takeable<T>> Takeable<U> for Map<T, U, S> {
    fn take(&self, cb: TakerFn<U>) {
        let f = self.f.clone();
        self.source.take(Box::new(move |res: TakeResult<T>| {
            cb(res.map(|item| item.map(|v| f(v))));
        }));
    }
}

/// `filter(p)`: on a take that fails the predicate, immediately re-takes from the
/// source, so a taker never observes a filtered-out value.
pub struct Filter<T, S> {
    source: Rc<S>,
    pred: Rc<dyn Fn(&T) -> bool>,
}

impl<T, S> Filter<T, S> {
    /// Wraps `source`, only ever yielding values that satisfy `pred`.
    pub fn new(source: S, pred: impl Fn(&T) -> bool + 'static) -> Self {
        Self {
            source: Rc::new(source),
            pred: Rc::new(pred),
        }
    }
}

impl<T: Clone + 'static, S: Takeable<T> + 'static> Takeable<T> for Filter<T, S> {
    fn take(&self, cb: TakerFn<T>) {
        fn step<T: Clone + 'static>(
            source: Rc<impl Takeable<T> + 'static>,
            pred: Rc<dyn Fn(&T) -> bool>,
            cb: TakerFn<T>,
        ) {
            let source_for_retry = source.clone();
            let pred_for_retry = pred.clone();
            source.take(Box::new(move |res| match res {
                Ok(ChannelItem::Value(v)) if pred_for_retry(&v) => cb(Ok(ChannelItem::Value(v))),
                Ok(ChannelItem::Value(_)) => step(source_for_retry, pred_for_retry, cb),
                Ok(ChannelItem::End) => cb(Ok(ChannelItem::End)),
                Err(e) => cb(Err(e)),
            }));
        }
        step(self.source.clone(), self.pred.clone(), cb);
    }
}

/// `reduce(init, f)`: every take yields the accumulator folded over the next source
/// value; the end marker and errors pass through without folding.
pub struct Reduce<T, U, S> {
    source: S,
    f: Rc<dyn Fn(U, T) -> U>,
    acc: Rc<RefCell<U>>,
}

impl<T, U, S> Reduce<T, U, S> {
    /// Wraps `source`, folding `init` with `f` over every value it yields.
    pub fn new(source: S, init: U, f: impl Fn(U, T) -> U + 'static) -> Self {
        Self {
            source,
            f: Rc::new(f),
            acc: Rc::new(RefCell::new(init)),
        }
    }
}

impl<T: 'static, U: Clone + 'static, S: Takeable<T>> Takeable<U> for Reduce<T, U, S> {
    fn take(&self, cb: TakerFn<U>) {
        let f = self.f.clone();
        let acc = self.acc.clone();
        self.source.take(Box::new(move |res: TakeResult<T>| {
            match res {
                Ok(ChannelItem::Value(v)) => {
                    let prev = acc.borrow().clone();
                    let next = f(prev, v);
                    *acc.borrow_mut() = next.clone();
                    cb(Ok(ChannelItem::Value(next)));
                }
                Ok(ChannelItem::End) => cb(Ok(ChannelItem::End)),
                Err(e) => cb(Err(e)),
            }
        }));
    }
}

/// `group(n)`: reduces into chunks of exactly `n`; a trailing partial chunk is
/// discarded rather than delivered.
///
/// `n` must be at least 1; `n == 0` is a programming error and panics at construction,
/// the same "bug, not a runtime condition" treatment the task runtime gives an
/// unmapped `jump_table` case or a `retry` outside a catch.
pub struct Group<T, S> {
    source: Rc<S>,
    size: usize,
    pending: Rc<RefCell<Vec<T>>>,
}

impl<T, S> Group<T, S> {
    /// Wraps `source`, grouping its values into chunks of `size`.
    pub fn new(source: S, size: usize) -> Self {
        assert!(size >= 1, "group size must be at least 1");
        Self {
            source: Rc::new(source),
            size,
            pending: Rc::new(RefCell::new(Vec::with_capacity(size))),
        }
    }
}

impl<T: Clone + 'static, S: Takeable<T> + 'static> Takeable<Vec<T>> for Group<T, S> {
    fn take(&self, cb: TakerFn<Vec<T>>) {
        fn step<T: Clone + 'static>(
            source: Rc<impl Takeable<T> + 'static>,
            size: usize,
            pending: Rc<RefCell<Vec<T>>>,
            cb: TakerFn<Vec<T>>,
        ) {
            let source_for_next = source.clone();
            let pending_for_next = pending.clone();
            source.take(Box::new(move |res| match res {
                Ok(ChannelItem::Value(v)) => {
                    pending_for_next.borrow_mut().push(v);
                    if pending_for_next.borrow().len() == size {
                        let chunk = std::mem::replace(
                            &mut *pending_for_next.borrow_mut(),
                            Vec::with_capacity(size),
                        );
                        cb(Ok(ChannelItem::Value(chunk)));
                    } else {
                        step(source_for_next, size, pending_for_next, cb);
                    }
                }
                Ok(ChannelItem::End) => cb(Ok(ChannelItem::End)),
                Err(e) => cb(Err(e)),
            }));
        }
        step(self.source.clone(), self.size, self.pending.clone(), cb);
    }
}

/// `until(signal)`: yields source values until `signal` produces anything, after which
/// every subsequent take (and every take already parked on the source at the moment
/// the signal fires) returns `End`.
///
/// Unlike the other transforms in this module, `until` delegates `put` straight
/// through, so it is a full [`ChannelLike`], not just a [`Takeable`] view.
pub struct Until<T, S> {
    source: Rc<S>,
    ended: Rc<RefCell<bool>>,
}

impl<T: 'static, S: ChannelLike<T> + 'static> Until<T, S> {
    /// Wraps `source`, arming on `signal`'s first value or end.
    ///
    /// The signal's own element type is irrelevant — only the fact that it produced
    /// anything matters — so callers typically signal over a `Channel<()>`.
    pub fn new<U: 'static>(source: S, signal: impl Takeable<U> + 'static) -> Self {
        let ended = Rc::new(RefCell::new(false));
        let ended_for_signal = ended.clone();
        signal.take(Box::new(move |_| {
            *ended_for_signal.borrow_mut() = true;
        }));
        Self {
            source: Rc::new(source),
            ended,
        }
    }
}

impl<T: 'static, S: ChannelLike<T>> Takeable<T> for Until<T, S> {
    fn take(&self, cb: TakerFn<T>) {
        if *self.ended.borrow() {
            cb(Ok(ChannelItem::End));
            return;
        }
        let ended = self.ended.clone();
        self.source.take(Box::new(move |res| {
            if *ended.borrow() {
                cb(Ok(ChannelItem::End));
            } else {
                cb(res);
            }
        }));
    }
}

impl<T: 'static, S: ChannelLike<T>> ChannelLike<T> for Until<T, S> {
    fn put(&self, item: ChannelItem<T>, ack: crate::item::AckFn<T>) {
        self.source.put(item, ack);
    }

    fn end(&self) {
        self.source.end();
    }

    fn backlog(&self) -> isize {
        self.source.backlog()
    }
}

/// Schedules a one-shot `put(v)` onto `target` after `duration`, driven by `clock`.
pub fn timeout<T: Clone + 'static, C: crate::timers::Clock>(
    target: impl ChannelLike<T> + 'static,
    clock: &C,
    duration: Duration,
    v: T,
) {
    let _ = clock.after(
        duration,
        Box::new(move || target.put_value(v, Box::new(|_| {}))),
    );
}

/// Collects up to `n` values from `source` into a `Vec`, invoking `cb` once `n` have
/// arrived or the source ends (in which case `cb` receives the partial vector).
pub fn take_n<T: Clone + 'static>(
    source: Rc<impl Takeable<T> + 'static>,
    n: usize,
    cb: Box<dyn FnOnce(TakeResult<Vec<T>>)>,
) {
    fn step<T: Clone + 'static>(
        source: Rc<impl Takeable<T> + 'static>,
        remaining: usize,
        mut collected: Vec<T>,
        cb: Box<dyn FnOnce(TakeResult<Vec<T>>)>,
    ) {
        if remaining == 0 {
            cb(Ok(ChannelItem::Value(collected)));
            return;
        }
        let source_for_next = source.clone();
        source.take(Box::new(move |res| match res {
            Ok(ChannelItem::Value(v)) => {
                collected.push(v);
                step(source_for_next, remaining - 1, collected, cb);
            }
            Ok(ChannelItem::End) => cb(Ok(ChannelItem::Value(collected))),
            Err(e) => cb(Err(e)),
        }));
    }
    step(source, n, Vec::with_capacity(n), cb);
}

/// Snapshots `source.backlog()` and synchronously takes that many values
/// non-blockingly, invoking `cb` with whatever was immediately available.
pub fn take_some<T: Clone + 'static>(
    source: Rc<impl ChannelLike<T> + 'static>,
    cb: Box<dyn FnOnce(Vec<T>)>,
) {
    let n = source.backlog().max(0) as usize;
    if n == 0 {
        cb(Vec::new());
        return;
    }
    take_n(
        source,
        n,
        Box::new(move |res| {
            cb(res.ok().and_then(ChannelItem::into_value).unwrap_or_default());
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::Channel;
    use crate::scheduler::TickQueue;
    use std::cell::RefCell as StdRefCell;

    fn setup<T: Clone + 'static>() -> (Rc<TickQueue>, Channel<T>) {
        let tq = TickQueue::new();
        let ch = Channel::new(tq.clone());
        (tq, ch)
    }

    #[test]
    fn map_transforms_values() {
        let (tq, ch) = setup::<i32>();
        let mapped = Map::new(ch.clone(), |v| v * 10);
        let out = Rc::new(StdRefCell::new(None));
        let o = out.clone();
        mapped.take(Box::new(move |res| *o.borrow_mut() = Some(res)));
        ch.put_value(4, Box::new(|_| {}));
        tq.run_until_idle();
        assert_eq!(*out.borrow(), Some(Ok(ChannelItem::Value(40))));
    }

    #[test]
    fn filter_skips_rejected_values() {
        let (tq, ch) = setup::<i32>();
        let filtered = Filter::new(ch.clone(), |v: &i32| *v % 2 == 0);
        let out = Rc::new(StdRefCell::new(None));
        let o = out.clone();
        filtered.take(Box::new(move |res| *o.borrow_mut() = Some(res)));
        ch.put_value(3, Box::new(|_| {}));
        ch.put_value(3, Box::new(|_| {}));
        ch.put_value(4, Box::new(|_| {}));
        tq.run_until_idle();
        assert_eq!(*out.borrow(), Some(Ok(ChannelItem::Value(4))));
    }

    #[test]
    fn reduce_accumulates_across_takes() {
        let (tq, ch) = setup::<i32>();
        let summed = Reduce::new(ch.clone(), 0, |acc, v| acc + v);
        let out = Rc::new(StdRefCell::new(Vec::new()));
        for _ in 0..3 {
            let o = out.clone();
            summed.take(Box::new(move |res| {
                if let Ok(ChannelItem::Value(v)) = res {
                    o.borrow_mut().push(v);
                }
            }));
        }
        ch.put_value(1, Box::new(|_| {}));
        tq.run_until_idle();
        ch.put_value(2, Box::new(|_| {}));
        tq.run_until_idle();
        ch.put_value(3, Box::new(|_| {}));
        tq.run_until_idle();
        assert_eq!(*out.borrow(), vec![1, 3, 6]);
    }

    #[test]
    fn group_emits_full_chunks_and_drops_the_tail() {
        let (tq, ch) = setup::<i32>();
        let grouped = Group::new(ch.clone(), 2);
        let out = Rc::new(StdRefCell::new(None));
        let o = out.clone();
        grouped.take(Box::new(move |res| *o.borrow_mut() = Some(res)));
        ch.put_value(1, Box::new(|_| {}));
        ch.put_value(2, Box::new(|_| {}));
        tq.run_until_idle();
        assert_eq!(*out.borrow(), Some(Ok(ChannelItem::Value(vec![1, 2]))));

        let out2 = Rc::new(StdRefCell::new(None));
        let o2 = out2.clone();
        grouped.take(Box::new(move |res| *o2.borrow_mut() = Some(res)));
        ch.put_value(3, Box::new(|_| {}));
        ch.put_end(Box::new(|_| {}));
        tq.run_until_idle();
        assert_eq!(*out2.borrow(), Some(Ok(ChannelItem::End)));
    }

    #[test]
    fn until_ends_once_signal_fires() {
        let (tq, source) = setup::<i32>();
        let (_tq2, signal) = setup::<()>();
        let gated = Until::new(source.clone(), signal.clone());

        let first = Rc::new(StdRefCell::new(None));
        let f = first.clone();
        gated.take(Box::new(move |res| *f.borrow_mut() = Some(res)));
        source.put_value(1, Box::new(|_| {}));
        tq.run_until_idle();
        assert_eq!(*first.borrow(), Some(Ok(ChannelItem::Value(1))));

        signal.put_value((), Box::new(|_| {}));
        tq.run_until_idle();

        let second = Rc::new(StdRefCell::new(None));
        let s = second.clone();
        gated.take(Box::new(move |res| *s.borrow_mut() = Some(res)));
        tq.run_until_idle();
        assert_eq!(*second.borrow(), Some(Ok(ChannelItem::End)));
    }
}
