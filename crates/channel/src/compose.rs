// SPDX-License-Identifier: Apache-2.0

//! Composition across multiple sources: `merge`, `clock`, `resolve`.

use crate::base::Channel;
use crate::error::{ChannelError, ResolveError};
use crate::item::{ChannelItem, ChannelValue, SourceId, TakeResult};
use crate::ops::Takeable;
use crate::scheduler::TickQueue;
use crate::timers::{Clock, TimerId};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

/// Interleaves several sources of the same element type onto one output channel of
/// [`ChannelValue`] envelopes.
///
/// Each source is read by its own reader loop: take, write the envelope, wait for the
/// envelope to be accepted, take again. That acceptance wait is the only backpressure
/// `merge` applies — a slow consumer of the merged output throttles every source
/// equally rather than letting a fast source flood the output.
pub struct Merge<T> {
    output: Channel<ChannelValue<T>>,
    next_source_id: Rc<RefCell<SourceId>>,
}

impl<T: Clone + 'static> Merge<T> {
    /// Creates an empty merge writing envelopes onto a channel driven by `scheduler`.
    pub fn new(scheduler: Rc<TickQueue>) -> Self {
        Self {
            output: Channel::new(scheduler),
            next_source_id: Rc::new(RefCell::new(0)),
        }
    }

    /// The merged output channel; takers see `ChannelValue` envelopes tagged with the
    /// originating source's id.
    pub fn output(&self) -> Channel<ChannelValue<T>> {
        self.output.clone()
    }

    /// Attaches a new source, starting its reader loop immediately.
    pub fn add(&self, source: impl Takeable<T> + 'static) {
        let id = {
            let mut next = self.next_source_id.borrow_mut();
            let id = *next;
            *next += 1;
            id
        };
        Self::reader_step(Rc::new(source), id, self.output.clone());
    }

    fn reader_step<S: Takeable<T> + 'static>(
        source: Rc<S>,
        id: SourceId,
        output: Channel<ChannelValue<T>>,
    ) {
        let output_for_ack = output.clone();
        source.take(Box::new(move |res: TakeResult<T>| {
            let is_end = matches!(res, Ok(ChannelItem::End));
            let envelope = ChannelValue::new(id, res);
            let source_for_next = source.clone();
            output_for_ack.put_value(
                envelope,
                Box::new(move |_| {
                    if !is_end {
                        Self::reader_step(source_for_next, id, output);
                    }
                }),
            );
        }));
    }
}

/// `clock(duration)`: while running, produces a monotonically increasing counter on a
/// `u64` channel every `duration`, starting from 1.
pub struct ClockChannel<C> {
    channel: Channel<u64>,
    clock: Rc<C>,
    duration: Duration,
    counter: Rc<RefCell<u64>>,
    timer: Rc<RefCell<Option<TimerId>>>,
    running: Rc<RefCell<bool>>,
}

impl<C> Clone for ClockChannel<C> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            clock: self.clock.clone(),
            duration: self.duration,
            counter: self.counter.clone(),
            timer: self.timer.clone(),
            running: self.running.clone(),
        }
    }
}

impl<C: Clock + 'static> ClockChannel<C> {
    /// Builds a stopped clock ticking `channel` every `duration` once started.
    pub fn new(channel: Channel<u64>, clock: Rc<C>, duration: Duration) -> Self {
        Self {
            channel,
            clock,
            duration,
            counter: Rc::new(RefCell::new(1)),
            timer: Rc::new(RefCell::new(None)),
            running: Rc::new(RefCell::new(false)),
        }
    }

    /// The underlying tick channel.
    pub fn channel(&self) -> Channel<u64> {
        self.channel.clone()
    }

    /// Starts ticking, counting up from 1. Idempotent while already running.
    pub fn start(&self) {
        if *self.running.borrow() {
            return;
        }
        *self.running.borrow_mut() = true;
        *self.counter.borrow_mut() = 1;
        Self::schedule(self.clone());
    }

    fn schedule(this: Self) {
        let this_for_timer = this.clone();
        let id = this.clock.after(
            this.duration,
            Box::new(move || {
                if !*this_for_timer.running.borrow() {
                    return;
                }
                let n = *this_for_timer.counter.borrow();
                this_for_timer
                    .channel
                    .put_value(n, Box::new(|_| {}));
                *this_for_timer.counter.borrow_mut() += 1;
                Self::schedule(this_for_timer.clone());
            }),
        );
        *this.timer.borrow_mut() = Some(id);
    }

    /// Stops ticking. Idempotent.
    pub fn stop(&self) {
        *self.running.borrow_mut() = false;
        if let Some(id) = self.timer.borrow_mut().take() {
            self.clock.cancel(id);
        }
    }
}

/// A heterogeneous structure [`resolve`] can await: a channel, an ordered sequence, a
/// keyed mapping, or a plain scalar, any of which may nest.
#[derive(Debug, Clone)]
pub enum Resolvable<T> {
    /// A channel whose next value replaces this slot.
    Channel(Channel<Resolvable<T>>),
    /// An ordered sequence of slots, each resolved independently.
    Seq(Vec<Resolvable<T>>),
    /// A keyed mapping of slots, each resolved independently.
    Map(BTreeMap<String, Resolvable<T>>),
    /// A value needing no further resolution.
    Scalar(T),
}

type ResolveCb<T> = Box<dyn FnOnce(Result<Resolvable<T>, ResolveError>)>;

/// Awaits every channel embedded in `thing`, replacing each with its resolved value.
///
/// When `recursive`, a resolved value that is itself a [`Resolvable::Channel`] is
/// awaited again transitively, until a non-channel value is produced. `Seq`/`Map`
/// nodes each track their own outstanding-slot count, scoped to that node, rather
/// than sharing one counter across the whole resolution tree.
pub fn resolve<T: Clone + 'static>(thing: Resolvable<T>, recursive: bool, cb: ResolveCb<T>) {
    match thing {
        Resolvable::Scalar(v) => cb(Ok(Resolvable::Scalar(v))),
        Resolvable::Channel(ch) => {
            ch.take(Box::new(move |res| match res {
                Ok(ChannelItem::Value(inner)) => {
                    if recursive {
                        resolve(inner, recursive, cb);
                    } else {
                        cb(Ok(inner));
                    }
                }
                Ok(ChannelItem::End) => cb(Err(ResolveError::Channel(ChannelError::Ended))),
                Err(e) => cb(Err(ResolveError::Channel(e))),
            }));
        }
        Resolvable::Seq(items) => resolve_seq(items, recursive, cb),
        Resolvable::Map(entries) => resolve_map(entries, recursive, cb),
    }
}

fn resolve_seq<T: Clone + 'static>(
    items: Vec<Resolvable<T>>,
    recursive: bool,
    cb: ResolveCb<T>,
) {
    let len = items.len();
    if len == 0 {
        cb(Ok(Resolvable::Seq(Vec::new())));
        return;
    }
    let results = Rc::new(RefCell::new((0..len).map(|_| None).collect::<Vec<_>>()));
    let remaining = Rc::new(RefCell::new(len));
    let done = Rc::new(RefCell::new(Some(cb)));

    for (i, item) in items.into_iter().enumerate() {
        let results = results.clone();
        let remaining = remaining.clone();
        let done = done.clone();
        resolve(
            item,
            recursive,
            Box::new(move |res| match res {
                Ok(v) => {
                    results.borrow_mut()[i] = Some(v);
                    *remaining.borrow_mut() -= 1;
                    if *remaining.borrow() == 0 {
                        if let Some(cb) = done.borrow_mut().take() {
                            let collected = results
                                .borrow_mut()
                                .drain(..)
                                .map(|slot| match slot {
                                    Some(v) => v,
                                    None => unreachable!(
                                        "every slot is filled once `remaining` reaches zero"
                                    ),
                                })
                                .collect();
                            cb(Ok(Resolvable::Seq(collected)));
                        }
                    }
                }
                Err(e) => {
                    if let Some(cb) = done.borrow_mut().take() {
                        cb(Err(e));
                    }
                }
            }),
        );
    }
}

fn resolve_map<T: Clone + 'static>(
    entries: BTreeMap<String, Resolvable<T>>,
    recursive: bool,
    cb: ResolveCb<T>,
) {
    let len = entries.len();
    if len == 0 {
        cb(Ok(Resolvable::Map(BTreeMap::new())));
        return;
    }
    let results = Rc::new(RefCell::new(BTreeMap::<String, Resolvable<T>>::new()));
    let remaining = Rc::new(RefCell::new(len));
    let done = Rc::new(RefCell::new(Some(cb)));

    for (key, item) in entries {
        let results = results.clone();
        let remaining = remaining.clone();
        let done = done.clone();
        resolve(
            item,
            recursive,
            Box::new(move |res| match res {
                Ok(v) => {
                    results.borrow_mut().insert(key, v);
                    *remaining.borrow_mut() -= 1;
                    if *remaining.borrow() == 0 {
                        if let Some(cb) = done.borrow_mut().take() {
                            let collected = std::mem::take(&mut *results.borrow_mut());
                            cb(Ok(Resolvable::Map(collected)));
                        }
                    }
                }
                Err(e) => {
                    if let Some(cb) = done.borrow_mut().take() {
                        cb(Err(e));
                    }
                }
            }),
        );
    }
}
