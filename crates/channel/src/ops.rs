// SPDX-License-Identifier: Apache-2.0

//! The shared surface implemented by the base channel and by every type-preserving
//! wrapper.
//!
//! `map`/`filter`/`reduce`/`group` change the element type between their source and
//! their output, so they are modeled separately in [`crate::transforms`] as take-only
//! views rather than through this trait. Everything that preserves `T` on both sides
//! — `buffer`, `dropping_buffer`, `expiring_buffer`, `bucket`, `debounce`, `fanout`,
//! `tap` — implements [`ChannelLike`], so any of them can stand in for a plain
//! [`crate::base::Channel`] wherever one is expected, including as another wrapper's
//! source.

use crate::item::{AckFn, TakeResult, TakerFn};

/// Anything a taker can be registered against.
///
/// `map`/`filter`/`reduce`/`group` change the element type between their source and
/// their output, so they only need this half of [`ChannelLike`] — they are take-only
/// views, not full channels, and have no `put` of their own to offer.
pub trait Takeable<T> {
    /// Registers a taker for the next value or end marker.
    fn take(&self, cb: TakerFn<T>);
}

/// Common rendezvous surface for the base channel and its type-preserving wrappers.
pub trait ChannelLike<T>: Takeable<T> {
    /// Offers `item` for delivery, acked via `ack` once a taker claims it (or the
    /// offer is rejected).
    fn put(&self, item: crate::item::ChannelItem<T>, ack: AckFn<T>);

    /// Convenience for `put(Value(v), ack)`.
    fn put_value(&self, value: T, ack: AckFn<T>) {
        self.put(crate::item::ChannelItem::Value(value), ack);
    }

    /// Convenience for `put(End, ack)`.
    fn put_end(&self, ack: AckFn<T>) {
        self.put(crate::item::ChannelItem::End, ack);
    }

    /// Signals end-of-stream with no interest in the ack.
    fn end(&self);

    /// `|ready| - |waiters|`: positive when puts are queued, negative when takers are
    /// parked waiting for a value.
    fn backlog(&self) -> isize;

    /// `true` if a `take` would resolve without parking.
    fn can_read(&self) -> bool {
        self.backlog() > 0
    }

    /// `true` if a `put` would resolve without parking.
    fn can_write(&self) -> bool {
        self.backlog() <= 0
    }
}

/// A one-shot continuation a [`MessageHandler`] invokes once it has finished with a
/// dispatched value.
pub type DoneFn = Box<dyn FnOnce()>;

/// Per-message handler dispatched to by [`crate::base::Channel::bind`].
///
/// A fresh instance is constructed (via the factory passed to `bind`) for every value
/// taken off the channel, mirroring the source's "instantiate a class per message"
/// binding rather than reusing one long-lived consumer closure.
pub trait MessageHandler<T> {
    /// Handles one dispatched value. Must call `done` exactly once, synchronously or
    /// later, to signal completion; `bind`'s serialized mode (`spawn = false`) only
    /// re-takes after `done` fires.
    fn handle(&mut self, value: T, done: DoneFn);
}

/// Blanket helper so `take`/`put` outcomes can be mapped without naming the result type.
pub(crate) fn map_take_result<T, U>(
    res: TakeResult<T>,
    f: impl FnOnce(T) -> U,
) -> TakeResult<U> {
    res.map(|item| item.map(f))
}
