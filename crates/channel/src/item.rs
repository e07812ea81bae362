// SPDX-License-Identifier: Apache-2.0

//! The end-of-stream sentinel and the cross-source envelope used by `merge`/`resolve`.

use crate::error::ChannelError;

/// A value flowing through a channel, or the end-of-stream marker.
///
/// Making end-of-stream an explicit variant rather than a sentinel value lets the type
/// checker, not a runtime check, rule out treating an ended channel's marker as a real
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelItem<T> {
    /// A value produced by some upstream `put`.
    Value(T),
    /// The stream has ended; no further values will arrive.
    End,
}

impl<T> ChannelItem<T> {
    /// Returns `true` if this is the end-of-stream marker.
    pub fn is_end(&self) -> bool {
        matches!(self, ChannelItem::End)
    }

    /// Extracts the value, or `None` if this is the end marker.
    pub fn into_value(self) -> Option<T> {
        match self {
            ChannelItem::Value(v) => Some(v),
            ChannelItem::End => None,
        }
    }

    /// Maps the contained value, passing `End` through unchanged.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ChannelItem<U> {
        match self {
            ChannelItem::Value(v) => ChannelItem::Value(f(v)),
            ChannelItem::End => ChannelItem::End,
        }
    }
}

/// Result type produced by a `take`/`put` completion.
pub type TakeResult<T> = Result<ChannelItem<T>, ChannelError>;

/// A one-shot continuation that receives the outcome of a `take`.
pub type TakerFn<T> = Box<dyn FnOnce(TakeResult<T>)>;

/// A one-shot continuation that receives the outcome of a `put` (the producer's ack).
pub type AckFn<T> = Box<dyn FnOnce(TakeResult<T>)>;

/// Identifies which source produced a [`ChannelValue`] inside a `merge`d stream.
pub type SourceId = usize;

/// Transport envelope used by `merge` and `resolve` to preserve provenance and
/// per-source error information when interleaving several channels.
///
/// `result` is a `TakeResult`, so exactly one of a value, the end marker, or an error
/// is ever present structurally, rather than relying on a documented invariant over a
/// looser `{error, value}` pair.
#[derive(Debug, Clone)]
pub struct ChannelValue<T> {
    /// Which merged source this envelope originated from.
    pub source: SourceId,
    /// The take outcome from that source: a value, the end marker, or an error.
    pub result: TakeResult<T>,
}

impl<T> ChannelValue<T> {
    /// Builds a new envelope.
    pub fn new(source: SourceId, result: TakeResult<T>) -> Self {
        Self { source, result }
    }
}
