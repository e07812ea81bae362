// SPDX-License-Identifier: Apache-2.0

//! Errors surfaced by channel operations.
//!
//! Important note: these errors are channel-protocol errors only (e.g. a `put` against
//! a filled channel). Application-level errors that travel *through* a channel's payload
//! are carried as `ChannelItem::Value` entries by the caller, not represented here.

/// Errors that can occur when calling [`take`](crate::base::Channel::take) or
/// [`put`](crate::base::Channel::put) on a channel.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel has been latched with [`fill`](crate::base::Channel::fill) and no
    /// longer accepts puts.
    #[error("channel is filled and no longer accepts puts")]
    Filled,

    /// The channel has ended and has no pending takers or space left to negotiate a put.
    #[error("channel has ended")]
    Ended,
}

/// Errors surfaced while resolving a heterogeneous structure with
/// [`resolve`](crate::compose::resolve).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// A sub-resolution failed with a channel-protocol error.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
