// SPDX-License-Identifier: Apache-2.0

//! Composable, single-threaded asynchronous channels with rendezvous semantics.
//!
//! [`base::Channel`] is the one concrete handle type; every transform in
//! [`transforms`], every shaper in [`buffers`], and every combinator in [`compose`]
//! wraps a `Channel` (or another wrapper) behind the [`ops::ChannelLike`]/
//! [`ops::Takeable`] traits rather than mutating it in place.

pub mod base;
pub mod buffers;
pub mod compose;
pub mod error;
pub mod item;
pub mod ops;
pub mod scheduler;
pub mod stream_adapter;
pub mod timers;
pub mod transforms;

pub use base::Channel;
pub use error::{ChannelError, ResolveError};
pub use item::{AckFn, ChannelItem, ChannelValue, SourceId, TakeResult, TakerFn};
pub use ops::{ChannelLike, DoneFn, MessageHandler, Takeable};
pub use scheduler::{Continuation, Scheduler, TickQueue};
