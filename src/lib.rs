// SPDX-License-Identifier: Apache-2.0

//! Single-threaded, cooperatively scheduled async channels and a compiled task
//! state-machine runtime built on top of them.
//!
//! This crate re-exports [`taskchan_channel`] and [`taskchan_task`] under one name so
//! a host embedding both only needs one dependency. Each crate also works standalone:
//! `taskchan-channel` has no knowledge of tasks, and `taskchan-task`'s only dependency
//! on the channel crate is its [`TaskRuntime::channel`](taskchan_task::TaskRuntime::channel)
//! convenience method.
//!
//! Both crates are intentionally `!Send`/`!Sync`: every handle is reference-counted
//! with `Rc`, not `Arc`, and every callback is driven through a single [`TickQueue`]
//! per executor thread. A host that wants one of these per OS thread runs one
//! `tokio::task::LocalSet` per thread rather than sharing a runtime across threads.

pub use taskchan_channel as channel;
pub use taskchan_task as task;

pub use taskchan_channel::{
    scheduler::TickQueue, Channel, ChannelError, ChannelItem, ChannelLike, ChannelValue, DoneFn,
    MessageHandler, ResolveError, Takeable,
};
pub use taskchan_task::{RuntimeConfig, TaskError, TaskRuntime, TaskRuntimeError};
