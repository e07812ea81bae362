// SPDX-License-Identifier: Apache-2.0

//! The task runtime's error taxonomy.
//!
//! [`TaskError`] is the only error type that ever crosses a suspension boundary; it
//! wraps whatever application error the compiled task raised and accumulates an
//! append-only `task_name:step_id` trace as it bubbles through nested task frames.
//! Programming errors (`retry` outside a catch, an unmapped `jump_table` case) are
//! bugs rather than runtime conditions and panic at the call site instead of being
//! folded into this type.
//!
//! `TaskError` intentionally carries no `!Send` payload (no `Rc`, no raw channel
//! handles) so it stays inspectable from synchronous contexts, the same constraint
//! this crate's channel errors hold to.

use std::fmt;
use std::sync::Arc;

/// A single frame in a [`TaskError`]'s accumulated unwind trace.
pub type Frame = String;

/// An error that has propagated through the task runtime's unwind machinery.
///
/// Cloneable and cheap to clone: the underlying application error is held behind an
/// `Arc` so every unwind frame that touches the error (the global sink, a `catch`
/// handler, the final callback) can inspect it without fighting over ownership.
#[derive(Debug, Clone)]
pub struct TaskError {
    source: Arc<dyn std::error::Error + 'static>,
    trace: Vec<Frame>,
}

impl TaskError {
    /// Wraps `source` as a fresh task error with an empty trace.
    pub fn new(source: impl std::error::Error + 'static) -> Self {
        Self {
            source: Arc::new(source),
            trace: Vec::new(),
        }
    }

    /// Appends a `task_name:step_id` frame, innermost call first.
    pub fn push_frame(&mut self, task_name: &str, step_id: u32) {
        self.trace.push(format!("{task_name}:{step_id}"));
    }

    /// The accumulated `task_name:step_id` trace, innermost frame first.
    pub fn trace(&self) -> &[Frame] {
        &self.trace
    }

    /// The wrapped application error.
    pub fn source(&self) -> &(dyn std::error::Error + 'static) {
        &*self.source
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)?;
        if !self.trace.is_empty() {
            write!(f, " (at {})", self.trace.join(" <- "))?;
        }
        Ok(())
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

/// Programming errors the runtime detects at a suspension boundary.
///
/// These are bugs in the compiled dispatch, not runtime conditions a caller can
/// meaningfully recover from, so this crate panics rather than threading these
/// through [`TaskError`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskRuntimeError {
    /// `retry` was called with no active `current_error_step` (i.e. outside a catch).
    #[error("retry() called outside an active catch handler")]
    RetryOutsideCatch,

    /// A `jump_table` switch value had no registered case and no default.
    #[error("jump_table: no case registered for the dispatched value")]
    UnmappedCase,

    /// `jump_table` was asked for a cached table before one was ever built for that id.
    #[error("jump_table: no table has been built yet for this switch site")]
    TableNotBuilt,
}
