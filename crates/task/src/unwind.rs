// SPDX-License-Identifier: Apache-2.0

//! The unwind stack: a tagged sum of the records a protected block can leave behind
//! for the runtime's unwind loop to pop and dispatch, in LIFO order.

/// One entry of the per-task unwind stack.
///
/// `L` is the compiler-generated locals struct for the task this stack belongs to.
/// Cleanup steps snapshot `L` because the catching frame's own locals may have been
/// overwritten by the time the finally block runs.
pub enum UnwindRecord<L> {
    /// A `finally` block: re-enter the step at `step` once unwinding reaches here,
    /// having first pushed a [`UnwindRecord::RestoreLocals`] so the snapshot taken at
    /// registration time is restored once the finally body completes.
    CleanupStep {
        /// Step id of the finally block.
        step: u32,
        /// Locals as they were when this record was registered.
        saved_locals: L,
    },
    /// A purely synchronous cleanup closure, run in place during unwinding.
    CleanupAction(Box<dyn FnOnce()>),
    /// A `catch` handler guarding the block starting at `retry_step`.
    ErrorHandler {
        /// Step id of the catch body.
        step: u32,
        /// Step id `retry()` re-enters to repeat the protected block.
        retry_step: u32,
        /// Depth of the unwind stack at the moment this handler was registered; the
        /// insertion point `retry()` splices a [`UnwindRecord::Retry`] at.
        anchor: usize,
    },
    /// A post-branch join point, skipped while an error or `strict_unwind` is active.
    Phi {
        /// Step id to resume at once ordinary (non-error) unwinding reaches here.
        step: u32,
    },
    /// Re-enter a protected block after `retry()`'s corrective action.
    Retry {
        /// Step id at the start of the retried block.
        step: u32,
    },
    /// Restore `L` to a prior snapshot before continuing to unwind; always pushed
    /// immediately ahead of a [`UnwindRecord::CleanupStep`] so entering the cleanup
    /// step sees the locals it was registered with, not whatever overwrote them.
    RestoreLocals {
        /// The locals to restore.
        saved_locals: L,
    },
}

impl<L> std::fmt::Debug for UnwindRecord<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnwindRecord::CleanupStep { step, .. } => {
                f.debug_struct("CleanupStep").field("step", step).finish()
            }
            UnwindRecord::CleanupAction(_) => f.write_str("CleanupAction"),
            UnwindRecord::ErrorHandler {
                step,
                retry_step,
                anchor,
            } => f
                .debug_struct("ErrorHandler")
                .field("step", step)
                .field("retry_step", retry_step)
                .field("anchor", anchor)
                .finish(),
            UnwindRecord::Phi { step } => f.debug_struct("Phi").field("step", step).finish(),
            UnwindRecord::Retry { step } => f.debug_struct("Retry").field("step", step).finish(),
            UnwindRecord::RestoreLocals { .. } => f.write_str("RestoreLocals"),
        }
    }
}
