// SPDX-License-Identifier: Apache-2.0

//! A compiled task's state-machine runtime: step dispatch, structured unwinding,
//! retry and switch/case jump tables, layered on top of [`taskchan_channel`].
//!
//! There is no task compiler here. A host that lowers a higher-level task language
//! into Rust would generate one [`runtime::StepFn`] per task and drive it through
//! [`TaskRuntime`]; this crate owns everything downstream of that: the unwind stack
//! for `try`/`catch`/`finally`, the retry protocol, jump-table dispatch for `switch`,
//! and the process-wide error sink unhandled task errors are reported to.

pub mod config;
pub mod error;
pub mod jump_table;
pub mod runtime;
pub mod sink;
pub mod unwind;

pub use config::RuntimeConfig;
pub use error::{Frame, TaskError, TaskRuntimeError};
pub use jump_table::{CaseValue, JumpTable, JumpTableRegistry};
pub use runtime::{FinalCallback, Resumption, StepFn, TaskRuntime};
pub use sink::{clear_global_error_sink, set_global_error_sink, Sink, TaskDebugInfo};
pub use unwind::UnwindRecord;
