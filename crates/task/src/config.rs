// SPDX-License-Identifier: Apache-2.0

//! Small configuration knobs for the task runtime, in the spirit of lightweight
//! `*Config` structs such as `RetryConfig` in `otap-df-engine::retry_processor` rather
//! than a full external config-file loader: this crate is a library embedded by a
//! compiled task, with no deployment-time configuration surface of its own.

/// Runtime-wide defaults a host embedding this crate may tune.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeConfig {
    /// Maximum depth the unwind stack may reach before the runtime treats further
    /// growth as a compiled-dispatch bug (an unbounded `finally`/`catch` nesting is
    /// always a code-generation error, not a legitimate runtime condition).
    pub max_unwind_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_unwind_depth: 1024,
        }
    }
}
