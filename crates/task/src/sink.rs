// SPDX-License-Identifier: Apache-2.0

//! The global error sink: an optional, process-wide callback notified
//! whenever a task's `callback` is invoked with an error, alongside a snapshot of the
//! task that raised it. Overhead is paid only on the error path: a task that never
//! errors never touches this module.
//!
//! Modeled as `OnceLock<RwLock<Option<Sink>>>`, a diagnostic hook rather than part of
//! the concurrency contract, so tests can swap or clear it for isolation.

use crate::error::TaskError;
use std::sync::{Arc, OnceLock, RwLock};

/// A snapshot of the task frame that observed an error, handed to the global sink
/// alongside the [`TaskError`] itself.
#[derive(Debug, Clone)]
pub struct TaskDebugInfo {
    /// The compiled task's name.
    pub task_name: &'static str,
    /// The step id active when the error was raised.
    pub step_id: u32,
}

/// The global error sink's signature. No `!Send`/`!Sync` payload (channel handles,
/// locals) ever reaches this callback, only the error and a plain debug snapshot, so a
/// single process-wide sink can be shared across however many single-threaded task
/// runtimes the host spins up.
pub type Sink = Arc<dyn Fn(&TaskError, &TaskDebugInfo) + Send + Sync>;

static GLOBAL_SINK: OnceLock<RwLock<Option<Sink>>> = OnceLock::new();

fn slot() -> &'static RwLock<Option<Sink>> {
    GLOBAL_SINK.get_or_init(|| RwLock::new(None))
}

/// Installs (or replaces) the process-wide error sink.
pub fn set_global_error_sink(sink: Sink) {
    *slot().write().unwrap_or_else(|e| e.into_inner()) = Some(sink);
}

/// Clears the process-wide error sink, e.g. between tests.
pub fn clear_global_error_sink() {
    *slot().write().unwrap_or_else(|e| e.into_inner()) = None;
}

/// Invokes the installed sink, if any, with `err` and `info`. Also emits a structured
/// `tracing::error!` regardless of whether a sink is installed, so unhandled task
/// errors are always observable through the crate's logs even when no callback has
/// been registered.
pub fn notify(err: &TaskError, info: &TaskDebugInfo) {
    tracing::error!(
        task = info.task_name,
        step = info.step_id,
        trace = ?err.trace(),
        "unhandled task error: {err}"
    );
    if let Some(sink) = slot().read().unwrap_or_else(|e| e.into_inner()).as_ref() {
        sink(err, info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn installed_sink_observes_errors() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_for_sink = seen.clone();
        set_global_error_sink(Arc::new(move |err: &TaskError, info: &TaskDebugInfo| {
            seen_for_sink
                .lock()
                .unwrap()
                .push(format!("{}@{}: {err}", info.task_name, info.step_id));
        }));

        notify(&TaskError::new(Boom), &TaskDebugInfo { task_name: "t", step_id: 3 });
        assert_eq!(seen.lock().unwrap().as_slice(), ["t@3: boom"]);
        clear_global_error_sink();
    }
}
