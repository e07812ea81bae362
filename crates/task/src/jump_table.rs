// SPDX-License-Identifier: Apache-2.0

//! Switch/case dispatch: a [`JumpTable`] is immutable per-switch metadata, mapping a
//! case value to its target step and naming the post-switch join step. Built once per
//! compiled task and cached by `(task name, switch site)`.

use crate::error::TaskRuntimeError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A value a compiled `switch` dispatches on: either an integer enum tag or a string
/// label, so a task doesn't have to funnel every case through one representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CaseValue {
    /// An integer case label.
    Int(i64),
    /// A string case label.
    Str(String),
}

impl From<i64> for CaseValue {
    fn from(v: i64) -> Self {
        CaseValue::Int(v)
    }
}

impl From<&str> for CaseValue {
    fn from(v: &str) -> Self {
        CaseValue::Str(v.to_string())
    }
}

/// Immutable case -> step mapping for one compiled `switch`, plus the step id beyond
/// every case (the join the switch's own `Phi` resumes at).
#[derive(Debug, Clone)]
pub struct JumpTable {
    steps: HashMap<CaseValue, u32>,
    beyond_id: u32,
}

impl JumpTable {
    /// Builds a table from explicit `(case, step)` pairs.
    pub fn build(cases: impl IntoIterator<Item = (CaseValue, u32)>, beyond_id: u32) -> Self {
        Self {
            steps: cases.into_iter().collect(),
            beyond_id,
        }
    }

    /// The step id immediately beyond every case of this switch.
    pub fn beyond_id(&self) -> u32 {
        self.beyond_id
    }

    /// Looks up the step for `value`, or `None` if the switch has no matching case
    /// (and no default arm was registered as one of `cases`).
    pub fn step_for(&self, value: &CaseValue) -> Option<u32> {
        self.steps.get(value).copied()
    }
}

/// Per-thread registry of jump tables, keyed by `(task name, switch site step id)`.
///
/// A switch site's table is built exactly once (the first time the compiled dispatch
/// reaches it with `cases` supplied) and is immutable afterward; every later visit
/// looks the cached table up instead of rebuilding the case map.
#[derive(Default)]
pub struct JumpTableRegistry {
    tables: RefCell<HashMap<(&'static str, u32), Rc<JumpTable>>>,
}

impl JumpTableRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds (if `cases` is `Some`) or fetches (if `None`) the table for
    /// `(task_name, id)`. The compiled dispatch passes `cases` only the first time it
    /// reaches a given switch statement.
    pub fn jump_table(
        &self,
        task_name: &'static str,
        id: u32,
        cases: Option<(Vec<(CaseValue, u32)>, u32)>,
    ) -> Result<Rc<JumpTable>, TaskRuntimeError> {
        let mut tables = self.tables.borrow_mut();
        if let Some((cases, beyond_id)) = cases {
            let table = Rc::new(JumpTable::build(cases, beyond_id));
            tables.insert((task_name, id), table.clone());
            Ok(table)
        } else {
            tables
                .get(&(task_name, id))
                .cloned()
                .ok_or(TaskRuntimeError::TableNotBuilt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_then_caches_a_table() {
        let registry = JumpTableRegistry::new();
        let built = registry
            .jump_table("t", 10, Some((vec![(CaseValue::Int(1), 11), (CaseValue::Int(2), 12)], 20)))
            .unwrap();
        assert_eq!(built.step_for(&CaseValue::Int(1)), Some(11));
        assert_eq!(built.beyond_id(), 20);

        let cached = registry.jump_table("t", 10, None).unwrap();
        assert_eq!(cached.step_for(&CaseValue::Int(2)), Some(12));
    }

    #[test]
    fn fetching_before_building_is_a_programming_error() {
        let registry = JumpTableRegistry::new();
        assert_eq!(
            registry.jump_table("t", 99, None).unwrap_err(),
            TaskRuntimeError::TableNotBuilt
        );
    }
}
