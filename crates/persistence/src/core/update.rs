//! Document update operations.

use serde_json::Value;

use crate::query::Condition;

/// One field-level mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Set a path, creating intermediate objects.
    Set(String, Value),
    /// Remove a path.
    Unset(String),
    /// Add to a number; a missing field counts as zero.
    Inc(String, i64),
    /// Append to an array, creating it if missing.
    Push(String, Value),
    /// Append unless an equal element is present.
    AddToSet(String, Value),
    /// Remove every element equal to the value.
    Pull(String, Value),
    /// Remove every element matching the condition.
    PullMatching(String, Condition),
    /// Set a field on every element of an array matching the condition.
    SetMatching {
        /// Path of the array.
        array: String,
        /// Element filter, relative to the element.
        filter: Condition,
        /// Path inside the element.
        field: String,
        /// New value.
        value: Value,
    },
}

/// An ordered list of mutations applied atomically to each matched document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    /// An empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a [`UpdateOp::Set`].
    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(path.into(), value.into()));
        self
    }

    /// Adds a [`UpdateOp::Set`] when `value` is present.
    pub fn set_opt<V: Into<Value>>(self, path: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.set(path, value),
            None => self,
        }
    }

    /// Adds a [`UpdateOp::Unset`].
    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset(path.into()));
        self
    }

    /// Adds a [`UpdateOp::Inc`].
    pub fn inc(mut self, path: impl Into<String>, by: i64) -> Self {
        self.ops.push(UpdateOp::Inc(path.into(), by));
        self
    }

    /// Adds a [`UpdateOp::Push`].
    pub fn push(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Push(path.into(), value.into()));
        self
    }

    /// Adds a [`UpdateOp::AddToSet`].
    pub fn add_to_set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::AddToSet(path.into(), value.into()));
        self
    }

    /// Adds a [`UpdateOp::Pull`].
    pub fn pull(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Pull(path.into(), value.into()));
        self
    }

    /// Adds a [`UpdateOp::PullMatching`].
    pub fn pull_matching(mut self, path: impl Into<String>, condition: Condition) -> Self {
        self.ops.push(UpdateOp::PullMatching(path.into(), condition));
        self
    }

    /// Adds a [`UpdateOp::SetMatching`].
    pub fn set_matching(
        mut self,
        array: impl Into<String>,
        filter: Condition,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.ops.push(UpdateOp::SetMatching {
            array: array.into(),
            filter,
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// The mutations, in application order.
    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    /// Returns `true` when there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Outcome of an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    /// Documents matching the condition.
    pub matched: u64,
    /// Documents whose content changed.
    pub modified: u64,
}
