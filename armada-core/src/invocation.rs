//! What a client hands to the backend when it calls a task.

use crate::materialize::Materialize;
use crate::primitives::{ResultId, SessionToken};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single task argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Argument {
    /// A literal value, already encoded by the session codec.
    Value(Bytes),
    /// The result of another task. The backend wires a data dependency and the
    /// worker receives the resolved value.
    Handle(ResultId),
    /// Every result of a batch; the worker receives one value per member, in order.
    Collection(Vec<ResultId>),
}

impl Argument {
    /// Results this argument waits on.
    pub fn dependencies(&self) -> &[ResultId] {
        match self {
            Argument::Value(_) => &[],
            Argument::Handle(id) => std::slice::from_ref(id),
            Argument::Collection(ids) => ids,
        }
    }
}

/// A call of a task, as submitted to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    /// Declared name of the task; workers look it up in their registry.
    pub task_name: String,
    pub args: Vec<Argument>,
    pub kwargs: BTreeMap<String, Argument>,
    /// Records the worker must place on disk before the task body runs.
    pub materializations: Vec<Materialize>,
    /// Submitted by a running task that hands its own result over to this one.
    pub delegate: bool,
    pub session: SessionToken,
    pub partition: String,
    /// Result of the task that submitted this invocation, if any.
    pub parent: Option<ResultId>,
}

impl Invocation {
    pub fn new(task_name: impl Into<String>, session: SessionToken, partition: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            materializations: Vec::new(),
            delegate: false,
            session,
            partition: partition.into(),
            parent: None,
        }
    }

    /// Every result this invocation depends on, positional arguments first.
    pub fn dependencies(&self) -> impl Iterator<Item = &ResultId> {
        self.args
            .iter()
            .chain(self.kwargs.values())
            .flat_map(|arg| arg.dependencies().iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies_cover_handles_and_collections() {
        let mut invocation = Invocation::new("sum", SessionToken::new("s"), "default");
        invocation.args.push(Argument::Value(Bytes::from_static(b"1")));
        invocation.args.push(Argument::Handle(ResultId::new("a")));
        invocation.kwargs.insert(
            "rest".to_string(),
            Argument::Collection(vec![ResultId::new("b"), ResultId::new("c")]),
        );

        let deps: Vec<&str> = invocation.dependencies().map(ResultId::as_str).collect();
        assert_eq!(deps, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_value_has_no_dependencies() {
        let arg = Argument::Value(Bytes::new());
        assert!(arg.dependencies().is_empty());
    }
}
