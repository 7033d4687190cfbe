//! Task lookup on workers.
//!
//! The registry is code, not data: it holds closures and is never serialized.
//! Clients submit task names; every worker builds the same registry from the
//! same task definitions.
//!
//! ```rust,ignore
//! fn build_registry() -> TaskRegistry<JsonCodec> {
//!     TaskRegistry::new()
//!         .with_task(tasks::add())
//!         .with_task(tasks::count_down())
//! }
//! ```

use crate::task::Task;
use std::collections::HashMap;

/// Maps task names to their implementations.
pub struct TaskRegistry<C> {
    tasks: HashMap<String, Task<C>>,
}

impl<C> Default for TaskRegistry<C> {
    fn default() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }
}

impl<C> TaskRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` under its name, returning the task it replaces.
    pub fn register(&mut self, task: Task<C>) -> Option<Task<C>> {
        let previous = self.tasks.insert(task.name().to_string(), task);
        if let Some(previous) = &previous {
            tracing::warn!(task = previous.name(), "Replacing registered task");
        }
        previous
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with_task(mut self, task: Task<C>) -> Self {
        self.register(task);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Task<C>> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Registered task names, sorted.
    pub fn task_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
