use std::collections::HashMap;

use crate::{Task, TaskContext, TaskId, TaskResult};

/// Task functions known to the program, looked up by name when unit
/// manifests are loaded.
///
/// The catalog is filled in code at program start, which is what makes a
/// task available to the manifests found on disk.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    tasks: HashMap<TaskId, Task>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task function under `name`, replacing any previous
    /// function with the same name.
    pub fn add<F>(&mut self, name: impl Into<TaskId>, func: F) -> &mut Self
    where
        F: Fn(&TaskContext<'_>) -> TaskResult + Send + Sync + 'static,
    {
        let task = Task::new(name, func);
        self.tasks.insert(task.id().clone(), task);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let mut catalog = Catalog::new();
        catalog.add("fetch", |_| Ok(())).add("save", |_| Ok(()));

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("fetch").unwrap().id(), "fetch");
        assert!(catalog.get("publish").is_none());
    }
}
