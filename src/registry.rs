use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::{GraphError, Task, TaskId};

/// What to do when a task name is declared by more than one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Fail with [`GraphError::Duplicate`].
    #[default]
    Reject,
    /// The later declaration replaces the earlier one in place.
    Overwrite,
}

/// A registered task along with the tasks it depends on.
#[derive(Debug, Clone)]
pub struct Entry {
    pub task: Task,
    pub dependencies: Vec<TaskId>,
    /// Name of the unit which declared the task.
    pub unit: Arc<str>,
}

/// Mapping from task identity to its dependencies, in declaration order.
///
/// The registry does not check that dependencies exist or that there are no
/// cycles, that is done once the graph is built.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Entry>,
    index: HashMap<TaskId, usize>,
    policy: DuplicatePolicy,
}

impl Registry {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            policy,
        }
    }

    /// Adds a task row. If the name is already taken, the duplicate policy
    /// decides between failing and replacing the old row in its position.
    pub fn insert(
        &mut self,
        unit: impl Into<Arc<str>>,
        task: Task,
        dependencies: Vec<TaskId>,
    ) -> Result<(), GraphError> {
        let entry = Entry {
            task,
            dependencies,
            unit: unit.into(),
        };

        match self.index.get(entry.task.id()) {
            None => {
                self.index.insert(entry.task.id().clone(), self.entries.len());
                self.entries.push(entry);
            }
            Some(&i) => match self.policy {
                DuplicatePolicy::Reject => {
                    return Err(GraphError::Duplicate {
                        task: entry.task.id().clone(),
                        first: self.entries[i].unit.to_string(),
                        second: entry.unit.to_string(),
                    });
                }
                DuplicatePolicy::Overwrite => {
                    tracing::warn!(
                        task = %entry.task.id(),
                        first = %self.entries[i].unit,
                        second = %entry.unit,
                        "task declared twice, keeping the later declaration"
                    );
                    self.entries[i] = entry;
                }
            },
        }

        Ok(())
    }

    /// Adds the two rows a producer/transform pair stands for: the producer
    /// with no dependencies, and the transform depending on the producer.
    pub fn insert_pair(
        &mut self,
        unit: &str,
        producer: Task,
        transform: Option<Task>,
    ) -> Result<(), GraphError> {
        let producer_id = producer.id().clone();
        self.insert(unit, producer, vec![])?;

        if let Some(transform) = transform {
            self.insert(unit, transform, vec![producer_id])?;
        }

        Ok(())
    }

    pub fn get(&self, task: &str) -> Option<&Entry> {
        self.index.get(task).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, task: &str) -> bool {
        self.index.contains_key(task)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of dependency edges across all rows.
    pub fn edges(&self) -> usize {
        self.entries.iter().map(|e| e.dependencies.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub(crate) fn into_entries(self) -> Vec<Entry> {
        self.entries
    }
}
