use std::borrow::Borrow;
use std::fmt::{Debug, Display};
use std::sync::Arc;

use serde::Serialize;

use crate::TaskContext;

/// Atomic reference-counted string type used for identifiers.
pub(crate) type ArcStr = Arc<str>;

/// Result from a single executed task.
pub type TaskResult<T = ()> = anyhow::Result<T>;

/// Task function pointer. The function is provided by the user from the
/// userland, the kernel only ever calls it through a shared reference.
pub(crate) type TaskFnPtr = Arc<dyn Fn(&TaskContext<'_>) -> TaskResult + Send + Sync>;

/// Stable identity of a task, the name it was registered under.
///
/// Cloning is cheap, the name is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(ArcStr);

impl TaskId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for TaskId {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for TaskId {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&*self.0, f)
    }
}

/// An executable unit of work: a name and the function that does the work.
///
/// The function receives a [`TaskContext`] which it can use to report the
/// artifacts it reads and writes.
#[derive(Clone)]
pub struct Task {
    id: TaskId,
    func: TaskFnPtr,
}

impl Task {
    pub fn new<F>(id: impl Into<TaskId>, func: F) -> Self
    where
        F: Fn(&TaskContext<'_>) -> TaskResult + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            func: Arc::new(func),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub(crate) fn call(&self, context: &TaskContext<'_>) -> TaskResult {
        (self.func)(context)
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.id)
    }
}
