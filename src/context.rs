use crate::{Provenance, TaskId};

/// Handed to every task body while it runs.
///
/// It gives the task its own name, the tracker of the current run, and the
/// tracing span the executor opened for it.
pub struct TaskContext<'a> {
    pub(crate) task: &'a TaskId,
    pub(crate) tracker: &'a Provenance,
    pub(crate) span: tracing::Span,
}

impl<'a> TaskContext<'a> {
    pub fn name(&self) -> &TaskId {
        self.task
    }

    pub fn tracker(&self) -> &'a Provenance {
        self.tracker
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Shortcut for [`Provenance::record_read`].
    pub fn record_read(&self, artifact: impl AsRef<str>) {
        self.tracker.record_read(artifact);
    }

    /// Shortcut for [`Provenance::record_write`].
    pub fn record_write(&self, artifact: impl AsRef<str>) {
        self.tracker.record_write(artifact);
    }
}
