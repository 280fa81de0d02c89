mod diagnostics;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::graph::Dag;
use crate::{Error, Provenance, Task, TaskContext, TaskId, TaskResult};

pub use diagnostics::Diagnostics;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub task: TaskId,
    pub start: Instant,
    pub duration: Duration,
}

impl Dag {
    /// Runs every task once, one at a time, in the order computed when the
    /// graph was built.
    ///
    /// Before a task body is called, the task is marked as current on
    /// `tracker`. Once it returns, fails or panics, the previous current task
    /// is put back. The first failing task stops the run: the remaining tasks
    /// are not started and the error is returned. Effects of the tasks which
    /// already completed are kept.
    ///
    /// The tracker is not cleared here, callers decide when a trace should be
    /// discarded.
    pub fn run(&self, tracker: &Provenance) -> Result<Diagnostics, Error> {
        let s = Instant::now();
        let total = self.order.len();
        let mut executions = Vec::with_capacity(total);

        if total == 0 {
            tracing::info!("no tasks to run");
            return Ok(Diagnostics::default());
        }

        let root_span = tracing::span!(Level::INFO, "running_tasks");
        root_span.pb_set_length(total as u64);
        root_span.pb_set_style(&crate::utils::STYLE_MAIN);
        root_span.pb_set_message("Running tasks...");
        let _enter = root_span.enter();

        for &index in &self.order {
            let task = &self.graph[index];

            let span = tracing::span!(Level::INFO, "task", name = %task.id());
            span.pb_set_style(&crate::utils::STYLE_TASK);
            span.pb_set_message(&format!("Running {}", task.id()));
            let _enter = span.enter();

            let context = TaskContext {
                task: task.id(),
                tracker,
                span: span.clone(),
            };

            let start = Instant::now();
            let result = {
                let _current = tracker.enter(task.id().clone());
                call(task, &context)
            };
            let duration = start.elapsed();

            if let Err(source) = result {
                tracing::error!(task = %task.id(), "task failed, aborting the run: {source:#}");
                return Err(Error::Task {
                    task: task.id().clone(),
                    source,
                });
            }

            tracing::debug!(task = %task.id(), ?duration, "task finished");
            executions.push(TaskExecution {
                task: task.id().clone(),
                start,
                duration,
            });
            root_span.pb_inc(1);
        }

        tracing::info!("finished {} tasks {}", total, crate::utils::as_overhead(s));
        Ok(Diagnostics { executions })
    }
}

fn call(task: &Task, context: &TaskContext<'_>) -> TaskResult {
    // A panicking task is treated like a failing one. The tracker recovers
    // from a poisoned lock, so nothing shared is left in a broken state.
    match catch_unwind(AssertUnwindSafe(|| task.call(context))) {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                format!("Task panicked: {s}")
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("Task panicked: {s}")
            } else {
                String::from("Task panicked with unknown payload")
            };

            Err(anyhow::anyhow!(msg))
        }
    }
}
