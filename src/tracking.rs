//! Execution context and artifact provenance.
//!
//! A [`Provenance`] value answers two questions about a run: which task is
//! executing right now, and which task touched which artifact. The executor
//! marks the current task, while I/O helpers report every read and write of a
//! durable artifact through [`Provenance::record_read`] and
//! [`Provenance::record_write`].
//!
//! ## Records
//!
//! Every access is appended to a log as an [`IoRecord`]. Along with the
//! artifact and the task, the record holds a short snapshot of the call stack
//! at the moment of access, so that it is possible to tell which helper path
//! caused the I/O. Frames of the recording machinery are left out, and only
//! the most recent few frames are kept.
//!
//! Frames are recognised by their symbol names, so snapshots are only
//! meaningful in builds with debuginfo and without heavy optimization. In an
//! optimized build, callers may be inlined away and the kept frames can end up
//! pointing at whatever survived, such as the test harness or `main`. The
//! artifact, task and operation of a record are exact in every build.
//!
//! ## Writers
//!
//! Writes made while a task is active also update the writer index, which maps
//! each artifact to the last task that wrote it. Writes made outside of any
//! task are still logged, but leave the index alone.
//!
//! The state is shared between clones of the same `Provenance`, and it is
//! only ever reset explicitly, through [`Provenance::clear_tracking`].
//! Running tasks concurrently against the same tracker is not supported, the
//! current task slot is a single slot.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8Path;
use serde::Serialize;

use crate::TaskId;
use crate::core::ArcStr;
use crate::error::StoreError;

/// Number of call frames kept in every [`IoRecord`] by default.
pub const STACK_DEPTH: usize = 5;

/// Kind of access made to an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Read => f.write_str("read"),
            Operation::Write => f.write_str("write"),
        }
    }
}

/// A single logged access to an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IoRecord {
    /// Opaque artifact reference, usually a path or a dataset name.
    #[serde(rename = "asset")]
    pub artifact: ArcStr,
    /// Task active at the time of access, if any.
    pub task: Option<TaskId>,
    pub op: Operation,
    /// Most recent call frames, oldest first, formatted as `function (file:line)`.
    pub stack: Vec<String>,
}

#[derive(Debug, Default)]
struct TrackerState {
    current: Option<TaskId>,
    writers: BTreeMap<ArcStr, TaskId>,
    records: Vec<IoRecord>,
}

/// Shared handle to the execution context and the provenance log of a run.
///
/// Cloning is cheap, all clones observe the same state.
#[derive(Debug, Clone)]
pub struct Provenance {
    ptr: Arc<Mutex<TrackerState>>,
    depth: usize,
}

impl Default for Provenance {
    fn default() -> Self {
        Self::new()
    }
}

impl Provenance {
    pub fn new() -> Self {
        Self::with_depth(STACK_DEPTH)
    }

    /// Creates a tracker which keeps `depth` call frames per record.
    pub fn with_depth(depth: usize) -> Self {
        Self {
            ptr: Default::default(),
            depth,
        }
    }

    // Recording must never fail, a panic while holding the lock leaves the
    // state consistent because every mutation is a single push or insert.
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.ptr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrites the current task slot and returns the previous value.
    pub fn set_current_task(&self, task: Option<TaskId>) -> Option<TaskId> {
        std::mem::replace(&mut self.lock().current, task)
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.lock().current.clone()
    }

    /// Marks `task` as current until the returned guard is dropped, at which
    /// point the previous value is put back.
    pub(crate) fn enter(&self, task: TaskId) -> CurrentTask<'_> {
        let previous = self.set_current_task(Some(task));
        CurrentTask {
            tracker: self,
            previous,
        }
    }

    /// Records that the current task wrote `artifact`.
    pub fn record_write(&self, artifact: impl AsRef<str>) {
        self.record(artifact.as_ref(), Operation::Write);
    }

    /// Records that the current task read `artifact`.
    pub fn record_read(&self, artifact: impl AsRef<str>) {
        self.record(artifact.as_ref(), Operation::Read);
    }

    #[inline(never)]
    fn record(&self, artifact: &str, op: Operation) {
        let stack = capture_stack(self.depth);
        let artifact = ArcStr::from(artifact);

        let mut state = self.lock();
        let task = state.current.clone();

        if op == Operation::Write
            && let Some(task) = &task
        {
            state.writers.insert(artifact.clone(), task.clone());
        }

        tracing::debug!(%artifact, task = ?task, %op, "recorded access");

        state.records.push(IoRecord {
            artifact,
            task,
            op,
            stack,
        });
    }

    /// Returns the task which most recently wrote `artifact`.
    pub fn writer(&self, artifact: &str) -> Option<TaskId> {
        self.lock().writers.get(artifact).cloned()
    }

    /// Returns every artifact whose last writer is `task`, sorted by name.
    pub fn assets_by_writer(&self, task: &str) -> Vec<Arc<str>> {
        self.lock()
            .writers
            .iter()
            .filter(|(_, writer)| *writer == task)
            .map(|(artifact, _)| artifact.clone())
            .collect()
    }

    /// Returns the artifacts read by `task`, in the order of access.
    pub fn reads_by_task(&self, task: &str) -> Vec<Arc<str>> {
        self.accesses_by_task(task, Operation::Read)
    }

    /// Returns the artifacts written by `task`, in the order of access. Unlike
    /// [`assets_by_writer`](Self::assets_by_writer) this comes from the log, so
    /// artifacts later overwritten by other tasks are included.
    pub fn writes_by_task(&self, task: &str) -> Vec<Arc<str>> {
        self.accesses_by_task(task, Operation::Write)
    }

    fn accesses_by_task(&self, task: &str, op: Operation) -> Vec<Arc<str>> {
        self.lock()
            .records
            .iter()
            .filter(|record| record.op == op && record.task.as_ref().is_some_and(|t| t == task))
            .map(|record| record.artifact.clone())
            .collect()
    }

    /// Returns the logged records in arrival order, optionally only those made
    /// by `task`.
    pub fn io_records(&self, task: Option<&str>) -> Vec<IoRecord> {
        let state = self.lock();

        match task {
            None => state.records.clone(),
            Some(task) => state
                .records
                .iter()
                .filter(|record| record.task.as_ref().is_some_and(|t| t == task))
                .cloned()
                .collect(),
        }
    }

    /// Empties the writer index and the record log. The current task slot is
    /// left untouched.
    pub fn clear_tracking(&self) {
        let mut state = self.lock();
        state.writers.clear();
        state.records.clear();
    }

    /// Serializes the full record log as a JSON array.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.lock().records)
    }

    /// Writes the full record log to `path` as JSON.
    pub fn write_json(&self, path: impl AsRef<Utf8Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let json = self.to_json()?;

        std::fs::write(path, json).map_err(|source| StoreError::Io {
            path: path.to_owned(),
            source,
        })
    }
}

/// Guard returned by [`Provenance::enter`].
pub(crate) struct CurrentTask<'a> {
    tracker: &'a Provenance,
    previous: Option<TaskId>,
}

impl Drop for CurrentTask<'_> {
    fn drop(&mut self) {
        self.tracker.set_current_task(self.previous.take());
    }
}

const INTERNAL: &[&str] = &[
    "backtrace::",
    concat!(module_path!(), "::capture_stack"),
    concat!(module_path!(), "::Provenance::record"),
    concat!(env!("CARGO_CRATE_NAME"), "::context::TaskContext::record_"),
    concat!(env!("CARGO_CRATE_NAME"), "::store::Store::"),
];

fn is_internal(name: &str) -> bool {
    INTERNAL.iter().any(|prefix| name.starts_with(prefix))
}

/// Captures at most `depth` call frames above the recording functions,
/// oldest first.
#[inline(never)]
fn capture_stack(depth: usize) -> Vec<String> {
    let mut frames = Vec::with_capacity(depth);
    let mut past_internal = false;

    if depth == 0 {
        return frames;
    }

    backtrace::trace(|frame| {
        backtrace::resolve_frame(frame, |symbol| {
            let name = symbol.name().map(|name| format!("{name:#}"));

            // Anything seen so far is part of the capturing machinery.
            if name.as_deref().is_some_and(is_internal) {
                frames.clear();
                past_internal = true;
                return;
            }

            frames.push(format_frame(name.as_deref(), symbol.filename(), symbol.lineno()));
        });

        !(past_internal && frames.len() >= depth)
    });

    frames.truncate(depth);
    frames.reverse();
    frames
}

fn format_frame(name: Option<&str>, file: Option<&Path>, line: Option<u32>) -> String {
    let name = name.unwrap_or("<unknown>");
    let file = file
        .and_then(Path::file_name)
        .map(|file| file.to_string_lossy())
        .unwrap_or_else(|| "<unknown>".into());

    match line {
        Some(line) => format!("{name} ({file}:{line})"),
        None => format!("{name} ({file})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn save_helper(tracker: &Provenance, artifact: &str) {
        tracker.record_write(artifact);
    }

    #[test]
    fn test_clear_then_query_is_empty() {
        let tracker = Provenance::new();
        tracker.set_current_task(Some("fetch_a".into()));
        tracker.record_write("raw/a.json");
        tracker.record_read("raw/b.json");

        tracker.clear_tracking();

        assert_eq!(tracker.writer("raw/a.json"), None);
        assert!(tracker.assets_by_writer("fetch_a").is_empty());
        assert!(tracker.reads_by_task("fetch_a").is_empty());
        assert!(tracker.writes_by_task("fetch_a").is_empty());
        assert!(tracker.io_records(None).is_empty());
        // the slot is not part of the trace
        assert_eq!(tracker.current_task(), Some("fetch_a".into()));
    }

    #[test]
    fn test_write_updates_writer() {
        let tracker = Provenance::new();
        tracker.set_current_task(Some("fetch_a".into()));
        tracker.record_write("a");

        assert_eq!(tracker.writer("a"), Some("fetch_a".into()));

        tracker.set_current_task(Some("fetch_b".into()));
        tracker.record_write("a");

        assert_eq!(tracker.writer("a"), Some("fetch_b".into()));
        assert!(tracker.assets_by_writer("fetch_a").is_empty());
        assert_eq!(tracker.writes_by_task("fetch_a"), vec![Arc::from("a")]);
    }

    #[test]
    fn test_write_without_task_keeps_writer() {
        let tracker = Provenance::new();
        tracker.set_current_task(Some("fetch_a".into()));
        tracker.record_write("a");
        tracker.set_current_task(None);
        tracker.record_write("a");
        tracker.record_write("b");

        assert_eq!(tracker.writer("a"), Some("fetch_a".into()));
        assert_eq!(tracker.writer("b"), None);

        // still logged
        let records = tracker.io_records(None);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].task, None);
        assert_eq!(records[2].op, Operation::Write);
    }

    #[test]
    fn test_records_keep_arrival_order() {
        let tracker = Provenance::new();
        tracker.set_current_task(Some("t1".into()));
        tracker.record_read("x");
        tracker.set_current_task(Some("t2".into()));
        tracker.record_write("y");
        tracker.set_current_task(Some("t1".into()));
        tracker.record_write("z");

        let all: Vec<_> = tracker
            .io_records(None)
            .into_iter()
            .map(|r| (r.artifact.to_string(), r.op))
            .collect();

        assert_eq!(
            all,
            vec![
                ("x".to_string(), Operation::Read),
                ("y".to_string(), Operation::Write),
                ("z".to_string(), Operation::Write),
            ]
        );

        let t1 = tracker.io_records(Some("t1"));
        assert_eq!(t1.len(), 2);
        assert!(t1.iter().all(|r| r.task.as_ref().is_some_and(|t| t == "t1")));
        assert_eq!(tracker.reads_by_task("t1"), vec![Arc::from("x")]);
        assert_eq!(tracker.writes_by_task("t1"), vec![Arc::from("z")]);
        assert!(tracker.io_records(Some("t3")).is_empty());
    }

    #[test]
    fn test_assets_by_writer_sorted() {
        let tracker = Provenance::new();
        tracker.set_current_task(Some("t".into()));
        tracker.record_write("b");
        tracker.record_write("a");

        assert_eq!(
            tracker.assets_by_writer("t"),
            vec![Arc::from("a"), Arc::from("b")]
        );
    }

    #[test]
    fn test_stack_is_bounded() {
        let tracker = Provenance::new();
        save_helper(&tracker, "raw/a.json");

        let record = &tracker.io_records(None)[0];

        assert!(record.stack.len() <= STACK_DEPTH);
        assert!(record.stack.iter().all(|frame| !frame.starts_with("backtrace::")));
        assert_eq!(record.op, Operation::Write);
        assert_eq!(&*record.artifact, "raw/a.json");
    }

    // Attribution relies on symbol names, which optimized builds don't keep.
    #[cfg(debug_assertions)]
    #[test]
    fn test_stack_points_at_caller() {
        let tracker = Provenance::new();
        save_helper(&tracker, "raw/a.json");

        let record = &tracker.io_records(None)[0];

        assert!(!record.stack.is_empty());
        assert!(record.stack.last().unwrap().contains("save_helper"));
        assert!(record.stack.iter().all(|frame| !frame.contains("record_write")));
        assert!(record.stack.iter().all(|frame| !frame.contains("capture_stack")));
    }

    #[test]
    fn test_stack_depth_is_configurable() {
        let tracker = Provenance::with_depth(2);
        save_helper(&tracker, "a");
        assert!(tracker.io_records(None)[0].stack.len() <= 2);

        let tracker = Provenance::with_depth(0);
        save_helper(&tracker, "a");
        assert!(tracker.io_records(None)[0].stack.is_empty());
    }

    #[test]
    fn test_guard_restores_previous() {
        let tracker = Provenance::new();
        tracker.set_current_task(Some("outer".into()));

        {
            let _guard = tracker.enter("inner".into());
            assert_eq!(tracker.current_task(), Some("inner".into()));
        }

        assert_eq!(tracker.current_task(), Some("outer".into()));
    }

    #[test]
    fn test_clones_share_state() {
        let tracker = Provenance::new();
        let clone = tracker.clone();
        clone.set_current_task(Some("t".into()));
        clone.record_write("a");

        assert_eq!(tracker.writer("a"), Some("t".into()));
        assert_eq!(tracker.io_records(None).len(), 1);
    }

    #[test]
    fn test_json_uses_short_keys() {
        let tracker = Provenance::with_depth(0);
        tracker.set_current_task(Some("t".into()));
        tracker.record_read("a");

        let json: serde_json::Value = serde_json::from_str(&tracker.to_json().unwrap()).unwrap();

        assert_eq!(
            json,
            serde_json::json!([{ "asset": "a", "task": "t", "op": "read", "stack": [] }])
        );
    }
}
