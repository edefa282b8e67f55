//! # Async Tasks
//!
//! Each spawned task runs on its own OS thread inside a fresh child region
//! whose depth is one more than the spawning region's. The child region is
//! exited when the task body returns, so a task's own subtasks are joined
//! before the task itself is reported complete.
//!
//! Handles are owned by the spawning [`Region`] and joined, in spawn order,
//! when it exits. There is no cancellation and joins do not time out.

use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::RuntimeConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::ordering::RegionHandle;
use crate::panic::{catch_panic_unchecked, payload_message};
use crate::recovery;
use crate::region::Region;

/// Unique identifier for an async task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a new unique task ID.
pub fn next_task_id() -> TaskId {
    TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The body returned `Ok` and the child region exited cleanly.
    Completed,
    /// The body, or the child region's exit, returned an error.
    Failed(RuntimeError),
    /// The task thread panicked.
    Panicked(String),
}

impl TaskOutcome {
    /// Whether the task completed normally.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }

    /// Description of the failure, if any.
    pub fn failure(&self) -> Option<String> {
        match self {
            TaskOutcome::Completed => None,
            TaskOutcome::Failed(err) => Some(err.to_string()),
            TaskOutcome::Panicked(message) => Some(format!("task panicked: {}", message)),
        }
    }
}

/// Handle to a running task, owned by the region that spawned it.
pub struct AsyncTask {
    id: TaskId,
    parent: RegionHandle,
    handle: JoinHandle<TaskOutcome>,
}

impl AsyncTask {
    /// The task's identifier.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The region that spawned the task.
    pub fn parent(&self) -> RegionHandle {
        self.parent
    }

    /// Name of the task's thread.
    pub fn name(&self) -> Option<&str> {
        self.handle.thread().name()
    }

    /// Whether the task body has finished running.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the task ends.
    pub fn join(self) -> TaskOutcome {
        match self.handle.join() {
            Ok(outcome) => outcome,
            Err(payload) => TaskOutcome::Panicked(payload_message(payload.as_ref())),
        }
    }
}

impl fmt::Debug for AsyncTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTask")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("name", &self.name())
            .finish()
    }
}

/// Start `func(child, arg)` on a new thread.
#[track_caller]
pub(crate) fn spawn_task<A, F>(
    parent: RegionHandle,
    config: Arc<RuntimeConfig>,
    func: F,
    arg: A,
) -> RuntimeResult<AsyncTask>
where
    A: Send + 'static,
    F: FnOnce(&Region, A) -> RuntimeResult<()> + Send + 'static,
{
    let id = next_task_id();
    let location = Location::caller();

    let mut builder =
        thread::Builder::new().name(format!("{}-{}", config.tasks.thread_name_prefix, id.0));
    if let Some(size) = config.tasks.stack_size {
        builder = builder.stack_size(size);
    }

    let handle = builder
        .spawn(move || run_task(parent, config, location, func, arg))
        .map_err(|e| {
            tracing::warn!(task = %id, parent = %parent, error = %e, "failed to spawn task thread");
            RuntimeError::SpawnFailed {
                message: e.to_string(),
            }
        })?;

    Ok(AsyncTask { id, parent, handle })
}

fn run_task<A, F>(
    parent: RegionHandle,
    config: Arc<RuntimeConfig>,
    location: &'static Location<'static>,
    func: F,
    arg: A,
) -> TaskOutcome
where
    F: FnOnce(&Region, A) -> RuntimeResult<()>,
{
    recovery::set_base_depth(parent.depth() + 1);
    let child = Region::enter_shared(config, location);

    let result = catch_panic_unchecked(|| func(&child, arg));
    let exit = child.exit();

    match (result, exit) {
        (Ok(Ok(())), Ok(())) => TaskOutcome::Completed,
        (Ok(Err(err)), _) => TaskOutcome::Failed(err),
        (Ok(Ok(())), Err(err)) => TaskOutcome::Failed(err),
        (Err(message), _) => TaskOutcome::Panicked(message),
    }
}

/// Join every task in order.
///
/// All tasks are joined even when an earlier one failed; the first failure
/// is reported afterwards.
pub(crate) fn join_all(tasks: Vec<AsyncTask>) -> RuntimeResult<()> {
    let total = tasks.len();
    let mut failed = 0;
    let mut first = None;

    for task in tasks {
        let id = task.id();
        let outcome = task.join();
        match outcome.failure() {
            None => tracing::trace!(task = %id, "async task joined"),
            Some(failure) => {
                tracing::warn!(task = %id, failure = %failure, "async task failed");
                failed += 1;
                first.get_or_insert(failure);
            }
        }
    }

    match first {
        None => Ok(()),
        Some(first) => Err(RuntimeError::TaskFailed {
            failed,
            total,
            first,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_task_ids_unique() {
        let a = next_task_id();
        let b = next_task_id();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(a.to_string(), format!("Task({})", a.as_u64()));
    }

    #[test]
    fn test_outcome_failure() {
        assert!(TaskOutcome::Completed.is_success());
        assert_eq!(TaskOutcome::Completed.failure(), None);

        let failed = TaskOutcome::Failed(RuntimeError::Explicit {
            message: "bad".into(),
        });
        assert_eq!(failed.failure().as_deref(), Some("bad"));

        let panicked = TaskOutcome::Panicked("boom".into());
        assert_eq!(panicked.failure().as_deref(), Some("task panicked: boom"));
    }

    #[test]
    fn test_child_region_depth() {
        let parent = Region::enter();
        let parent_depth = parent.depth();
        let seen = Arc::new(AtomicUsize::new(usize::MAX));

        let seen_task = seen.clone();
        parent
            .spawn(
                move |child, _: ()| {
                    seen_task.store(child.depth() as usize, Ordering::SeqCst);
                    Ok(())
                },
                (),
            )
            .unwrap();

        parent.exit().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), parent_depth as usize + 1);
    }

    #[test]
    fn test_thread_name_uses_prefix() {
        let config = Arc::new(
            RuntimeConfig::builder()
                .thread_name_prefix("unit")
                .build()
                .unwrap(),
        );
        let parent = RegionHandle::new(crate::ordering::next_region_id(), 0);
        let task = spawn_task(
            parent,
            config,
            |_, _: ()| {
                thread::sleep(Duration::from_millis(5));
                Ok(())
            },
            (),
        )
        .unwrap();

        let expected = format!("unit-{}", task.id().as_u64());
        assert_eq!(task.name(), Some(expected.as_str()));
        assert_eq!(task.join(), TaskOutcome::Completed);
    }

    #[test]
    fn test_join_all_reports_first_failure() {
        let config = Arc::new(RuntimeConfig::default());
        let parent = RegionHandle::new(crate::ordering::next_region_id(), 0);
        let finished = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..3u32 {
            let finished = finished.clone();
            tasks.push(
                spawn_task(
                    parent,
                    config.clone(),
                    move |region, n: u32| {
                        thread::sleep(Duration::from_millis(10));
                        finished.fetch_add(1, Ordering::SeqCst);
                        match n {
                            0 => Err(region.panic("first")),
                            1 => panic!("second"),
                            _ => Ok(()),
                        }
                    },
                    i,
                )
                .unwrap(),
            );
        }

        let err = join_all(tasks).unwrap_err();
        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(
            err,
            RuntimeError::TaskFailed {
                failed: 2,
                total: 3,
                first: "first".into(),
            }
        );
    }
}
