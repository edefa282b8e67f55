//! # Regions
//!
//! A region is an arena-like lifetime scope: an ordered chain of frames, a
//! nesting depth, a recovery point, and the handles of the async tasks it
//! spawned. Everything allocated from a region is released at once when the
//! region exits; there is no per-object free.
//!
//! ## Lifecycle
//!
//! ```text
//! Region::enter()      push recovery point, assign depth, register as live
//!   ├─ alloc(..)       bump-allocate, growing the frame chain on demand
//!   ├─ spawn(..)       start a task in its own child region
//!   └─ exit()          join tasks (spawn order) → unregister → release frames
//! ```
//!
//! A region that is dropped without an explicit `exit` performs the same
//! teardown, so unwinding through a region scope never leaks frames or
//! leaves tasks unjoined.
//!
//! Regions are bound to the thread that entered them: they are neither
//! `Send` nor `Sync`, which keeps allocator state single-threaded and lock
//! free. Tasks allocate only from their own child regions.

use std::alloc::Layout;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::panic::Location;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::frame::{FrameChain, GrowthFailure, MAX_ALIGN};
use crate::ordering::{next_region_id, Depth, RegionHandle, RegionId, RegionScoped};
use crate::recovery::{self, RecoveryPoint};
use crate::registry::liveness_registry;
use crate::task::{self, AsyncTask, TaskId};
use crate::value::{ArraySlice, FatPtr};

/// Snapshot of a region's storage and task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionStats {
    /// Number of frames in the chain.
    pub frames: usize,
    /// Sum of frame capacities in bytes.
    pub capacity: usize,
    /// Bytes consumed, including alignment padding.
    pub used: usize,
    /// Spawned tasks not yet joined.
    pub outstanding_tasks: usize,
}

/// A lifetime-scoped arena.
pub struct Region {
    recovery: RecoveryPoint,
    frames: RefCell<FrameChain>,
    tasks: RefCell<Vec<AsyncTask>>,
    config: Arc<RuntimeConfig>,
    torn_down: bool,
    _not_send: PhantomData<*const ()>,
}

impl Region {
    /// Enter a new region using the global runtime configuration.
    #[track_caller]
    pub fn enter() -> Self {
        match crate::runtime_config() {
            Some(config) => Self::enter_at(config, Location::caller()),
            None => Self::enter_at(&RuntimeConfig::default(), Location::caller()),
        }
    }

    /// Enter a new region with an explicit configuration.
    #[track_caller]
    pub fn enter_with(config: &RuntimeConfig) -> Self {
        Self::enter_at(config, Location::caller())
    }

    pub(crate) fn enter_at(config: &RuntimeConfig, location: &'static Location<'static>) -> Self {
        Self::enter_shared(Arc::new(config.clone()), location)
    }

    pub(crate) fn enter_shared(config: Arc<RuntimeConfig>, location: &'static Location<'static>) -> Self {
        let id = next_region_id();
        let recovery = recovery::install(id, location);
        liveness_registry().register(recovery.region);

        let memory = &config.memory;
        let frames = FrameChain::new(
            memory.initial_frame_capacity,
            memory.region_limit(),
            memory.poison_on_exit,
        );

        tracing::debug!(
            region = %id,
            depth = recovery.region.depth(),
            at = %location,
            "region entered"
        );

        Self {
            recovery,
            frames: RefCell::new(frames),
            tasks: RefCell::new(Vec::new()),
            config,
            torn_down: false,
            _not_send: PhantomData,
        }
    }

    /// The region's handle (identity and depth).
    pub fn handle(&self) -> RegionHandle {
        self.recovery.region
    }

    /// The region's identifier.
    pub fn id(&self) -> RegionId {
        self.recovery.region.id()
    }

    /// The region's nesting depth.
    pub fn depth(&self) -> Depth {
        self.recovery.region.depth()
    }

    /// The recovery point installed when the region was entered.
    pub fn recovery_point(&self) -> RecoveryPoint {
        self.recovery
    }

    /// The configuration this region was entered with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Allocate `size` bytes aligned to [`MAX_ALIGN`].
    ///
    /// The storage stays valid until the region exits. Failure to obtain
    /// backing storage is a region panic.
    pub fn alloc(&self, size: usize) -> RuntimeResult<NonNull<u8>> {
        self.alloc_raw(size, MAX_ALIGN)
    }

    /// Allocate storage for an arbitrary layout.
    pub fn alloc_layout(&self, layout: Layout) -> RuntimeResult<NonNull<u8>> {
        self.alloc_raw(layout.size(), layout.align())
    }

    fn alloc_raw(&self, size: usize, align: usize) -> RuntimeResult<NonNull<u8>> {
        self.frames
            .borrow_mut()
            .alloc(size, align)
            .map_err(|failure| self.allocation_failed(size, failure))
    }

    fn allocation_failed(&self, requested: usize, failure: GrowthFailure) -> RuntimeError {
        tracing::warn!(
            region = %self.id(),
            requested,
            reason = ?failure,
            "region allocation failed"
        );
        RuntimeError::AllocationFailed {
            requested,
            region: self.id(),
        }
    }

    /// Allocate a single value.
    ///
    /// Only `Copy` types are accepted: region storage is released without
    /// running destructors.
    pub fn alloc_value<T: Copy>(&self, value: T) -> RuntimeResult<FatPtr<T>> {
        let data = self.alloc_layout(Layout::new::<T>())?.cast::<T>();
        // SAFETY: freshly allocated, properly aligned storage for one T.
        unsafe {
            data.as_ptr().write(value);
            Ok(FatPtr::from_raw_parts(data, self.handle()))
        }
    }

    /// Allocate an array of `count` elements, each initialized to `fill`.
    pub fn alloc_array<T: Copy>(&self, count: usize, fill: T) -> RuntimeResult<ArraySlice<T>> {
        let data = self.alloc_array_storage::<T>(count)?;
        // SAFETY: storage holds `count` properly aligned elements.
        unsafe {
            for i in 0..count {
                data.as_ptr().add(i).write(fill);
            }
            Ok(ArraySlice::from_raw_parts(data, self.handle(), count))
        }
    }

    /// Allocate an array holding a copy of `items` (array literals).
    pub fn alloc_slice<T: Copy>(&self, items: &[T]) -> RuntimeResult<ArraySlice<T>> {
        let data = self.alloc_array_storage::<T>(items.len())?;
        // SAFETY: storage holds `items.len()` elements and cannot overlap
        // `items`, which lives outside this fresh allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(items.as_ptr(), data.as_ptr(), items.len());
            Ok(ArraySlice::from_raw_parts(data, self.handle(), items.len()))
        }
    }

    fn alloc_array_storage<T>(&self, count: usize) -> RuntimeResult<NonNull<T>> {
        let layout = Layout::array::<T>(count).map_err(|_| {
            self.allocation_failed(usize::MAX, GrowthFailure::Overflow)
        })?;
        Ok(self.alloc_layout(layout)?.cast::<T>())
    }

    /// Raise an explicit panic from compiled code.
    ///
    /// Returns the error to propagate; the caller must not continue.
    #[track_caller]
    pub fn panic(&self, message: impl Into<String>) -> RuntimeError {
        let message = message.into();
        tracing::debug!(
            region = %self.id(),
            at = %Location::caller(),
            "region panic: {}",
            message
        );
        RuntimeError::Explicit { message }
    }

    /// Spawn `func(child, arg)` on a new thread inside a fresh child region.
    ///
    /// Returns immediately. The task is joined when this region exits.
    #[track_caller]
    pub fn spawn<A, F>(&self, func: F, arg: A) -> RuntimeResult<TaskId>
    where
        A: Send + 'static,
        F: FnOnce(&Region, A) -> RuntimeResult<()> + Send + 'static,
    {
        let task = task::spawn_task(self.handle(), Arc::clone(&self.config), func, arg)?;
        let id = task.id();
        tracing::trace!(region = %self.id(), task = %id, "async task spawned");
        self.tasks.borrow_mut().push(task);
        Ok(id)
    }

    /// Number of spawned tasks not yet joined.
    pub fn outstanding_tasks(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Current storage and task statistics.
    pub fn stats(&self) -> RegionStats {
        let frames = self.frames.borrow();
        RegionStats {
            frames: frames.frame_count(),
            capacity: frames.total_capacity(),
            used: frames.total_used(),
            outstanding_tasks: self.outstanding_tasks(),
        }
    }

    /// Capacities of all frames, most recent first.
    pub fn frame_capacities(&self) -> Vec<usize> {
        self.frames.borrow().iter().map(|f| f.capacity()).collect()
    }

    /// Whether `ptr` points into this region's storage.
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.frames.borrow().iter().any(|f| f.contains(ptr))
    }

    /// Exit the region: join every task, then release all frames.
    ///
    /// If any task failed, the failure is raised after all tasks have been
    /// joined and the frames released.
    pub fn exit(mut self) -> RuntimeResult<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> RuntimeResult<()> {
        self.torn_down = true;
        let id = self.id();

        let tasks = std::mem::take(self.tasks.get_mut());
        let task_count = tasks.len();
        let joined = task::join_all(tasks);

        liveness_registry().unregister(id);
        let frames = self.frames.get_mut();
        let released = frames.total_capacity();
        frames.release();
        recovery::remove(id);

        tracing::debug!(
            region = %id,
            depth = self.depth(),
            tasks = task_count,
            released_bytes = released,
            "region exited"
        );
        joined
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        if let Err(err) = self.teardown() {
            tracing::warn!(region = %self.id(), error = %err, "region dropped with failed tasks");
        }
    }
}

impl RegionScoped for Region {
    fn region(&self) -> RegionHandle {
        self.handle()
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id())
            .field("depth", &self.depth())
            .field("frames", &self.frames.borrow())
            .field("outstanding_tasks", &self.outstanding_tasks())
            .finish()
    }
}

/// Create a region (see [`Region::enter`]).
#[track_caller]
pub fn region_create() -> Region {
    Region::enter_at(
        &crate::runtime_config().cloned().unwrap_or_default(),
        Location::caller(),
    )
}

/// Allocate from a region (see [`Region::alloc`]).
pub fn region_alloc(region: &Region, size: usize) -> RuntimeResult<NonNull<u8>> {
    region.alloc(size)
}

/// Exit a region (see [`Region::exit`]).
pub fn region_exit(region: Region) -> RuntimeResult<()> {
    region.exit()
}

/// Raise a panic in a region (see [`Region::panic`]).
#[track_caller]
pub fn region_panic(region: &Region, message: impl Into<String>) -> RuntimeError {
    region.panic(message)
}

/// Spawn an async task from a region (see [`Region::spawn`]).
#[track_caller]
pub fn region_async<A, F>(region: &Region, func: F, arg: A) -> RuntimeResult<TaskId>
where
    A: Send + 'static,
    F: FnOnce(&Region, A) -> RuntimeResult<()> + Send + 'static,
{
    region.spawn(func, arg)
}
