//! # Recovery Points
//!
//! Each thread keeps an implicit LIFO stack of recovery points, one per
//! active region. Entering a region pushes a point and assigns the region
//! its depth (one more than the enclosing point, or the thread's base depth
//! when the stack is empty); exiting pops it.
//!
//! A panic is a [`RuntimeError`] returned with `?`. [`with_region`] is the
//! guarded block that acts as a recovery point: on success *and* on failure
//! it exits its region, joining tasks and releasing frames, then hands the
//! result to its caller. An error therefore unwinds one region scope at a
//! time until it reaches [`run_root`], the outermost recovery point, which
//! turns it into a [`RegionPanicInfo`] report.

use std::cell::RefCell;
use std::panic::Location;

use crate::config::RuntimeConfig;
use crate::error::RuntimeResult;
use crate::ordering::{Depth, RegionHandle, RegionId};
use crate::panic::{self, RegionPanicInfo};
use crate::region::Region;

/// A checkpoint installed by a region entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPoint {
    /// The region this point guards.
    pub region: RegionHandle,
    /// Where the region was entered.
    pub location: &'static Location<'static>,
}

#[derive(Debug, Default)]
struct RecoveryStack {
    base_depth: Depth,
    points: Vec<RecoveryPoint>,
}

thread_local! {
    static RECOVERY_STACK: RefCell<RecoveryStack> = RefCell::new(RecoveryStack::default());
}

/// Push a recovery point for a new region and return its handle.
pub(crate) fn install(id: RegionId, location: &'static Location<'static>) -> RecoveryPoint {
    RECOVERY_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let depth = match stack.points.last() {
            Some(top) => top.region.depth() + 1,
            None => stack.base_depth,
        };
        let point = RecoveryPoint {
            region: RegionHandle::new(id, depth),
            location,
        };
        stack.points.push(point);
        point
    })
}

/// Pop the recovery point of an exiting region.
///
/// Regions normally exit in LIFO order; an out-of-order exit removes the
/// matching point wherever it sits.
pub(crate) fn remove(id: RegionId) {
    RECOVERY_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        match stack.points.iter().rposition(|p| p.region.id() == id) {
            Some(pos) if pos + 1 == stack.points.len() => {
                stack.points.pop();
            }
            Some(pos) => {
                tracing::warn!(region = %id, "region exited out of nesting order");
                stack.points.remove(pos);
            }
            None => {}
        }
    })
}

/// Set the depth given to the first region entered on this thread.
///
/// Async task threads start one level below their parent region. Has no
/// effect while regions are active on the thread.
pub(crate) fn set_base_depth(depth: Depth) {
    RECOVERY_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.points.is_empty() {
            stack.base_depth = depth;
        }
    })
}

/// The innermost active recovery point on this thread.
pub fn current() -> Option<RecoveryPoint> {
    RECOVERY_STACK.with(|stack| stack.borrow().points.last().copied())
}

/// Number of active recovery points on this thread.
pub fn active_count() -> usize {
    RECOVERY_STACK.with(|stack| stack.borrow().points.len())
}

/// Depth the next region entered on this thread will receive.
pub fn next_depth() -> Depth {
    RECOVERY_STACK.with(|stack| {
        let stack = stack.borrow();
        stack
            .points
            .last()
            .map(|top| top.region.depth() + 1)
            .unwrap_or(stack.base_depth)
    })
}

/// Run `body` inside a fresh region that is torn down on every exit path.
///
/// Errors from `body` take precedence over errors raised while exiting
/// (for instance a failing async task); the latter are logged.
#[track_caller]
pub fn with_region<T, F>(body: F) -> RuntimeResult<T>
where
    F: FnOnce(&Region) -> RuntimeResult<T>,
{
    let region = Region::enter();
    guarded(region, body)
}

/// Like [`with_region`], using an explicit configuration.
#[track_caller]
pub fn with_region_config<T, F>(config: &RuntimeConfig, body: F) -> RuntimeResult<T>
where
    F: FnOnce(&Region) -> RuntimeResult<T>,
{
    let region = Region::enter_with(config);
    guarded(region, body)
}

fn guarded<T, F>(region: Region, body: F) -> RuntimeResult<T>
where
    F: FnOnce(&Region) -> RuntimeResult<T>,
{
    let id = region.id();
    let result = body(&region);
    let exit = region.exit();

    match (result, exit) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => {
            tracing::debug!(region = %id, kind = err.kind(), "panic unwinding past region");
            Err(err)
        }
        (Err(err), Err(exit_err)) => {
            tracing::warn!(region = %id, error = %exit_err, "region exit failed while unwinding");
            Err(err)
        }
    }
}

/// The outermost recovery point.
///
/// Runs `body` in a root region. A runtime panic, or an unwinding Rust panic,
/// is reported through the panic hooks and returned as a
/// [`RegionPanicInfo`]; the caller decides the process-level response.
#[track_caller]
pub fn run_root<T, F>(body: F) -> Result<T, RegionPanicInfo>
where
    F: FnOnce(&Region) -> RuntimeResult<T>,
{
    let location = Location::caller();
    let config = crate::runtime_config().cloned().unwrap_or_default();
    let outcome = panic::catch_panic_unchecked(|| {
        let region = Region::enter_at(&config, location);
        let handle = region.handle();
        (handle, guarded(region, body))
    });

    match outcome {
        Ok((_, Ok(value))) => Ok(value),
        Ok((handle, Err(err))) => Err(panic::report(RegionPanicInfo::from_error(
            &err,
            Some(handle),
            Some(location),
        ))),
        Err(message) => Err(panic::report(RegionPanicInfo::from_message(
            message,
            None,
            Some(location),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;

    #[test]
    fn test_depth_follows_nesting() {
        let base = next_depth();
        let outer = Region::enter();
        assert_eq!(outer.depth(), base);
        assert_eq!(current().map(|p| p.region), Some(outer.handle()));

        let inner = Region::enter();
        assert_eq!(inner.depth(), base + 1);
        assert_eq!(active_count(), 2);

        inner.exit().unwrap();
        assert_eq!(current().map(|p| p.region), Some(outer.handle()));
        outer.exit().unwrap();
        assert_eq!(next_depth(), base);
    }

    #[test]
    fn test_with_region_exits_on_success() {
        let mut seen = None;
        let value = with_region(|r| {
            seen = Some(r.handle());
            Ok(7)
        })
        .unwrap();
        assert_eq!(value, 7);
        assert!(!seen.unwrap().is_live());
    }

    #[test]
    fn test_with_region_exits_on_error() {
        let mut seen = None;
        let result: RuntimeResult<()> = with_region(|r| {
            seen = Some(r.handle());
            r.alloc(32)?;
            Err(r.panic("boom"))
        });
        assert_eq!(
            result,
            Err(RuntimeError::Explicit {
                message: "boom".into()
            })
        );
        assert!(!seen.unwrap().is_live());
    }

    #[test]
    fn test_error_unwinds_every_scope() {
        let mut handles = Vec::new();
        let result: RuntimeResult<()> = with_region(|outer| {
            handles.push(outer.handle());
            with_region(|inner| {
                handles.push(inner.handle());
                inner.alloc(8)?;
                Err(inner.panic("inner failure"))
            })?;
            unreachable!("the inner panic re-raises past this point")
        });

        assert!(result.is_err());
        assert_eq!(handles.len(), 2);
        assert!(handles[0].depth() < handles[1].depth());
        assert!(handles.iter().all(|h| !h.is_live()));
    }

    #[test]
    fn test_run_root_reports() {
        let report = run_root(|r| -> RuntimeResult<()> { Err(r.panic("fatal")) }).unwrap_err();
        assert_eq!(report.message(), "fatal");
        assert_eq!(report.kind(), "explicit");
        assert!(report.region().is_some());
        assert!(report.location().is_some());
    }

    #[test]
    fn test_run_root_catches_rust_panic() {
        let report = run_root(|_| -> RuntimeResult<()> { panic!("host bug") }).unwrap_err();
        assert!(report.message().contains("host bug"));
        assert_eq!(report.kind(), "host_panic");
        assert_eq!(active_count(), 0);
    }
}
