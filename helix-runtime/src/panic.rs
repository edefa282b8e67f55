//! Panic Reporting
//!
//! Region panics are ordinary [`RuntimeError`] values until they reach the
//! outermost recovery point. There they become a [`RegionPanicInfo`]: the
//! record handed to registered panic hooks and returned to the host.
//!
//! This module also converts unwinding Rust panics into messages, which is
//! how async task threads and [`run_root`](crate::recovery::run_root) treat
//! host-level panics as region failures.
//!
//! # Example
//!
//! ```rust
//! use helix_runtime::panic::{clear_panic_hooks, register_panic_hook};
//!
//! register_panic_hook(|info| {
//!     eprintln!("helix panic: {}", info.format());
//! });
//! clear_panic_hooks();
//! ```

use std::any::Any;
use std::panic::Location as StdLocation;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::error::RuntimeError;
use crate::ordering::RegionHandle;

/// Process exit code suggested for an unrecovered region panic.
pub const PANIC_EXIT_CODE: i32 = 101;

/// Kind reported for unwinding Rust panics.
pub const HOST_PANIC_KIND: &str = "host_panic";

type PanicHook = Arc<dyn Fn(&RegionPanicInfo) + Send + Sync>;

/// Counter for reported panics.
static PANIC_COUNT: AtomicU64 = AtomicU64::new(0);

/// Registry of panic hooks.
static PANIC_HOOKS: OnceLock<Mutex<Vec<PanicHook>>> = OnceLock::new();

/// Last reported panic.
static LAST_PANIC: OnceLock<Mutex<Option<RegionPanicInfo>>> = OnceLock::new();

fn panic_hooks() -> &'static Mutex<Vec<PanicHook>> {
    PANIC_HOOKS.get_or_init(|| Mutex::new(Vec::new()))
}

fn last_panic_slot() -> &'static Mutex<Option<RegionPanicInfo>> {
    LAST_PANIC.get_or_init(|| Mutex::new(None))
}

/// Source location information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// File name.
    pub file: String,
    /// Line number.
    pub line: u32,
    /// Column number.
    pub column: u32,
}

impl From<&StdLocation<'_>> for Location {
    fn from(loc: &StdLocation<'_>) -> Self {
        Self {
            file: loc.file().to_string(),
            line: loc.line(),
            column: loc.column(),
        }
    }
}

/// Information about an unrecovered region panic.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPanicInfo {
    message: String,
    kind: &'static str,
    location: Option<Location>,
    region: Option<RegionHandle>,
    count: u64,
    thread_name: Option<String>,
    thread_id: ThreadId,
}

impl RegionPanicInfo {
    /// Build a report from a runtime error.
    pub fn from_error(
        err: &RuntimeError,
        region: Option<RegionHandle>,
        location: Option<&StdLocation<'_>>,
    ) -> Self {
        Self::new(err.to_string(), err.kind(), region, location)
    }

    /// Build a report from an unwinding Rust panic message.
    pub fn from_message(
        message: String,
        region: Option<RegionHandle>,
        location: Option<&StdLocation<'_>>,
    ) -> Self {
        Self::new(message, HOST_PANIC_KIND, region, location)
    }

    fn new(
        message: String,
        kind: &'static str,
        region: Option<RegionHandle>,
        location: Option<&StdLocation<'_>>,
    ) -> Self {
        Self {
            message,
            kind,
            location: location.map(Location::from),
            region,
            count: 0,
            thread_name: std::thread::current().name().map(str::to_string),
            thread_id: std::thread::current().id(),
        }
    }

    /// Get the panic message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Machine-readable kind (see [`RuntimeError::kind`]).
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Where the outermost recovery point was installed.
    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    /// The root region that was torn down.
    pub fn region(&self) -> Option<RegionHandle> {
        self.region
    }

    /// Sequence number of this report (1-based once reported).
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Thread name, if available.
    pub fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }

    /// Id of the thread the report was built on.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Suggested process exit code.
    pub fn exit_code(&self) -> i32 {
        PANIC_EXIT_CODE
    }

    /// Format as a string for logging.
    pub fn format(&self) -> String {
        let mut output = format!("panic #{} [{}]: {}\n", self.count, self.kind, self.message);

        if let Some(region) = &self.region {
            output.push_str(&format!("  in {}\n", region));
        }

        if let Some(loc) = &self.location {
            output.push_str(&format!("  recovered at {}:{}:{}\n", loc.file, loc.line, loc.column));
        }

        match &self.thread_name {
            Some(thread) => output.push_str(&format!("  on thread '{}' ({:?})\n", thread, self.thread_id)),
            None => output.push_str(&format!("  on thread {:?}\n", self.thread_id)),
        }

        output
    }
}

/// Dispatch a report to the hooks, record it, and return it.
pub(crate) fn report(mut info: RegionPanicInfo) -> RegionPanicInfo {
    info.count = PANIC_COUNT.fetch_add(1, Ordering::SeqCst) + 1;

    tracing::error!(
        kind = info.kind,
        count = info.count,
        region = ?info.region,
        "{}",
        info.message
    );

    *last_panic_slot().lock() = Some(info.clone());

    let hooks: Vec<PanicHook> = panic_hooks().lock().clone();
    for hook in hooks {
        // A failing hook must not prevent the others from running.
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(&info)));
    }

    info
}

/// Register a panic hook.
///
/// Hooks run, in registration order, whenever the outermost recovery point
/// reports a panic.
pub fn register_panic_hook<F>(hook: F)
where
    F: Fn(&RegionPanicInfo) + Send + Sync + 'static,
{
    panic_hooks().lock().push(Arc::new(hook));
}

/// Clear all registered panic hooks.
pub fn clear_panic_hooks() {
    panic_hooks().lock().clear();
}

/// Get the number of panics that have been reported.
pub fn panic_count() -> u64 {
    PANIC_COUNT.load(Ordering::SeqCst)
}

/// Get the last reported panic, if any.
pub fn last_panic() -> Option<RegionPanicInfo> {
    last_panic_slot().lock().clone()
}

/// Extract the message from a Rust panic payload.
pub fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Catch an unwinding Rust panic, returning its message.
pub fn catch_panic<F, R>(f: F) -> Result<R, String>
where
    F: FnOnce() -> R + std::panic::UnwindSafe,
{
    std::panic::catch_unwind(f).map_err(|payload| payload_message(payload.as_ref()))
}

/// Like [`catch_panic`] for closures that are not `UnwindSafe`.
///
/// Region state touched by the closure is torn down by the region's drop
/// guard during unwinding, so no half-updated region survives the catch.
pub fn catch_panic_unchecked<F, R>(f: F) -> Result<R, String>
where
    F: FnOnce() -> R,
{
    catch_panic(std::panic::AssertUnwindSafe(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering::RegionId;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_panic_info_format() {
        let err = RuntimeError::IndexOutOfBounds { index: 5, count: 5 };
        let info = RegionPanicInfo::from_error(
            &err,
            Some(RegionHandle::new(RegionId(3), 0)),
            Some(StdLocation::caller()),
        );

        let formatted = info.format();
        assert!(formatted.contains("index_out_of_bounds"));
        assert!(formatted.contains("index 5"));
        assert!(formatted.contains("Region(3)@0"));
        assert!(formatted.contains("panic.rs"));
        assert_eq!(info.exit_code(), PANIC_EXIT_CODE);
    }

    #[test]
    fn test_panic_info_records_thread() {
        let info = std::thread::Builder::new()
            .name("reporter".into())
            .spawn(|| RegionPanicInfo::from_message("off thread".into(), None, None))
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(info.thread_name(), Some("reporter"));
        assert_ne!(info.thread_id(), std::thread::current().id());
        assert!(info.format().contains(&format!("{:?}", info.thread_id())));
    }

    #[test]
    fn test_panic_info_without_context() {
        let info = RegionPanicInfo::from_message("oops".into(), None, None);
        assert_eq!(info.kind(), HOST_PANIC_KIND);
        assert!(info.location().is_none());
        assert!(info.region().is_none());
        assert_eq!(info.count(), 0);
    }

    #[test]
    fn test_report_runs_hooks() {
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();
        register_panic_hook(move |info| {
            if info.message() == "hooked" {
                called_clone.store(true, Ordering::SeqCst);
            }
        });

        let before = panic_count();
        let reported = report(RegionPanicInfo::from_message("hooked".into(), None, None));
        assert!(reported.count() > before);
        assert!(panic_count() > before);
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_failing_hook_is_isolated() {
        register_panic_hook(|info| {
            if info.message() == "isolated" {
                panic!("hook failure");
            }
        });
        let reported = report(RegionPanicInfo::from_message("isolated".into(), None, None));
        assert_eq!(reported.message(), "isolated");
    }

    #[test]
    fn test_catch_panic() {
        assert_eq!(catch_panic(|| 42), Ok(42));

        let result: Result<(), String> = catch_panic(|| panic!("test panic message"));
        assert_eq!(result.unwrap_err(), "test panic message");

        let result: Result<(), String> = catch_panic(|| panic!("{}", "formatted".to_string()));
        assert_eq!(result.unwrap_err(), "formatted");
    }

    #[test]
    fn test_catch_panic_unchecked() {
        let mut counter = 0;
        let result = catch_panic_unchecked(|| {
            counter += 1;
            counter
        });
        assert_eq!(result, Ok(1));
    }

    #[test]
    fn test_location_from_std() {
        let loc = Location::from(StdLocation::caller());
        assert!(loc.file.ends_with("panic.rs"));
        assert!(loc.line > 0);
    }
}
