//! # Helix Runtime Library
//!
//! The Helix runtime provides the memory model that compiled Helix programs
//! run on:
//!
//! - **Regions**: arena-like lifetime scopes released all at once
//! - **Frames**: bump-allocated growth chunks backing each region
//! - **Ordering**: the `region_min` join used when values from different
//!   regions meet
//! - **Recovery**: region panics propagated as errors, with every scope torn
//!   down on the way out
//! - **Async Tasks**: OS threads running in child regions, joined on exit
//! - **Values**: fat pointers, bounds-checked arrays, and tagged unions
//!
//! There is no garbage collector, reference counting, or per-object free.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        HELIX RUNTIME                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │   Recovery   │  │    Region    │  │  Async Task  │          │
//! │  │(recovery.rs) │  │ (region.rs)  │  │  (task.rs)   │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │   Ordering   │  │    Frames    │  │    Values    │          │
//! │  │(ordering.rs) │  │  (frame.rs)  │  │  (value.rs)  │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use helix_runtime::{region_min, run_root, with_region, RegionScoped, RuntimeResult};
//!
//! let total = run_root(|outer| -> RuntimeResult<u64> {
//!     let a = outer.alloc_value(40u64)?;
//!     with_region(|inner| {
//!         let b = inner.alloc_value(2u64)?;
//!         assert_eq!(region_min(a, b).region(), outer.handle());
//!         unsafe { Ok(a.read()? + b.read()?) }
//!     })
//! })
//! .unwrap();
//! assert_eq!(total, 42);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod ordering;
pub mod panic;
pub mod recovery;
pub mod region;
pub mod registry;
pub mod task;
pub mod value;

// Re-exports
pub use config::{ConfigError, LogFormat, LogLevel, RuntimeConfig, RuntimeConfigBuilder};
pub use error::{RuntimeError, RuntimeResult};
pub use ordering::{outlives, region_min, region_min_all, Depth, RegionHandle, RegionId, RegionScoped};
pub use panic::{register_panic_hook, Location as PanicLocation, RegionPanicInfo};
pub use recovery::{run_root, with_region, with_region_config};
pub use region::{
    region_alloc, region_async, region_create, region_exit, region_panic, Region, RegionStats,
};
pub use task::{TaskId, TaskOutcome};
pub use value::{ArraySlice, FatPtr, TaggedUnion, UnionType, Variant};

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Global runtime configuration.
static RUNTIME_CONFIG: std::sync::OnceLock<RuntimeConfig> = std::sync::OnceLock::new();

/// Initialize the runtime with a configuration.
///
/// The configuration is validated and installed globally; regions entered
/// without an explicit configuration use it from then on. Only the first
/// successful call installs a configuration; later calls return the one
/// already installed.
///
/// # Example
///
/// ```rust
/// use helix_runtime::{init_with_runtime_config, RuntimeConfig};
///
/// let config = RuntimeConfig::builder()
///     .initial_frame_capacity(64 * 1024)
///     .build()
///     .unwrap();
///
/// let installed = init_with_runtime_config(config).unwrap();
/// assert!(installed.memory.initial_frame_capacity > 0);
/// ```
pub fn init_with_runtime_config(config: RuntimeConfig) -> Result<&'static RuntimeConfig, ConfigError> {
    config.validate()?;
    let installed = RUNTIME_CONFIG.get_or_init(|| config);
    tracing::debug!(
        initial_frame_capacity = installed.memory.initial_frame_capacity,
        max_region_bytes = installed.memory.max_region_bytes,
        poison_on_exit = installed.memory.poison_on_exit,
        "runtime configured"
    );
    Ok(installed)
}

/// Initialize the runtime from environment variables.
///
/// Reads configuration from `HELIX_*` environment variables.
/// See `RuntimeConfig::from_env()` for the full list of supported variables.
pub fn init_from_env() -> Result<&'static RuntimeConfig, ConfigError> {
    init_with_runtime_config(RuntimeConfig::from_env())
}

/// Get the current runtime configuration.
///
/// Returns `None` if the runtime was not initialized with `init_with_runtime_config`
/// or `init_from_env`.
pub fn runtime_config() -> Option<&'static RuntimeConfig> {
    RUNTIME_CONFIG.get()
}
