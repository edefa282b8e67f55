//! Runtime Configuration
//!
//! Configuration for the Helix region runtime. It can be set programmatically
//! or loaded from environment variables.
//!
//! # Environment Variables
//!
//! All environment variables use the `HELIX_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HELIX_INITIAL_FRAME_CAPACITY` | Capacity of a region's first frame in bytes | 8192 (8KB) |
//! | `HELIX_MAX_REGION_BYTES` | Per-region storage limit in bytes (0 = unlimited) | 0 |
//! | `HELIX_POISON_ON_EXIT` | Poison frames before release ("true"/"false"); a debugging aid, use-after-exit is caught by the liveness registry | debug builds |
//! | `HELIX_TASK_THREAD_PREFIX` | Name prefix for async task threads | helix-task |
//! | `HELIX_TASK_STACK_SIZE` | Task thread stack size in bytes (0 = OS default) | 0 |
//! | `HELIX_LOG_LEVEL` | Log level (off/error/warn/info/debug/trace) | info |
//! | `HELIX_LOG_FORMAT` | Log format (plain/json) | plain |
//!
//! # Example
//!
//! ```rust
//! use helix_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::builder()
//!     .initial_frame_capacity(64 * 1024)
//!     .max_region_bytes(16 * 1024 * 1024)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.memory.initial_frame_capacity, 64 * 1024);
//! ```

use std::env;

use thiserror::Error;

/// Log level for runtime logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// No logging.
    Off,
    /// Error messages only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational messages (default).
    #[default]
    Info,
    /// Debug messages.
    Debug,
    /// Trace-level messages.
    Trace,
}

impl LogLevel {
    /// Parse a log level from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "none" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to a string representation, usable as a tracing filter.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output (default).
    #[default]
    Plain,
    /// JSON structured output.
    Json,
}

impl LogFormat {
    /// Parse a log format from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "plain" | "text" | "pretty" => Some(LogFormat::Plain),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Region memory configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Capacity of the first frame a region acquires.
    /// Default: 8KB.
    pub initial_frame_capacity: usize,

    /// Upper bound on the total frame capacity of one region.
    /// 0 means unlimited (default).
    pub max_region_bytes: usize,

    /// Overwrite frames with a poison pattern before releasing them.
    /// Debugging aid only: use-after-exit is detected by the liveness
    /// registry, not by the pattern, which is freed with the frame.
    /// Default: true in debug builds.
    pub poison_on_exit: bool,
}

impl MemoryConfig {
    /// The region byte limit, if any.
    pub fn region_limit(&self) -> Option<usize> {
        (self.max_region_bytes > 0).then_some(self.max_region_bytes)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            initial_frame_capacity: 8 * 1024, // 8 KB
            max_region_bytes: 0,              // Unlimited
            poison_on_exit: cfg!(debug_assertions),
        }
    }
}

/// Async task configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfig {
    /// Prefix for task thread names; the task id is appended.
    /// Default: "helix-task".
    pub thread_name_prefix: String,

    /// Stack size for task threads in bytes.
    /// Default: None (operating system default).
    pub stack_size: Option<usize>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "helix-task".to_string(),
            stack_size: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogConfig {
    /// Log level.
    /// Default: Info.
    pub level: LogLevel,

    /// Output format.
    /// Default: Plain.
    pub format: LogFormat,
}

/// Complete runtime configuration.
///
/// Use `RuntimeConfig::default()` for sensible defaults, or
/// `RuntimeConfig::from_env()` to load from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeConfig {
    /// Region memory configuration.
    pub memory: MemoryConfig,

    /// Async task configuration.
    pub tasks: TaskConfig,

    /// Logging configuration.
    pub log: LogConfig,
}

impl RuntimeConfig {
    /// Create a new builder for RuntimeConfig.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    ///
    /// Variables that are unset or fail to parse leave the default in place.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let usize_var = |name: &str| lookup(name).and_then(|s| s.trim().parse::<usize>().ok());

        // Memory configuration
        if let Some(val) = usize_var("HELIX_INITIAL_FRAME_CAPACITY") {
            if val > 0 {
                config.memory.initial_frame_capacity = val;
            }
        }

        if let Some(val) = usize_var("HELIX_MAX_REGION_BYTES") {
            config.memory.max_region_bytes = val;
        }

        if let Some(val) = lookup("HELIX_POISON_ON_EXIT").and_then(|s| parse_bool(&s)) {
            config.memory.poison_on_exit = val;
        }

        // Task configuration
        if let Some(val) = lookup("HELIX_TASK_THREAD_PREFIX") {
            if !val.is_empty() {
                config.tasks.thread_name_prefix = val;
            }
        }

        if let Some(val) = usize_var("HELIX_TASK_STACK_SIZE") {
            config.tasks.stack_size = (val > 0).then_some(val);
        }

        // Logging configuration
        if let Some(level) = lookup("HELIX_LOG_LEVEL").and_then(|s| LogLevel::parse(&s)) {
            config.log.level = level;
        }

        if let Some(format) = lookup("HELIX_LOG_FORMAT").and_then(|s| LogFormat::parse(&s)) {
            config.log.format = format;
        }

        config
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.initial_frame_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "memory.initial_frame_capacity".into(),
                message: "must be at least 1 byte".into(),
            });
        }

        if let Some(limit) = self.memory.region_limit() {
            if limit < self.memory.initial_frame_capacity {
                return Err(ConfigError::InvalidValue {
                    field: "memory.max_region_bytes".into(),
                    message: "must be at least initial_frame_capacity".into(),
                });
            }
        }

        if self.tasks.thread_name_prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tasks.thread_name_prefix".into(),
                message: "must not be empty".into(),
            });
        }

        if let Some(size) = self.tasks.stack_size {
            if size < 16 * 1024 {
                return Err(ConfigError::InvalidValue {
                    field: "tasks.stack_size".into(),
                    message: "must be at least 16384 bytes".into(),
                });
            }
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Error message.
        message: String,
    },
}

/// Builder for RuntimeConfig.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity of each region's first frame.
    pub fn initial_frame_capacity(mut self, bytes: usize) -> Self {
        self.config.memory.initial_frame_capacity = bytes;
        self
    }

    /// Set the per-region storage limit (0 = unlimited).
    pub fn max_region_bytes(mut self, bytes: usize) -> Self {
        self.config.memory.max_region_bytes = bytes;
        self
    }

    /// Enable or disable frame poisoning on region exit.
    pub fn poison_on_exit(mut self, enabled: bool) -> Self {
        self.config.memory.poison_on_exit = enabled;
        self
    }

    /// Set the task thread name prefix.
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.tasks.thread_name_prefix = prefix.into();
        self
    }

    /// Set the task thread stack size.
    pub fn task_stack_size(mut self, size: Option<usize>) -> Self {
        self.config.tasks.stack_size = size;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log.level = level;
        self
    }

    /// Set the log format.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log.format = format;
        self
    }

    /// Build the configuration.
    ///
    /// This validates the configuration and returns an error if invalid.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validation.
    pub fn build_unchecked(self) -> RuntimeConfig {
        self.config
    }
}

/// Parse a boolean flag value.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
