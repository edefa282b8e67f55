//! # Runtime Errors
//!
//! Every failure inside the runtime travels the same channel: a
//! [`RuntimeError`] returned from the failing operation and propagated with
//! `?` until it reaches a recovery point (see [`crate::recovery`]).
//!
//! There is no recoverable-error channel at this layer. Language-level
//! results are ordinary [`TaggedUnion`](crate::value::TaggedUnion) data.

use thiserror::Error;

use crate::ordering::RegionId;

/// Result alias used throughout the runtime.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// A region panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The host could not supply backing storage for a new frame.
    #[error("allocation of {requested} bytes failed in {region}")]
    AllocationFailed {
        /// Bytes requested by the failing allocation.
        requested: usize,
        /// Region the allocation targeted.
        region: RegionId,
    },

    /// Element access outside `0 <= index < count`.
    #[error("index {index} is outside the bounds of an array of {count} elements")]
    IndexOutOfBounds {
        /// Requested index.
        index: i64,
        /// Element count of the array.
        count: usize,
    },

    /// Slice construction outside `0 <= lo <= hi <= count`.
    #[error("slice bounds [{lo}, {hi}) are outside the bounds of an array of {count} elements")]
    SliceOutOfBounds {
        /// Lower bound (inclusive).
        lo: i64,
        /// Upper bound (exclusive).
        hi: i64,
        /// Element count of the array.
        count: usize,
    },

    /// One or more joined async tasks terminated abnormally.
    #[error("{failed} of {total} async tasks failed; first failure: {first}")]
    TaskFailed {
        /// Number of failed tasks.
        failed: usize,
        /// Number of tasks joined.
        total: usize,
        /// Description of the first failure, in spawn order.
        first: String,
    },

    /// The operating system refused to start a task thread.
    #[error("failed to spawn async task: {message}")]
    SpawnFailed {
        /// OS error text.
        message: String,
    },

    /// Explicit panic raised by compiled code.
    #[error("{message}")]
    Explicit {
        /// Panic message.
        message: String,
    },

    /// A fat pointer was dereferenced after its region exited.
    #[error("use of a value whose {region} has already exited")]
    UseAfterExit {
        /// The exited region.
        region: RegionId,
    },

    /// A tagged union was built with a tag outside its variant range.
    #[error("tag {tag} is not a valid variant (expected < {variants})")]
    InvalidTag {
        /// Offending tag.
        tag: u32,
        /// Number of declared variants.
        variants: u32,
    },
}

impl RuntimeError {
    /// Short machine-readable kind, used in log fields and panic reports.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::AllocationFailed { .. } => "allocation_failed",
            RuntimeError::IndexOutOfBounds { .. } => "index_out_of_bounds",
            RuntimeError::SliceOutOfBounds { .. } => "slice_out_of_bounds",
            RuntimeError::TaskFailed { .. } => "task_failed",
            RuntimeError::SpawnFailed { .. } => "spawn_failed",
            RuntimeError::Explicit { .. } => "explicit",
            RuntimeError::UseAfterExit { .. } => "use_after_exit",
            RuntimeError::InvalidTag { .. } => "invalid_tag",
        }
    }

    /// Whether this error is a bounds violation.
    pub fn is_bounds_violation(&self) -> bool {
        matches!(
            self,
            RuntimeError::IndexOutOfBounds { .. } | RuntimeError::SliceOutOfBounds { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = RuntimeError::IndexOutOfBounds { index: 5, count: 5 };
        assert_eq!(
            err.to_string(),
            "index 5 is outside the bounds of an array of 5 elements"
        );

        let err = RuntimeError::SliceOutOfBounds { lo: 3, hi: 2, count: 4 };
        assert!(err.to_string().contains("[3, 2)"));

        let err = RuntimeError::AllocationFailed {
            requested: 64,
            region: RegionId(7),
        };
        assert_eq!(err.to_string(), "allocation of 64 bytes failed in Region(7)");
    }

    #[test]
    fn test_kind_and_bounds() {
        let err = RuntimeError::SliceOutOfBounds { lo: 0, hi: 9, count: 4 };
        assert_eq!(err.kind(), "slice_out_of_bounds");
        assert!(err.is_bounds_violation());

        let err = RuntimeError::Explicit { message: "boom".into() };
        assert_eq!(err.kind(), "explicit");
        assert!(!err.is_bounds_violation());
    }
}
