//! # Frames
//!
//! A frame is one contiguous growth chunk of a region's backing storage: a
//! fixed-capacity buffer with a bump cursor and a link to the next-older
//! frame. Frames are never freed individually; the whole chain is released
//! when the owning region exits.
//!
//! ## Growth
//!
//! When the current frame cannot satisfy a request, a new frame is pushed.
//! Its capacity starts from twice the previous frame's capacity (or the
//! configured minimum for the first frame) and keeps doubling until the
//! request fits. Existing frames are never moved or resized, so pointers
//! handed out earlier stay valid.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;

/// Alignment of every frame buffer, and the default alignment of raw
/// allocations. Large enough for any primitive value.
pub const MAX_ALIGN: usize = 16;

/// Byte written over released frames when poisoning is enabled.
pub const POISON_BYTE: u8 = 0xDE;

/// Round `offset` up to a multiple of `align` (a power of two).
#[inline]
pub(crate) fn align_up(offset: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    offset.checked_add(align - 1).map(|v| v & !(align - 1))
}

/// Capacity of the next frame needed to hold `size` bytes.
///
/// Returns `None` on arithmetic overflow.
pub fn next_frame_capacity(previous: Option<usize>, min_capacity: usize, size: usize) -> Option<usize> {
    let mut capacity = match previous {
        Some(prev) => prev.checked_mul(2)?,
        None => min_capacity.max(1),
    };
    while capacity < size {
        capacity = capacity.checked_mul(2)?;
    }
    Some(capacity)
}

/// One growth chunk of region storage.
pub struct Frame {
    buffer: NonNull<u8>,
    capacity: usize,
    cursor: usize,
    previous: Option<Box<Frame>>,
}

impl Frame {
    /// Acquire a frame of exactly `capacity` bytes from the host allocator.
    ///
    /// Returns `None` if the host cannot supply the storage.
    pub fn new(capacity: usize) -> Option<Self> {
        let layout = Layout::from_size_align(capacity.max(1), MAX_ALIGN).ok()?;
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        let buffer = NonNull::new(raw)?;
        Some(Self {
            buffer,
            capacity: layout.size(),
            cursor: 0,
            previous: None,
        })
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes consumed so far (including alignment padding).
    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Bytes still available at the cursor.
    pub fn remaining(&self) -> usize {
        self.capacity - self.cursor
    }

    /// The next-older frame.
    pub fn previous(&self) -> Option<&Frame> {
        self.previous.as_deref()
    }

    /// Whether `addr` points into this frame's buffer.
    pub fn contains(&self, addr: *const u8) -> bool {
        let start = self.buffer.as_ptr() as usize;
        let addr = addr as usize;
        addr >= start && addr < start + self.capacity
    }

    /// Bump-allocate `size` bytes aligned to `align`.
    ///
    /// The returned address is aligned, not just the offset, so alignments
    /// above [`MAX_ALIGN`] are honoured. Returns `None` if the frame does not
    /// have room.
    pub fn bump(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let base = self.buffer.as_ptr() as usize;
        let start = align_up(base.checked_add(self.cursor)?, align)? - base;
        let end = start.checked_add(size)?;
        if end > self.capacity {
            return None;
        }
        self.cursor = end;
        // SAFETY: start <= capacity, so the offset stays inside (or one past)
        // the buffer allocation.
        Some(unsafe { NonNull::new_unchecked(self.buffer.as_ptr().add(start)) })
    }

    /// Overwrite the whole buffer with [`POISON_BYTE`].
    ///
    /// The buffer is freed right after, so the pattern is only seen by raw
    /// pointers that bypass the liveness checks and race the host allocator.
    fn poison(&mut self) {
        // SAFETY: the buffer is valid for `capacity` bytes and exclusively owned.
        unsafe { std::ptr::write_bytes(self.buffer.as_ptr(), POISON_BYTE, self.capacity) };
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        // SAFETY: buffer was allocated in `Frame::new` with this layout.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.capacity, MAX_ALIGN);
            alloc::dealloc(self.buffer.as_ptr(), layout);
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("buffer", &format_args!("{:p}", self.buffer))
            .field("capacity", &self.capacity)
            .field("cursor", &self.cursor)
            .field("has_previous", &self.previous.is_some())
            .finish()
    }
}

// SAFETY: a frame exclusively owns its buffer.
unsafe impl Send for Frame {}

/// Why a frame chain could not satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthFailure {
    /// Capacity arithmetic overflowed.
    Overflow,
    /// The new frame would exceed the region's byte limit.
    LimitExceeded {
        /// Capacity that would have been reached.
        would_reach: usize,
        /// Configured limit.
        limit: usize,
    },
    /// The host allocator returned no storage.
    HostExhausted {
        /// Capacity of the frame that could not be acquired.
        capacity: usize,
    },
}

/// The chain of frames owned by one region, most recent first.
pub struct FrameChain {
    head: Option<Box<Frame>>,
    frame_count: usize,
    total_capacity: usize,
    min_capacity: usize,
    limit: Option<usize>,
    poison_on_release: bool,
}

impl FrameChain {
    /// Create an empty chain. No storage is acquired until the first request.
    pub fn new(min_capacity: usize, limit: Option<usize>, poison_on_release: bool) -> Self {
        Self {
            head: None,
            frame_count: 0,
            total_capacity: 0,
            min_capacity: min_capacity.max(1),
            limit,
            poison_on_release,
        }
    }

    /// The current (most recent) frame.
    pub fn current(&self) -> Option<&Frame> {
        self.head.as_deref()
    }

    /// Number of frames in the chain.
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Sum of all frame capacities.
    pub fn total_capacity(&self) -> usize {
        self.total_capacity
    }

    /// Sum of bytes consumed across all frames.
    pub fn total_used(&self) -> usize {
        self.iter().map(Frame::used).sum()
    }

    /// Iterate over frames, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        std::iter::successors(self.current(), |f| f.previous())
    }

    /// Allocate `size` bytes aligned to `align`, growing the chain if needed.
    pub fn alloc(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, GrowthFailure> {
        if let Some(frame) = self.head.as_deref_mut() {
            if let Some(ptr) = frame.bump(size, align) {
                return Ok(ptr);
            }
        }

        // A fresh frame is MAX_ALIGN-aligned, so larger alignments need up to
        // `align` bytes of padding.
        let needed = if align > MAX_ALIGN {
            size.checked_add(align).ok_or(GrowthFailure::Overflow)?
        } else {
            size
        };
        self.grow(needed)?;

        let frame = self.head.as_deref_mut().ok_or(GrowthFailure::Overflow)?;
        frame.bump(size, align).ok_or(GrowthFailure::Overflow)
    }

    fn grow(&mut self, needed: usize) -> Result<(), GrowthFailure> {
        let previous = self.head.as_ref().map(|f| f.capacity());
        let capacity = next_frame_capacity(previous, self.min_capacity, needed)
            .ok_or(GrowthFailure::Overflow)?;

        if let Some(limit) = self.limit {
            let would_reach = self
                .total_capacity
                .checked_add(capacity)
                .ok_or(GrowthFailure::Overflow)?;
            if would_reach > limit {
                return Err(GrowthFailure::LimitExceeded { would_reach, limit });
            }
        }

        let mut frame = Frame::new(capacity).ok_or(GrowthFailure::HostExhausted { capacity })?;
        frame.previous = self.head.take();
        self.head = Some(Box::new(frame));
        self.frame_count += 1;
        self.total_capacity += capacity;

        tracing::trace!(
            capacity,
            frames = self.frame_count,
            total_capacity = self.total_capacity,
            "region frame pushed"
        );
        Ok(())
    }

    /// Release every frame. Poisons buffers first when configured.
    pub fn release(&mut self) {
        let mut next = self.head.take();
        while let Some(mut frame) = next {
            if self.poison_on_release {
                frame.poison();
            }
            next = frame.previous.take();
        }
        self.frame_count = 0;
        self.total_capacity = 0;
    }
}

impl Drop for FrameChain {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for FrameChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameChain")
            .field("frames", &self.frame_count)
            .field("total_capacity", &self.total_capacity)
            .field("min_capacity", &self.min_capacity)
            .field("limit", &self.limit)
            .finish()
    }
}
