//! # Value Representation
//!
//! The layouts compiled code uses for region-allocated data:
//!
//! - [`FatPtr<T>`]: a pointer carrying the handle of the region it points
//!   into. Dereferences check that the region is still live.
//! - [`ArraySlice<T>`]: pointer, region, and element count. Every index and
//!   slice operation is bounds-checked.
//! - [`TaggedUnion<U>`]: a `#[repr(C)]` tag/payload pair for sum types.
//!   Variants are read through a tag-checked downcast.
//!
//! Fat pointers are plain `Copy` values and may be moved into async tasks.
//! The runtime does not synchronize accesses to the storage they point at:
//! reads and writes are `unsafe` and callers must ensure that no other thread
//! writes the same storage concurrently. Joining a task orders its writes
//! before whatever the joining region does next.

use std::fmt;
use std::ptr::NonNull;

use crate::error::{RuntimeError, RuntimeResult};
use crate::ordering::{RegionHandle, RegionScoped};
use crate::registry;

/// A pointer into region storage, tagged with its region.
pub struct FatPtr<T> {
    data: NonNull<T>,
    region: RegionHandle,
}

impl<T> FatPtr<T> {
    /// Assemble a fat pointer.
    ///
    /// # Safety
    ///
    /// `data` must point to an initialized `T` allocated from `region`.
    pub unsafe fn from_raw_parts(data: NonNull<T>, region: RegionHandle) -> Self {
        Self { data, region }
    }

    /// The raw data pointer.
    pub fn as_ptr(&self) -> *mut T {
        self.data.as_ptr()
    }

    /// Whether the owning region has not yet exited.
    pub fn is_live(&self) -> bool {
        self.region.is_live()
    }

    /// Fail with `UseAfterExit` if the owning region has exited.
    pub fn check(&self) -> RuntimeResult<()> {
        registry::validate_live(self.region.id())
    }

    /// Reinterpret as a pointer to another type in the same region.
    pub fn cast<U>(self) -> FatPtr<U> {
        FatPtr {
            data: self.data.cast(),
            region: self.region,
        }
    }
}

impl<T: Copy> FatPtr<T> {
    /// Read the pointee.
    ///
    /// # Safety
    ///
    /// No other thread may write the pointee concurrently.
    pub unsafe fn read(&self) -> RuntimeResult<T> {
        self.check()?;
        Ok(self.data.as_ptr().read())
    }

    /// Overwrite the pointee.
    ///
    /// # Safety
    ///
    /// No other thread may access the pointee concurrently.
    pub unsafe fn write(&self, value: T) -> RuntimeResult<()> {
        self.check()?;
        self.data.as_ptr().write(value);
        Ok(())
    }
}

impl<T> Clone for FatPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FatPtr<T> {}

impl<T> PartialEq for FatPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data && self.region == other.region
    }
}

impl<T> Eq for FatPtr<T> {}

impl<T> fmt::Debug for FatPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FatPtr")
            .field("data", &self.data)
            .field("region", &self.region)
            .finish()
    }
}

// SAFETY: a FatPtr is an address plus a region handle. Accesses through it
// are unsafe and carry their own data-race contract.
unsafe impl<T: Send> Send for FatPtr<T> {}
// SAFETY: see above.
unsafe impl<T: Sync> Sync for FatPtr<T> {}

impl<T> RegionScoped for FatPtr<T> {
    fn region(&self) -> RegionHandle {
        self.region
    }
}

/// A bounds-checked view of `count` contiguous elements in region storage.
pub struct ArraySlice<T> {
    data: NonNull<T>,
    region: RegionHandle,
    count: usize,
}

impl<T> ArraySlice<T> {
    /// Assemble a slice.
    ///
    /// # Safety
    ///
    /// `data` must point to `count` initialized elements allocated from
    /// `region`.
    pub unsafe fn from_raw_parts(data: NonNull<T>, region: RegionHandle, count: usize) -> Self {
        Self {
            data,
            region,
            count,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the slice has no elements.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The raw pointer to the first element.
    pub fn as_ptr(&self) -> *mut T {
        self.data.as_ptr()
    }

    /// Whether the owning region has not yet exited.
    pub fn is_live(&self) -> bool {
        self.region.is_live()
    }

    /// Validate `index` against `0 <= index < count`.
    pub fn check_index(&self, index: i64) -> RuntimeResult<usize> {
        match usize::try_from(index) {
            Ok(i) if i < self.count => Ok(i),
            _ => Err(RuntimeError::IndexOutOfBounds {
                index,
                count: self.count,
            }),
        }
    }

    /// Fat pointer to the element at `index`.
    pub fn get(&self, index: i64) -> RuntimeResult<FatPtr<T>> {
        let i = self.check_index(index)?;
        // SAFETY: i < count, so the element lies inside the slice.
        let data = unsafe { NonNull::new_unchecked(self.data.as_ptr().add(i)) };
        Ok(FatPtr {
            data,
            region: self.region,
        })
    }

    /// The sub-slice `[lo, hi)`.
    ///
    /// Fails unless `0 <= lo <= hi <= count`. The result shares the region
    /// and storage of `self`.
    pub fn slice(&self, lo: i64, hi: i64) -> RuntimeResult<ArraySlice<T>> {
        let out_of_bounds = RuntimeError::SliceOutOfBounds {
            lo,
            hi,
            count: self.count,
        };
        let (start, end) = match (usize::try_from(lo), usize::try_from(hi)) {
            (Ok(start), Ok(end)) if start <= end && end <= self.count => (start, end),
            _ => return Err(out_of_bounds),
        };
        // SAFETY: start <= count, so the offset stays within (or one past)
        // the slice.
        let data = unsafe { NonNull::new_unchecked(self.data.as_ptr().add(start)) };
        Ok(ArraySlice {
            data,
            region: self.region,
            count: end - start,
        })
    }
}

impl<T: Copy> ArraySlice<T> {
    /// Read the element at `index`.
    ///
    /// # Safety
    ///
    /// No other thread may write the element concurrently.
    pub unsafe fn load(&self, index: i64) -> RuntimeResult<T> {
        self.get(index)?.read()
    }

    /// Overwrite the element at `index`.
    ///
    /// # Safety
    ///
    /// No other thread may access the element concurrently.
    pub unsafe fn store(&self, index: i64, value: T) -> RuntimeResult<()> {
        self.get(index)?.write(value)
    }

    /// Copy every element out.
    ///
    /// # Safety
    ///
    /// No other thread may write the slice concurrently.
    pub unsafe fn to_vec(&self) -> RuntimeResult<Vec<T>> {
        registry::validate_live(self.region.id())?;
        Ok(std::slice::from_raw_parts(self.data.as_ptr(), self.count).to_vec())
    }
}

impl<T> Clone for ArraySlice<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArraySlice<T> {}

impl<T> fmt::Debug for ArraySlice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArraySlice")
            .field("data", &self.data)
            .field("region", &self.region)
            .field("count", &self.count)
            .finish()
    }
}

// SAFETY: same contract as FatPtr.
unsafe impl<T: Send> Send for ArraySlice<T> {}
// SAFETY: same contract as FatPtr.
unsafe impl<T: Sync> Sync for ArraySlice<T> {}

impl<T> RegionScoped for ArraySlice<T> {
    fn region(&self) -> RegionHandle {
        self.region
    }
}

/// A sum type laid out as a payload union `U`.
///
/// Implemented by the `#[repr(C)] union` generated for each sum type.
pub trait UnionType: Copy {
    /// Number of declared variants; valid tags are `0..VARIANTS`.
    const VARIANTS: u32;
}

/// One variant of the sum type `U`.
pub trait Variant<U: UnionType>: Copy {
    /// Tag identifying this variant.
    const TAG: u32;

    /// Store this variant into the payload.
    fn inject(self) -> U;

    /// Read this variant out of the payload.
    ///
    /// # Safety
    ///
    /// The payload must currently hold this variant.
    unsafe fn project(payload: U) -> Self;
}

/// A tag plus the payload it describes.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TaggedUnion<U: UnionType> {
    tag: u32,
    payload: U,
}

impl<U: UnionType> TaggedUnion<U> {
    /// Build from a raw tag and payload.
    ///
    /// # Safety
    ///
    /// `payload` must hold the variant identified by `tag`.
    pub unsafe fn new(tag: u32, payload: U) -> RuntimeResult<Self> {
        if tag >= U::VARIANTS {
            return Err(RuntimeError::InvalidTag {
                tag,
                variants: U::VARIANTS,
            });
        }
        Ok(Self {
            tag,
            payload,
        })
    }

    /// Build from a typed variant; the tag is set together with the payload.
    pub fn from_variant<V: Variant<U>>(value: V) -> Self {
        Self {
            tag: V::TAG,
            payload: value.inject(),
        }
    }

    /// The current tag.
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Whether the current variant is `V`.
    pub fn is<V: Variant<U>>(&self) -> bool {
        self.tag == V::TAG
    }

    /// Read variant `V` if the tag matches.
    pub fn downcast<V: Variant<U>>(&self) -> Option<V> {
        if self.is::<V>() {
            // SAFETY: tag and payload are only ever set together.
            Some(unsafe { V::project(self.payload) })
        } else {
            None
        }
    }

    /// The raw payload.
    pub fn payload(&self) -> U {
        self.payload
    }
}

impl<U: UnionType> fmt::Debug for TaggedUnion<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedUnion")
            .field("tag", &self.tag)
            .field("variants", &U::VARIANTS)
            .finish_non_exhaustive()
    }
}
