//! # Page Allocator Interface
//!
//! The capability interface through which guarded GC page memory obtains
//! virtual address space from its host, plus the host implementations used
//! by the workspace.
//!
//! ## Overview
//!
//! A [`PageAllocator`] offers exactly the primitives a page-memory layer needs:
//!
//! | Operation | Meaning |
//! |-----------|---------|
//! | [`allocate_pages`](PageAllocator::allocate_pages) | Reserve a range of address space with an initial [`Permission`]. |
//! | [`free_pages`](PageAllocator::free_pages) | Return a whole reservation to the host. |
//! | [`set_permissions`](PageAllocator::set_permissions) | Change access rights of a sub-range. |
//! | [`allocate_page_size`](PageAllocator::allocate_page_size) | Granularity of reservations. |
//! | [`commit_page_size`](PageAllocator::commit_page_size) | Granularity of permission changes. |
//!
//! ## Implementations
//!
//! - [`SystemPageAllocator`] (unix + `std`): `mmap`/`mprotect`/`munmap` via `libc`.
//! - [`testing::TrackingPageAllocator`] (`std`): wraps another allocator,
//!   records reservations and per-page permissions, and can pretend to have
//!   coarser granularities or a limited address space.
//!
//! ## Thread Safety
//!
//! The trait takes `&self` everywhere. Whether an implementation may be shared
//! between threads is expressed through `Send`/`Sync` of the implementing
//! type; callers never lock on its behalf.

#![cfg_attr(not(any(test, doctest, feature = "std")), no_std)]

mod address;
mod error;
#[cfg(feature = "std")]
pub mod logger;
#[cfg(all(unix, feature = "std"))]
mod system;
#[cfg(feature = "std")]
pub mod testing;

pub use address::{Address, round_up};
pub use error::PageAllocatorError;
#[cfg(all(unix, feature = "std"))]
pub use system::SystemPageAllocator;

use core::fmt;

/// Access rights of a page range.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Permission {
    /// Any access faults.
    NoAccess,
    Read,
    ReadWrite,
    ReadExecute,
    ReadWriteExecute,
}

impl Permission {
    #[must_use]
    pub const fn is_readable(self) -> bool {
        !matches!(self, Self::NoAccess)
    }

    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite | Self::ReadWriteExecute)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoAccess => "---",
            Self::Read => "r--",
            Self::ReadWrite => "rw-",
            Self::ReadExecute => "r-x",
            Self::ReadWriteExecute => "rwx",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host service for reserving and protecting virtual memory.
///
/// Addresses and lengths passed to [`free_pages`](Self::free_pages) must
/// describe a complete range previously returned by
/// [`allocate_pages`](Self::allocate_pages). Ranges passed to
/// [`set_permissions`](Self::set_permissions) must be aligned to
/// [`commit_page_size`](Self::commit_page_size).
pub trait PageAllocator {
    /// Granularity (and minimum alignment) of reservations, in bytes.
    fn allocate_page_size(&self) -> usize;

    /// Granularity at which permissions can be changed, in bytes.
    fn commit_page_size(&self) -> usize;

    /// Reserve `length` bytes aligned to `alignment`, optionally near `hint`.
    ///
    /// `length` and `alignment` must be multiples of
    /// [`allocate_page_size`](Self::allocate_page_size).
    ///
    /// # Errors
    /// The host could not provide the range.
    fn allocate_pages(
        &self,
        hint: Option<Address>,
        length: usize,
        alignment: usize,
        permission: Permission,
    ) -> Result<Address, PageAllocatorError>;

    /// Release a reservation obtained from [`allocate_pages`](Self::allocate_pages).
    ///
    /// # Errors
    /// The range was not a reservation of this allocator, or the host refused.
    fn free_pages(&self, address: Address, length: usize) -> Result<(), PageAllocatorError>;

    /// Change the access rights of `[address, address + length)`.
    ///
    /// # Errors
    /// The range is misaligned or the host refused the change.
    fn set_permissions(
        &self,
        address: Address,
        length: usize,
        permission: Permission,
    ) -> Result<(), PageAllocatorError>;
}

impl<A: PageAllocator + ?Sized> PageAllocator for &A {
    fn allocate_page_size(&self) -> usize {
        (**self).allocate_page_size()
    }

    fn commit_page_size(&self) -> usize {
        (**self).commit_page_size()
    }

    fn allocate_pages(
        &self,
        hint: Option<Address>,
        length: usize,
        alignment: usize,
        permission: Permission,
    ) -> Result<Address, PageAllocatorError> {
        (**self).allocate_pages(hint, length, alignment, permission)
    }

    fn free_pages(&self, address: Address, length: usize) -> Result<(), PageAllocatorError> {
        (**self).free_pages(address, length)
    }

    fn set_permissions(
        &self,
        address: Address,
        length: usize,
        permission: Permission,
    ) -> Result<(), PageAllocatorError> {
        (**self).set_permissions(address, length, permission)
    }
}
