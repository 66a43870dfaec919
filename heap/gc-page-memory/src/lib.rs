//! # Guarded Page Memory
//!
//! Backing store for a garbage-collected heap: reserves virtual address
//! space through a [`PageAllocator`](gc_page_allocator::PageAllocator),
//! carves it into pages and surrounds every usable page with guard pages so
//! that stray accesses fault instead of corrupting a neighbour.
//!
//! ## Layout
//!
//! ```text
//! NormalPageMemoryRegion (NUM_PAGE_REGIONS × PAGE_SIZE, one reservation)
//! ┌─────┬──────────────┬─────┬─────┬──────────────┬─────┬─ ─ ─┐
//! │guard│  writeable 0 │guard│guard│  writeable 1 │guard│ ... │
//! └─────┴──────────────┴─────┴─────┴──────────────┴─────┴─ ─ ─┘
//!  ◄──────── page 0 ──────────►◄──────── page 1 ──────────►
//!
//! LargePageMemoryRegion (payload + 2 × GUARD_PAGE_SIZE, rounded up)
//! ┌─────┬────────────────────────────────────────────┬─────┐
//! │guard│                 writeable                  │guard│
//! └─────┴────────────────────────────────────────────┴─────┘
//! ```
//!
//! Reservations start out inaccessible. Pages are opened either by the
//! [`PageBackend`] when it hands them to the heap, or wholesale through
//! [`PageMemoryRegion::unprotect_for_testing`].
//!
//! ## Components
//!
//! | Type | Role |
//! |------|------|
//! | [`MemoryRegion`] | `[base, base + size)` with containment checks. |
//! | [`PageMemory`] | Overall span of a page plus its writeable part. |
//! | [`PageMemoryRegion`] | Common interface of both region kinds. |
//! | [`NormalPageMemoryRegion`] | A batch of [`NUM_PAGE_REGIONS`] fixed-size pages. |
//! | [`LargePageMemoryRegion`] | One page sized for a single large payload. |
//! | [`PageMemoryRegionTree`] | Address → region lookup. |
//! | [`NormalPageMemoryPool`] | Per-bucket reuse of freed normal pages. |
//! | [`PageBackend`] | Owns all regions, allocates and frees pages. |
//!
//! ## Failure Model
//!
//! Nothing here returns an error. Running out of address space, a refused
//! permission change and every broken layout invariant panic: for a
//! GC-backed process these are unrecoverable.
//!
//! ## Guard Pages and Commit Granularity
//!
//! Guard pages stay inaccessible only if the allocator can change
//! permissions in [`GUARD_PAGE_SIZE`] steps. Otherwise whole pages, guards
//! included, are opened; [`supports_committing_guard_pages`] tells which mode
//! applies.

#![cfg_attr(not(any(test, doctest, feature = "std")), no_std)]

extern crate alloc;

mod backend;
mod large;
mod memory_region;
mod normal;
mod page_memory;
mod pool;
mod region;
mod region_tree;

pub use backend::PageBackend;
pub use large::LargePageMemoryRegion;
pub use memory_region::MemoryRegion;
pub use normal::NormalPageMemoryRegion;
pub use page_memory::PageMemory;
pub use pool::NormalPageMemoryPool;
pub use region::{PageMemoryRegion, supports_committing_guard_pages};
pub use region_tree::PageMemoryRegionTree;

/// Size of a normal page, guard pages included.
pub const PAGE_SIZE: usize = 1 << 17;

/// Size of each of the two guard pages flanking a page.
pub const GUARD_PAGE_SIZE: usize = 4096;

/// Pages per [`NormalPageMemoryRegion`].
pub const NUM_PAGE_REGIONS: usize = 10;

/// Buckets of the [`NormalPageMemoryPool`].
pub const NUM_POOL_BUCKETS: usize = 16;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(GUARD_PAGE_SIZE.is_power_of_two());
    assert!(GUARD_PAGE_SIZE <= PAGE_SIZE);
    assert!(2 * GUARD_PAGE_SIZE < PAGE_SIZE, "no room left between guard pages");
};
