//! The shared part of both region kinds: owning a reservation and the
//! guard-page layout and protection rules applied to its pages.

use crate::{GUARD_PAGE_SIZE, MemoryRegion, PAGE_SIZE, PageMemory};
use gc_page_allocator::{Address, PageAllocator, Permission, round_up};
use log::{debug, trace};

/// A region of page memory backed by exactly one reservation.
///
/// Implemented by [`NormalPageMemoryRegion`](crate::NormalPageMemoryRegion)
/// and [`LargePageMemoryRegion`](crate::LargePageMemoryRegion). Dropping an
/// implementor releases the whole reservation.
pub trait PageMemoryRegion {
    /// The complete reservation, guard pages included.
    fn reserved_region(&self) -> MemoryRegion;

    fn is_large(&self) -> bool;

    /// Writeable base of the page whose usable part contains `address`.
    ///
    /// `None` for guard bytes, for unused pages and for foreign addresses.
    fn lookup(&self, address: Address) -> Option<Address>;

    /// Grant read-write access to every page of the region.
    ///
    /// Only the writeable parts are opened when the allocator can commit at
    /// guard-page granularity (see [`supports_committing_guard_pages`]);
    /// otherwise whole pages, guard pages included, become accessible.
    fn unprotect_for_testing(&self);
}

/// Whether `allocator` can change permissions at guard-page granularity.
///
/// When this is `false`, unprotecting a page also opens its guard pages.
pub fn supports_committing_guard_pages<A: PageAllocator + ?Sized>(allocator: &A) -> bool {
    GUARD_PAGE_SIZE.is_multiple_of(allocator.commit_page_size())
}

/// Make a page accessible, honouring the allocator's commit granularity.
///
/// # Panics
/// If the allocator refuses the permission change.
pub(crate) fn unprotect<A: PageAllocator + ?Sized>(allocator: &A, page_memory: &PageMemory) {
    set_page_permission(allocator, page_memory, Permission::ReadWrite);
}

/// Revoke all access to a page, the inverse of [`unprotect`].
///
/// # Panics
/// If the allocator refuses the permission change.
pub(crate) fn protect<A: PageAllocator + ?Sized>(allocator: &A, page_memory: &PageMemory) {
    set_page_permission(allocator, page_memory, Permission::NoAccess);
}

fn set_page_permission<A: PageAllocator + ?Sized>(
    allocator: &A,
    page_memory: &PageMemory,
    permission: Permission,
) {
    let region = if supports_committing_guard_pages(allocator) {
        page_memory.writeable_region()
    } else {
        let overall = page_memory.overall_region();
        assert!(
            overall.size().is_multiple_of(allocator.commit_page_size()),
            "page {overall} is not a multiple of the commit page size {:#x}",
            allocator.commit_page_size()
        );
        debug!(
            "commit granularity {:#x} exceeds guard pages; {permission} applies to all of {overall}",
            allocator.commit_page_size()
        );
        overall
    };

    if let Err(e) = allocator.set_permissions(region.base(), region.size(), permission) {
        panic!("failed to set {permission} on {region}: {e}");
    }
}

/// Carve a page out of `overall` by trimming a guard page off both ends.
///
/// # Panics
/// If `overall` is too small to hold two guard pages and a usable byte.
pub(crate) fn guarded_page_memory(overall: MemoryRegion) -> PageMemory {
    assert!(
        overall.size() > 2 * GUARD_PAGE_SIZE,
        "page {overall} cannot hold two guard pages"
    );
    let writeable = MemoryRegion::new(
        overall.base() + GUARD_PAGE_SIZE,
        overall.size() - 2 * GUARD_PAGE_SIZE,
    );
    PageMemory::new(overall, writeable)
}

/// Exclusive ownership of one reservation, released on drop.
pub(crate) struct Reservation<'a, A: PageAllocator + ?Sized> {
    allocator: &'a A,
    region: MemoryRegion,
}

impl<'a, A: PageAllocator + ?Sized> Reservation<'a, A> {
    /// Reserve at least `length` bytes of inaccessible address space.
    ///
    /// The length is rounded up to the allocator's reservation granularity
    /// and the base is aligned to [`PAGE_SIZE`] (or the granularity, if coarser).
    ///
    /// # Panics
    /// If the rounded length overflows, the allocator cannot provide the
    /// address space, or the returned base is misaligned.
    pub(crate) fn new(allocator: &'a A, length: usize) -> Self {
        let granularity = allocator.allocate_page_size();
        let Some(length) = round_up(length, granularity) else {
            panic!("failed to reserve {length:#x} bytes of page memory: size overflows");
        };
        let alignment = PAGE_SIZE.max(granularity);
        let base = match allocator.allocate_pages(None, length, alignment, Permission::NoAccess) {
            Ok(base) => base,
            Err(e) => panic!("failed to reserve {length:#x} bytes of page memory: {e}"),
        };
        assert!(
            base.is_aligned(alignment),
            "reservation at {base} is not aligned to {alignment:#x}"
        );

        let region = MemoryRegion::new(base, length);
        trace!("reserved page memory {region}");
        Self { allocator, region }
    }

    #[inline]
    pub(crate) const fn region(&self) -> MemoryRegion {
        self.region
    }

    #[inline]
    pub(crate) const fn allocator(&self) -> &'a A {
        self.allocator
    }
}

impl<A: PageAllocator + ?Sized> Drop for Reservation<'_, A> {
    fn drop(&mut self) {
        let region = self.region;
        if let Err(e) = self.allocator.free_pages(region.base(), region.size()) {
            panic!("failed to release page memory {region}: {e}");
        }
        trace!("released page memory {region}");
    }
}
