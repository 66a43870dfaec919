use crate::region::{Reservation, guarded_page_memory, protect, unprotect};
use crate::{MemoryRegion, NUM_PAGE_REGIONS, PAGE_SIZE, PageMemory, PageMemoryRegion};
use gc_page_allocator::{Address, PageAllocator};
use log::trace;

/// A reservation split into [`NUM_PAGE_REGIONS`] guarded pages of
/// [`PAGE_SIZE`] bytes each.
///
/// Page *i* spans `[base + i * PAGE_SIZE, base + (i + 1) * PAGE_SIZE)`; pages
/// are packed without gaps. All pages start out inaccessible and unused.
/// [`allocate`](Self::allocate) hands a page to the heap and opens it,
/// [`free`](Self::free) takes it back and closes it again.
pub struct NormalPageMemoryRegion<'a, A: PageAllocator + ?Sized> {
    reservation: Reservation<'a, A>,
    page_memories: [PageMemory; NUM_PAGE_REGIONS],
    page_memories_in_use: [bool; NUM_PAGE_REGIONS],
}

impl<'a, A: PageAllocator + ?Sized> NormalPageMemoryRegion<'a, A> {
    /// Reserve and lay out a fresh batch of pages.
    ///
    /// `allocator` must outlive the region; the borrow checker enforces it.
    ///
    /// # Panics
    /// If the address space cannot be reserved.
    #[must_use]
    pub fn new(allocator: &'a A) -> Self {
        let reservation = Reservation::new(allocator, NUM_PAGE_REGIONS * PAGE_SIZE);
        let base = reservation.region().base();
        let page_memories = core::array::from_fn(|i| {
            guarded_page_memory(MemoryRegion::new(base + i * PAGE_SIZE, PAGE_SIZE))
        });
        Self {
            reservation,
            page_memories,
            page_memories_in_use: [false; NUM_PAGE_REGIONS],
        }
    }

    /// Page `index` in address order.
    ///
    /// # Panics
    /// If `index >= NUM_PAGE_REGIONS`.
    #[inline]
    #[must_use]
    pub const fn page_memory(&self, index: usize) -> &PageMemory {
        &self.page_memories[index]
    }

    /// Pages in ascending address order.
    pub fn iter(&self) -> core::slice::Iter<'_, PageMemory> {
        self.page_memories.iter()
    }

    /// Whether page `index` is currently handed out.
    ///
    /// # Panics
    /// If `index >= NUM_PAGE_REGIONS`.
    #[inline]
    #[must_use]
    pub const fn is_in_use(&self, index: usize) -> bool {
        self.page_memories_in_use[index]
    }

    /// Hand out the page whose writeable part starts at `writeable_base`.
    ///
    /// # Panics
    /// If `writeable_base` is not the start of a page, the page is already in
    /// use, or granting access fails.
    pub fn allocate(&mut self, writeable_base: Address) {
        let index = self.index_of(writeable_base);
        assert_eq!(
            self.page_memories[index].writeable_region().base(),
            writeable_base,
            "{writeable_base} is not the start of a page"
        );
        self.change_used(index, true);
        unprotect(self.reservation.allocator(), &self.page_memories[index]);
        trace!("allocated normal page {writeable_base}");
    }

    /// Take back the page whose writeable part starts at `writeable_base`.
    ///
    /// # Panics
    /// If `writeable_base` is not the start of a page, the page is not in use,
    /// or revoking access fails.
    pub fn free(&mut self, writeable_base: Address) {
        let index = self.index_of(writeable_base);
        assert_eq!(
            self.page_memories[index].writeable_region().base(),
            writeable_base,
            "{writeable_base} is not the start of a page"
        );
        self.change_used(index, false);
        protect(self.reservation.allocator(), &self.page_memories[index]);
        trace!("freed normal page {writeable_base}");
    }

    fn change_used(&mut self, index: usize, in_use: bool) {
        assert_ne!(
            self.page_memories_in_use[index], in_use,
            "page {index} of {} is already {}",
            self.reservation.region(),
            if in_use { "in use" } else { "free" }
        );
        self.page_memories_in_use[index] = in_use;
    }

    /// Index of the page containing `address`.
    ///
    /// # Panics
    /// If `address` lies outside the reservation.
    fn index_of(&self, address: Address) -> usize {
        let reserved = self.reservation.region();
        assert!(
            reserved.contains(address),
            "{address} is outside normal page region {reserved}"
        );
        address.offset_from(reserved.base()) / PAGE_SIZE
    }
}

impl<A: PageAllocator + ?Sized> PageMemoryRegion for NormalPageMemoryRegion<'_, A> {
    fn reserved_region(&self) -> MemoryRegion {
        self.reservation.region()
    }

    fn is_large(&self) -> bool {
        false
    }

    fn lookup(&self, address: Address) -> Option<Address> {
        let reserved = self.reservation.region();
        if !reserved.contains(address) {
            return None;
        }
        let index = address.offset_from(reserved.base()) / PAGE_SIZE;
        if !self.page_memories_in_use[index] {
            return None;
        }
        let writeable = self.page_memories[index].writeable_region();
        writeable.contains(address).then_some(writeable.base())
    }

    fn unprotect_for_testing(&self) {
        for page_memory in &self.page_memories {
            unprotect(self.reservation.allocator(), page_memory);
        }
    }
}

impl<'r, A: PageAllocator + ?Sized> IntoIterator for &'r NormalPageMemoryRegion<'_, A> {
    type Item = &'r PageMemory;
    type IntoIter = core::slice::Iter<'r, PageMemory>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{GUARD_PAGE_SIZE, supports_committing_guard_pages};
    use gc_page_allocator::testing::TrackingPageAllocator;
    use gc_page_allocator::{Permission, SystemPageAllocator};

    fn allocator() -> TrackingPageAllocator<SystemPageAllocator> {
        TrackingPageAllocator::new(SystemPageAllocator::new())
    }

    #[test]
    fn pages_are_packed_and_guarded() {
        let alloc = allocator();
        let region = NormalPageMemoryRegion::new(&alloc);
        assert!(!region.is_large());

        let pages: Vec<_> = region.iter().collect();
        assert_eq!(pages.len(), NUM_PAGE_REGIONS);
        assert_eq!(pages[0].overall_region().base(), region.reserved_region().base());
        for pair in pages.windows(2) {
            assert_eq!(pair[0].overall_region().end(), pair[1].overall_region().base());
        }
        for page in &region {
            let overall = page.overall_region();
            let writeable = page.writeable_region();
            assert_eq!(overall.size(), PAGE_SIZE);
            assert_eq!(writeable.base(), overall.base() + GUARD_PAGE_SIZE);
            assert_eq!(overall.end(), writeable.end() + GUARD_PAGE_SIZE);
        }
    }

    #[test]
    fn allocate_and_free_toggle_access() {
        let alloc = allocator();
        let mut region = NormalPageMemoryRegion::new(&alloc);
        let page = *region.page_memory(3);
        let base = page.writeable_region().base();

        assert_eq!(alloc.permission_at(base), Some(Permission::NoAccess));
        region.allocate(base);
        assert!(region.is_in_use(3));
        assert_eq!(alloc.permission_at(base), Some(Permission::ReadWrite));
        if supports_committing_guard_pages(&alloc) {
            assert_eq!(
                alloc.permission_at(page.overall_region().base()),
                Some(Permission::NoAccess)
            );
        }

        region.free(base);
        assert!(!region.is_in_use(3));
        assert_eq!(alloc.permission_at(base), Some(Permission::NoAccess));
    }

    #[test]
    fn lookup_only_finds_used_writeable_bytes() {
        let alloc = allocator();
        let mut region = NormalPageMemoryRegion::new(&alloc);
        let page = *region.page_memory(1);
        let writeable = page.writeable_region();

        assert_eq!(region.lookup(writeable.base()), None);
        region.allocate(writeable.base());

        assert_eq!(region.lookup(writeable.base()), Some(writeable.base()));
        assert_eq!(region.lookup(writeable.end() - 1), Some(writeable.base()));
        assert_eq!(region.lookup(writeable.base() - 1), None);
        assert_eq!(region.lookup(writeable.end()), None);
        assert_eq!(region.lookup(region.page_memory(2).writeable_region().base()), None);
        assert_eq!(region.lookup(region.reserved_region().end()), None);

        region.free(writeable.base());
    }

    #[test]
    #[should_panic(expected = "already in use")]
    fn double_allocation_is_fatal() {
        let alloc = allocator();
        let mut region = NormalPageMemoryRegion::new(&alloc);
        let base = region.page_memory(0).writeable_region().base();
        region.allocate(base);
        region.allocate(base);
    }

    #[test]
    #[should_panic(expected = "is not the start of a page")]
    fn interior_address_is_fatal() {
        let alloc = allocator();
        let mut region = NormalPageMemoryRegion::new(&alloc);
        let base = region.page_memory(2).writeable_region().base();
        region.allocate(base + 100);
    }

    #[test]
    #[should_panic(expected = "outside normal page region")]
    fn foreign_address_is_fatal() {
        let alloc = allocator();
        let mut region = NormalPageMemoryRegion::new(&alloc);
        let end = region.reserved_region().end();
        region.allocate(end + GUARD_PAGE_SIZE);
    }

    #[test]
    fn region_is_released_on_drop() {
        let alloc = allocator();
        {
            let _region = NormalPageMemoryRegion::new(&alloc);
            assert_eq!(alloc.live_reservations(), 1);
            assert!(alloc.reserved_bytes() >= NUM_PAGE_REGIONS * PAGE_SIZE);
        }
        assert_eq!(alloc.live_reservations(), 0);
        assert_eq!(alloc.release_calls(), 1);
    }
}
