use crate::region::{Reservation, guarded_page_memory, unprotect};
use crate::{GUARD_PAGE_SIZE, MemoryRegion, PageMemory, PageMemoryRegion};
use gc_page_allocator::{Address, PageAllocator};

/// A reservation holding a single guarded page sized for one large payload.
///
/// The page spans the whole reservation; its first and last
/// [`GUARD_PAGE_SIZE`] bytes are the guard pages. Because the reservation is
/// rounded up to the allocator's granularity, the writeable part may be
/// larger than requested.
pub struct LargePageMemoryRegion<'a, A: PageAllocator + ?Sized> {
    reservation: Reservation<'a, A>,
    page_memory: PageMemory,
}

impl<'a, A: PageAllocator + ?Sized> LargePageMemoryRegion<'a, A> {
    /// Reserve a page with at least `length` writeable bytes.
    ///
    /// # Panics
    /// If `length` is zero, does not fit the address space together with its
    /// guard pages, or cannot be reserved.
    #[must_use]
    pub fn new(allocator: &'a A, length: usize) -> Self {
        assert!(length > 0, "large page memory must not be empty");
        let Some(padded) = length.checked_add(2 * GUARD_PAGE_SIZE) else {
            panic!("failed to reserve a large page of {length:#x} bytes: size overflows");
        };
        let reservation = Reservation::new(allocator, padded);
        let page_memory = guarded_page_memory(reservation.region());
        assert!(
            page_memory.writeable_region().size() >= length,
            "large page {} is smaller than {length:#x} bytes",
            page_memory.writeable_region()
        );
        Self {
            reservation,
            page_memory,
        }
    }

    #[inline]
    #[must_use]
    pub const fn page_memory(&self) -> &PageMemory {
        &self.page_memory
    }
}

impl<A: PageAllocator + ?Sized> PageMemoryRegion for LargePageMemoryRegion<'_, A> {
    fn reserved_region(&self) -> MemoryRegion {
        self.reservation.region()
    }

    fn is_large(&self) -> bool {
        true
    }

    fn lookup(&self, address: Address) -> Option<Address> {
        let writeable = self.page_memory.writeable_region();
        writeable.contains(address).then_some(writeable.base())
    }

    fn unprotect_for_testing(&self) {
        unprotect(self.reservation.allocator(), &self.page_memory);
    }
}
