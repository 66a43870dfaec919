//! Test support: a bookkeeping allocator wrapper and a fault-free readability probe.

use crate::{Address, PageAllocator, PageAllocatorError, Permission};
use core::cell::RefCell;
use log::trace;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct Bookkeeping {
    /// Live reservations: base → length.
    reservations: BTreeMap<Address, usize>,
    /// Permission of every inner commit page of every live reservation.
    permissions: BTreeMap<Address, Permission>,
    reserved_bytes: usize,
    reserve_calls: usize,
    release_calls: usize,
    protect_calls: usize,
}

/// A [`PageAllocator`] wrapper that records what its callers do.
///
/// All calls are forwarded to `inner`, so memory behaves for real, while the
/// wrapper keeps track of live reservations and of the permission of each
/// page. It can additionally
///
/// - report a coarser [`allocate_page_size`](PageAllocator::allocate_page_size)
///   or [`commit_page_size`](PageAllocator::commit_page_size) than `inner`
///   (multiples only), rejecting permission changes that are not aligned to
///   the reported commit granularity, and
/// - cap the number of bytes reserved at any one time.
///
/// Frees must match a live reservation exactly.
///
/// Single-threaded: the bookkeeping lives in a [`RefCell`].
#[derive(Debug)]
pub struct TrackingPageAllocator<A> {
    inner: A,
    allocate_page_size: usize,
    commit_page_size: usize,
    reservation_limit: Option<usize>,
    state: RefCell<Bookkeeping>,
}

impl<A: PageAllocator> TrackingPageAllocator<A> {
    #[must_use]
    pub fn new(inner: A) -> Self {
        Self {
            allocate_page_size: inner.allocate_page_size(),
            commit_page_size: inner.commit_page_size(),
            inner,
            reservation_limit: None,
            state: RefCell::new(Bookkeeping::default()),
        }
    }

    /// Report `size` as the reservation granularity.
    ///
    /// # Panics
    /// If `size` is not a power-of-two multiple of the inner granularity.
    #[must_use]
    pub fn with_allocate_page_size(mut self, size: usize) -> Self {
        assert!(size.is_power_of_two(), "allocate page size must be a power of two");
        assert!(
            size.is_multiple_of(self.inner.allocate_page_size()),
            "allocate page size {size:#x} is finer than the host's"
        );
        self.allocate_page_size = size;
        self
    }

    /// Report `size` as the permission granularity.
    ///
    /// # Panics
    /// If `size` is not a power-of-two multiple of the inner granularity.
    #[must_use]
    pub fn with_commit_page_size(mut self, size: usize) -> Self {
        assert!(size.is_power_of_two(), "commit page size must be a power of two");
        assert!(
            size.is_multiple_of(self.inner.commit_page_size()),
            "commit page size {size:#x} is finer than the host's"
        );
        self.commit_page_size = size;
        self
    }

    /// Fail reservations once `bytes` are reserved at the same time.
    #[must_use]
    pub fn with_reservation_limit(mut self, bytes: usize) -> Self {
        self.reservation_limit = Some(bytes);
        self
    }

    #[must_use]
    pub const fn inner(&self) -> &A {
        &self.inner
    }

    /// Number of reservations not yet freed.
    #[must_use]
    pub fn live_reservations(&self) -> usize {
        self.state.borrow().reservations.len()
    }

    /// Bytes currently reserved.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.state.borrow().reserved_bytes
    }

    /// Successful `allocate_pages` calls so far.
    #[must_use]
    pub fn reserve_calls(&self) -> usize {
        self.state.borrow().reserve_calls
    }

    /// Successful `free_pages` calls so far.
    #[must_use]
    pub fn release_calls(&self) -> usize {
        self.state.borrow().release_calls
    }

    /// Successful `set_permissions` calls so far.
    #[must_use]
    pub fn protect_calls(&self) -> usize {
        self.state.borrow().protect_calls
    }

    /// Permission of the page containing `address`, or `None` if unreserved.
    #[must_use]
    pub fn permission_at(&self, address: Address) -> Option<Permission> {
        let page = address.align_down(self.inner.commit_page_size());
        self.state.borrow().permissions.get(&page).copied()
    }

    /// Whether `address` lies in a live reservation.
    #[must_use]
    pub fn is_reserved(&self, address: Address) -> bool {
        self.containing_reservation(address, 1).is_some()
    }

    fn containing_reservation(&self, address: Address, length: usize) -> Option<(Address, usize)> {
        let state = self.state.borrow();
        let (&base, &size) = state.reservations.range(..=address).next_back()?;
        let offset = address.offset_from(base);
        (offset < size && length <= size - offset).then_some((base, size))
    }

    fn record_permission(
        state: &mut Bookkeeping,
        address: Address,
        length: usize,
        page: usize,
        permission: Permission,
    ) {
        for offset in (0..length).step_by(page) {
            state.permissions.insert(address + offset, permission);
        }
    }
}

const fn unaligned(address: Address, length: usize, granularity: usize) -> PageAllocatorError {
    PageAllocatorError::Unaligned {
        address,
        length,
        granularity,
    }
}

impl<A: PageAllocator> PageAllocator for TrackingPageAllocator<A> {
    fn allocate_page_size(&self) -> usize {
        self.allocate_page_size
    }

    fn commit_page_size(&self) -> usize {
        self.commit_page_size
    }

    fn allocate_pages(
        &self,
        hint: Option<Address>,
        length: usize,
        alignment: usize,
        permission: Permission,
    ) -> Result<Address, PageAllocatorError> {
        let granularity = self.allocate_page_size;
        if length == 0 || !length.is_multiple_of(granularity) || !alignment.is_multiple_of(granularity)
        {
            return Err(unaligned(Address::NULL, length, granularity));
        }

        if let Some(limit) = self.reservation_limit {
            let available = limit.saturating_sub(self.reserved_bytes());
            if length > available {
                return Err(PageAllocatorError::OutOfAddressSpace {
                    requested: length,
                    available,
                });
            }
        }

        let base = self.inner.allocate_pages(hint, length, alignment, permission)?;

        let mut state = self.state.borrow_mut();
        state.reservations.insert(base, length);
        state.reserved_bytes += length;
        state.reserve_calls += 1;
        let page = self.inner.commit_page_size();
        Self::record_permission(&mut state, base, length, page, permission);
        trace!("tracked reservation {base}+{length:#x} ({} live)", state.reservations.len());
        Ok(base)
    }

    fn free_pages(&self, address: Address, length: usize) -> Result<(), PageAllocatorError> {
        let known = self.state.borrow().reservations.get(&address) == Some(&length);
        if !known {
            return Err(PageAllocatorError::UnknownReservation { address, length });
        }

        self.inner.free_pages(address, length)?;

        let mut state = self.state.borrow_mut();
        state.reservations.remove(&address);
        state.reserved_bytes -= length;
        state.release_calls += 1;
        let end = address + length;
        state.permissions.retain(|&page, _| page < address || page >= end);
        Ok(())
    }

    fn set_permissions(
        &self,
        address: Address,
        length: usize,
        permission: Permission,
    ) -> Result<(), PageAllocatorError> {
        let granularity = self.commit_page_size;
        if !address.is_aligned(granularity) || !length.is_multiple_of(granularity) {
            return Err(unaligned(address, length, granularity));
        }
        if self.containing_reservation(address, length).is_none() {
            return Err(PageAllocatorError::UnknownReservation { address, length });
        }

        self.inner.set_permissions(address, length, permission)?;

        let mut state = self.state.borrow_mut();
        state.protect_calls += 1;
        let page = self.inner.commit_page_size();
        Self::record_permission(&mut state, address, length, page, permission);
        Ok(())
    }
}

/// Whether the byte at `address` can be read, without touching it directly.
///
/// The kernel is asked to copy the byte into a pipe; an inaccessible or
/// unmapped address makes `write(2)` fail with `EFAULT` instead of raising
/// a fault in this process.
///
/// # Panics
/// If the probe pipe cannot be created.
#[cfg(unix)]
#[must_use]
pub fn is_readable(address: Address) -> bool {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` has room for the two descriptors.
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(ret, 0, "failed to create probe pipe");

    // SAFETY: the kernel validates the source buffer; no user-space access happens.
    let written = unsafe { libc::write(fds[1], address.as_ptr::<libc::c_void>(), 1) };

    // SAFETY: both descriptors were created above and are closed exactly once.
    unsafe {
        libc::close(fds[0]);
        libc::close(fds[1]);
    }
    written == 1
}
