//! `mmap`-backed page allocator for unix hosts.

use crate::{Address, PageAllocator, PageAllocatorError, Permission};
use log::{trace, warn};

#[cfg(target_os = "linux")]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
#[cfg(not(target_os = "linux"))]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

/// Page allocator talking directly to the host kernel.
///
/// Both granularities equal the OS page size. Alignments larger than a page
/// are honoured by over-reserving and unmapping the unaligned head and tail.
#[derive(Debug, Clone, Copy)]
pub struct SystemPageAllocator {
    page_size: usize,
}

impl SystemPageAllocator {
    /// # Panics
    /// If the host does not report a usable page size.
    #[must_use]
    pub fn new() -> Self {
        // SAFETY: sysconf has no memory-safety preconditions.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page_size = usize::try_from(page_size).unwrap_or(0);
        assert!(
            page_size.is_power_of_two(),
            "host reported invalid page size {page_size}"
        );
        Self { page_size }
    }

    fn check_aligned(&self, address: Address, length: usize) -> Result<(), PageAllocatorError> {
        if address.is_aligned(self.page_size) && length.is_multiple_of(self.page_size) {
            Ok(())
        } else {
            Err(PageAllocatorError::Unaligned {
                address,
                length,
                granularity: self.page_size,
            })
        }
    }

    /// Unmap a sub-range produced while trimming an over-sized reservation.
    fn trim(address: Address, length: usize) -> Result<(), PageAllocatorError> {
        if length == 0 {
            return Ok(());
        }
        // SAFETY: the range is part of a mapping this allocator just created
        // and has not handed out.
        let ret = unsafe { libc::munmap(address.as_mut_ptr(), length) };
        if ret == 0 {
            Ok(())
        } else {
            Err(PageAllocatorError::Release {
                address,
                length,
                errno: last_errno(),
            })
        }
    }

    /// Unmap what is left of a reservation that could not be trimmed.
    fn discard(address: Address, length: usize) {
        // SAFETY: the range is the untrimmed remainder of a mapping created by
        // `allocate_pages` that was never handed out.
        let ret = unsafe { libc::munmap(address.as_mut_ptr(), length) };
        if ret != 0 {
            warn!("leaking {address}+{length:#x} (errno {})", last_errno());
        }
    }
}

impl Default for SystemPageAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PageAllocator for SystemPageAllocator {
    fn allocate_page_size(&self) -> usize {
        self.page_size
    }

    fn commit_page_size(&self) -> usize {
        self.page_size
    }

    fn allocate_pages(
        &self,
        hint: Option<Address>,
        length: usize,
        alignment: usize,
        permission: Permission,
    ) -> Result<Address, PageAllocatorError> {
        let alignment = alignment.max(self.page_size);
        debug_assert!(alignment.is_power_of_two(), "alignment must be a power of two");
        self.check_aligned(Address::NULL, length)?;

        let request = length.checked_add(alignment - self.page_size).ok_or(
            PageAllocatorError::OutOfAddressSpace {
                requested: length,
                available: usize::MAX - (alignment - self.page_size),
            },
        )?;
        let hint = hint.map_or(core::ptr::null_mut(), |h| {
            h.align_down(alignment).as_mut_ptr::<libc::c_void>()
        });

        // SAFETY: anonymous private mapping; no existing memory is touched.
        let base = unsafe { libc::mmap(hint, request, prot_flags(permission), MAP_FLAGS, -1, 0) };
        if base == libc::MAP_FAILED {
            return Err(PageAllocatorError::Reserve {
                length,
                errno: last_errno(),
            });
        }

        let base = Address::from_ptr(base);
        let aligned = base.align_up(alignment);
        let head = aligned.offset_from(base);
        let tail = request - head - length;
        if let Err(e) = Self::trim(base, head) {
            Self::discard(base, request);
            return Err(e);
        }
        if let Err(e) = Self::trim(aligned + length, tail) {
            Self::discard(aligned, length + tail);
            return Err(e);
        }

        trace!("mmap {aligned}+{length:#x} {permission}");
        Ok(aligned)
    }

    fn free_pages(&self, address: Address, length: usize) -> Result<(), PageAllocatorError> {
        self.check_aligned(address, length)?;
        // SAFETY: the caller guarantees the range is a reservation it owns
        // and no references into it outlive this call.
        let ret = unsafe { libc::munmap(address.as_mut_ptr(), length) };
        if ret != 0 {
            return Err(PageAllocatorError::Release {
                address,
                length,
                errno: last_errno(),
            });
        }
        trace!("munmap {address}+{length:#x}");
        Ok(())
    }

    fn set_permissions(
        &self,
        address: Address,
        length: usize,
        permission: Permission,
    ) -> Result<(), PageAllocatorError> {
        self.check_aligned(address, length)?;
        // SAFETY: the range lies within a reservation owned by the caller.
        let ret = unsafe { libc::mprotect(address.as_mut_ptr(), length, prot_flags(permission)) };
        if ret != 0 {
            return Err(PageAllocatorError::Protect {
                address,
                length,
                permission,
                errno: last_errno(),
            });
        }

        if permission == Permission::NoAccess {
            // Hand the backing pages back; the next unprotect sees zeroes.
            // SAFETY: the range is inaccessible, nothing can observe the discard.
            let ret = unsafe { libc::madvise(address.as_mut_ptr(), length, libc::MADV_DONTNEED) };
            if ret != 0 {
                trace!("madvise {address}+{length:#x} failed (errno {})", last_errno());
            }
        }

        trace!("mprotect {address}+{length:#x} {permission}");
        Ok(())
    }
}

const fn prot_flags(permission: Permission) -> libc::c_int {
    match permission {
        Permission::NoAccess => libc::PROT_NONE,
        Permission::Read => libc::PROT_READ,
        Permission::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        Permission::ReadExecute => libc::PROT_READ | libc::PROT_EXEC,
        Permission::ReadWriteExecute => libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
