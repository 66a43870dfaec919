use core::fmt;
use core::ops::{Add, AddAssign, Sub};
use core::ptr::NonNull;

/// Virtual address handed out by, or passed to, a [`PageAllocator`](crate::PageAllocator).
///
/// A thin wrapper around `usize`. It carries no provenance and performs no
/// validation; it only names the *kind* of value so that byte counts and
/// addresses are not mixed up in region arithmetic.
///
/// ### Semantics
/// - Arithmetic via [`Add`]/[`Sub`] is plain (overflow panics in debug).
/// - [`Address::offset_from`] is **wrapping**, so that range checks of the
///   form `addr.offset_from(base) < size` reject addresses below `base`.
///
/// ### Examples
/// ```rust
/// # use gc_page_allocator::Address;
/// let base = Address::new(0x10_0000);
/// let inside = base + 0x10;
/// assert_eq!(inside.offset_from(base), 0x10);
/// assert!(Address::new(0x0F_FFFF).offset_from(base) > 0x1000);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Address(usize);

impl Address {
    /// The null address.
    pub const NULL: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr.expose_provenance())
    }

    #[inline]
    #[must_use]
    pub fn from_nonnull<T>(ptr: NonNull<T>) -> Self {
        Self::from_ptr(ptr.as_ptr())
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Raw pointer to this address, for handing to the OS or for direct access.
    #[inline]
    #[must_use]
    pub fn as_ptr<T>(self) -> *const T {
        core::ptr::with_exposed_provenance(self.0)
    }

    /// Mutable raw pointer to this address.
    #[inline]
    #[must_use]
    pub fn as_mut_ptr<T>(self) -> *mut T {
        core::ptr::with_exposed_provenance_mut(self.0)
    }

    /// Bytes from `origin` to `self`, computed with wrapping arithmetic.
    #[inline]
    #[must_use]
    pub const fn offset_from(self, origin: Self) -> usize {
        self.0.wrapping_sub(origin.0)
    }

    /// Align up to `align` (must be a power of two).
    #[inline]
    #[must_use]
    pub const fn align_up(self, align: usize) -> Self {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        Self((self.0 + (align - 1)) & !(align - 1))
    }

    /// Align down to `align` (must be a power of two).
    #[inline]
    #[must_use]
    pub const fn align_down(self, align: usize) -> Self {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        Self(self.0 & !(align - 1))
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self, align: usize) -> bool {
        self.0 & (align - 1) == 0
    }
}

/// Round `size` up to the next multiple of `granularity` (any non-zero value).
///
/// `None` if the rounded size does not fit in a `usize`.
#[inline]
#[must_use]
pub const fn round_up(size: usize, granularity: usize) -> Option<usize> {
    size.div_ceil(granularity).checked_mul(granularity)
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{:016X})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<usize> for Address {
    #[inline]
    fn from(v: usize) -> Self {
        Self::new(v)
    }
}

impl From<Address> for usize {
    #[inline]
    fn from(a: Address) -> Self {
        a.as_usize()
    }
}

impl<T> From<NonNull<T>> for Address {
    #[inline]
    fn from(ptr: NonNull<T>) -> Self {
        Self::from_nonnull(ptr)
    }
}

impl Add<usize> for Address {
    type Output = Self;
    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<usize> for Address {
    #[inline]
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs;
    }
}

impl Sub<usize> for Address {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: usize) -> Self::Output {
        Self(self.0 - rhs)
    }
}
