use core::fmt;
use gc_page_allocator::Address;

/// A contiguous byte range `[base, base + size)`.
///
/// ### Invariants
/// - The [`Default`] value (`NULL`, 0) is the only empty region.
/// - Every region built with [`MemoryRegion::new`] has a non-null base and a
///   non-zero size.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct MemoryRegion {
    base: Address,
    size: usize,
}

impl MemoryRegion {
    /// # Panics
    /// If `base` is null or `size` is zero.
    #[inline]
    #[must_use]
    pub fn new(base: Address, size: usize) -> Self {
        assert!(!base.is_null(), "memory region base must not be null");
        assert!(size > 0, "memory region at {base} must not be empty");
        Self { base, size }
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> Address {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[inline]
    #[must_use]
    pub fn end(&self) -> Address {
        self.base + self.size
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether `address` lies in `[base, end)`.
    ///
    /// Addresses below `base` wrap around to huge offsets and are rejected.
    #[inline]
    #[must_use]
    pub const fn contains(&self, address: Address) -> bool {
        address.offset_from(self.base) < self.size
    }

    /// Whether `other` lies entirely within `self`.
    #[inline]
    #[must_use]
    pub fn contains_region(&self, other: &Self) -> bool {
        other.base >= self.base && other.end() <= self.end()
    }
}

impl fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryRegion({}..{})", self.base, self.end())
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:#x}", self.base, self.size)
    }
}
