use crate::MemoryRegion;

/// A page as seen by the heap: the full span including guard pages, and the
/// part of it the heap may actually use.
///
/// ```text
/// overall   ┌───────┬────────────────────────────┬───────┐
///           │ guard │         writeable          │ guard │
///           └───────┴────────────────────────────┴───────┘
/// ```
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PageMemory {
    overall: MemoryRegion,
    writeable: MemoryRegion,
}

impl PageMemory {
    /// # Panics
    /// If `writeable` is not contained in `overall`; that is a layout bug.
    #[must_use]
    pub fn new(overall: MemoryRegion, writeable: MemoryRegion) -> Self {
        assert!(
            overall.contains_region(&writeable),
            "writeable region {writeable} escapes page {overall}"
        );
        Self { overall, writeable }
    }

    /// The whole span, guard pages included.
    #[inline]
    #[must_use]
    pub const fn overall_region(&self) -> MemoryRegion {
        self.overall
    }

    /// The usable sub-region.
    #[inline]
    #[must_use]
    pub const fn writeable_region(&self) -> MemoryRegion {
        self.writeable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gc_page_allocator::Address;

    #[test]
    fn nested_regions_are_accepted() {
        let overall = MemoryRegion::new(Address::new(0x10_0000), 0x4000);
        let writeable = MemoryRegion::new(Address::new(0x10_1000), 0x2000);
        let pm = PageMemory::new(overall, writeable);
        assert_eq!(pm.overall_region(), overall);
        assert_eq!(pm.writeable_region(), writeable);
    }

    #[test]
    #[should_panic(expected = "escapes page")]
    fn escaping_writeable_region_is_fatal() {
        let overall = MemoryRegion::new(Address::new(0x10_0000), 0x4000);
        let writeable = MemoryRegion::new(Address::new(0x10_3000), 0x2000);
        let _ = PageMemory::new(overall, writeable);
    }

    #[test]
    fn default_is_empty_pair() {
        let pm = PageMemory::default();
        assert!(pm.overall_region().is_empty());
        assert!(pm.writeable_region().is_empty());
    }
}
