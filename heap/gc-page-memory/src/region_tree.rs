use crate::MemoryRegion;
use alloc::collections::BTreeMap;
use gc_page_allocator::Address;

/// Maps addresses to the reservation that contains them.
///
/// Reservations are keyed by base address; a lookup picks the closest base at
/// or below the address and checks that the reservation actually covers it.
/// The stored value is whatever the owner uses to find the region again.
#[derive(Debug)]
pub struct PageMemoryRegionTree<T> {
    set: BTreeMap<Address, (MemoryRegion, T)>,
}

impl<T: Copy> PageMemoryRegionTree<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            set: BTreeMap::new(),
        }
    }

    /// # Panics
    /// If a reservation with the same base is already registered.
    pub fn add(&mut self, region: MemoryRegion, value: T) {
        assert!(!region.is_empty(), "cannot register an empty region");
        let previous = self.set.insert(region.base(), (region, value));
        assert!(previous.is_none(), "region {region} registered twice");
    }

    /// # Panics
    /// If `region` was not registered.
    pub fn remove(&mut self, region: MemoryRegion) {
        let removed = self.set.remove(&region.base());
        assert!(
            removed.is_some_and(|(r, _)| r == region),
            "region {region} is not registered"
        );
    }

    /// The value registered for the reservation containing `address`.
    #[must_use]
    pub fn lookup(&self, address: Address) -> Option<T> {
        let (_, (region, value)) = self.set.range(..=address).next_back()?;
        region.contains(address).then_some(*value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

impl<T: Copy> Default for PageMemoryRegionTree<T> {
    fn default() -> Self {
        Self::new()
    }
}
