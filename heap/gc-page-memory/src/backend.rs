//! The page-level entry point of the heap.
//!
//! [`PageBackend`] owns every region it creates. Normal pages are recycled
//! through a [`NormalPageMemoryPool`]; large pages get a reservation of their
//! own that is released as soon as the page is freed.

use crate::region::unprotect;
use crate::{
    LargePageMemoryRegion, NUM_PAGE_REGIONS, NormalPageMemoryPool, NormalPageMemoryRegion,
    PageMemoryRegion, PageMemoryRegionTree,
};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use gc_page_allocator::{Address, PageAllocator};
use log::debug;

/// How the region tree refers back to the backend's regions.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum RegionHandle {
    /// Index into `normal_regions`.
    Normal(usize),
    /// Key into `large_regions`.
    Large(Address),
}

/// Hands out guarded page memory to the heap.
///
/// Not internally synchronised: callers sharing a backend between threads
/// wrap it in their own lock.
pub struct PageBackend<'a, A: PageAllocator + ?Sized> {
    allocator: &'a A,
    normal_regions: Vec<NormalPageMemoryRegion<'a, A>>,
    large_regions: BTreeMap<Address, LargePageMemoryRegion<'a, A>>,
    page_pool: NormalPageMemoryPool<usize>,
    region_tree: PageMemoryRegionTree<RegionHandle>,
}

impl<'a, A: PageAllocator + ?Sized> PageBackend<'a, A> {
    #[must_use]
    pub fn new(allocator: &'a A) -> Self {
        Self {
            allocator,
            normal_regions: Vec::new(),
            large_regions: BTreeMap::new(),
            page_pool: NormalPageMemoryPool::new(),
            region_tree: PageMemoryRegionTree::new(),
        }
    }

    /// A read-write normal page for `bucket`; returns its writeable base.
    ///
    /// # Panics
    /// If `bucket` is out of range or address space is exhausted.
    pub fn allocate_normal_page_memory(&mut self, bucket: usize) -> Address {
        let (index, writeable_base) = match self.page_pool.take(bucket) {
            Some(entry) => entry,
            None => {
                self.grow_normal_pages(bucket);
                self.page_pool
                    .take(bucket)
                    .unwrap_or_else(|| unreachable!("fresh region added no pages"))
            }
        };
        self.normal_regions[index].allocate(writeable_base);
        writeable_base
    }

    /// Return a normal page obtained from
    /// [`allocate_normal_page_memory`](Self::allocate_normal_page_memory).
    ///
    /// The page becomes inaccessible and is kept for reuse in `bucket`.
    ///
    /// # Panics
    /// If `writeable_base` is not an allocated normal page.
    pub fn free_normal_page_memory(&mut self, bucket: usize, writeable_base: Address) {
        let Some(RegionHandle::Normal(index)) = self.region_tree.lookup(writeable_base) else {
            panic!("{writeable_base} is not a normal page");
        };
        self.normal_regions[index].free(writeable_base);
        self.page_pool.add(bucket, index, writeable_base);
    }

    /// A read-write large page of at least `size` bytes; returns its writeable base.
    ///
    /// # Panics
    /// If `size` is zero or address space is exhausted.
    pub fn allocate_large_page_memory(&mut self, size: usize) -> Address {
        let region = LargePageMemoryRegion::new(self.allocator, size);
        let page_memory = *region.page_memory();
        unprotect(self.allocator, &page_memory);

        let writeable_base = page_memory.writeable_region().base();
        self.region_tree
            .add(region.reserved_region(), RegionHandle::Large(writeable_base));
        self.large_regions.insert(writeable_base, region);
        debug!(
            "allocated large page {} for {size:#x} bytes",
            page_memory.writeable_region()
        );
        writeable_base
    }

    /// Release a large page and its reservation.
    ///
    /// # Panics
    /// If `writeable_base` is not a live large page.
    pub fn free_large_page_memory(&mut self, writeable_base: Address) {
        let Some(RegionHandle::Large(key)) = self.region_tree.lookup(writeable_base) else {
            panic!("{writeable_base} is not a large page");
        };
        assert_eq!(key, writeable_base, "{writeable_base} is not the start of a large page");
        let region = self
            .large_regions
            .remove(&key)
            .unwrap_or_else(|| unreachable!("tree and large regions out of sync"));
        self.region_tree.remove(region.reserved_region());
        debug!("freed large page {writeable_base}");
    }

    /// Writeable base of the live page whose usable part contains `address`.
    #[must_use]
    pub fn lookup(&self, address: Address) -> Option<Address> {
        match self.region_tree.lookup(address)? {
            RegionHandle::Normal(index) => self.normal_regions[index].lookup(address),
            RegionHandle::Large(key) => self.large_regions.get(&key)?.lookup(address),
        }
    }

    /// Normal regions reserved so far; they are kept until the backend drops.
    #[must_use]
    pub fn normal_region_count(&self) -> usize {
        self.normal_regions.len()
    }

    /// Large pages currently alive.
    #[must_use]
    pub fn large_region_count(&self) -> usize {
        self.large_regions.len()
    }

    /// Reserve a new normal region and pool all of its pages under `bucket`.
    fn grow_normal_pages(&mut self, bucket: usize) {
        let region = NormalPageMemoryRegion::new(self.allocator);
        let index = self.normal_regions.len();
        for page_memory in region.iter().rev() {
            self.page_pool
                .add(bucket, index, page_memory.writeable_region().base());
        }
        self.region_tree
            .add(region.reserved_region(), RegionHandle::Normal(index));
        debug!(
            "reserved normal region {} with {NUM_PAGE_REGIONS} pages for bucket {bucket}",
            region.reserved_region()
        );
        self.normal_regions.push(region);
    }
}
