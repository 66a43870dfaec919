use crate::NUM_POOL_BUCKETS;
use alloc::vec::Vec;
use gc_page_allocator::Address;

/// Free normal pages, grouped by the bucket the heap asked for them in.
///
/// Each bucket is a LIFO stack of `(region, writeable_base)` entries, so the
/// most recently freed page is reused first.
#[derive(Debug)]
pub struct NormalPageMemoryPool<T> {
    pool: [Vec<(T, Address)>; NUM_POOL_BUCKETS],
}

impl<T> NormalPageMemoryPool<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pool: core::array::from_fn(|_| Vec::new()),
        }
    }

    /// # Panics
    /// If `bucket >= NUM_POOL_BUCKETS`.
    pub fn add(&mut self, bucket: usize, region: T, writeable_base: Address) {
        self.bucket_mut(bucket).push((region, writeable_base));
    }

    /// # Panics
    /// If `bucket >= NUM_POOL_BUCKETS`.
    pub fn take(&mut self, bucket: usize) -> Option<(T, Address)> {
        self.bucket_mut(bucket).pop()
    }

    /// Number of pooled pages in `bucket`.
    ///
    /// # Panics
    /// If `bucket >= NUM_POOL_BUCKETS`.
    #[must_use]
    pub fn len(&self, bucket: usize) -> usize {
        assert!(bucket < NUM_POOL_BUCKETS, "invalid pool bucket {bucket}");
        self.pool[bucket].len()
    }

    fn bucket_mut(&mut self, bucket: usize) -> &mut Vec<(T, Address)> {
        assert!(bucket < NUM_POOL_BUCKETS, "invalid pool bucket {bucket}");
        &mut self.pool[bucket]
    }
}

impl<T> Default for NormalPageMemoryPool<T> {
    fn default() -> Self {
        Self::new()
    }
}
