#![cfg(unix)]

use gc_page_allocator::testing::{TrackingPageAllocator, is_readable};
use gc_page_allocator::{PageAllocator, Permission, SystemPageAllocator};
use gc_page_memory::{
    GUARD_PAGE_SIZE, LargePageMemoryRegion, NUM_PAGE_REGIONS, NormalPageMemoryRegion, PAGE_SIZE,
    PageMemory, PageMemoryRegion, supports_committing_guard_pages,
};
use log::LevelFilter;

fn tracking() -> TrackingPageAllocator<SystemPageAllocator> {
    gc_page_allocator::logger::init_for_tests(LevelFilter::Warn);
    TrackingPageAllocator::new(SystemPageAllocator::new())
}

/// An allocator whose commit granularity matches the guard page size and
/// whose reservation granularity is one normal page, if the host allows it.
fn guard_granular() -> Option<TrackingPageAllocator<SystemPageAllocator>> {
    let host = SystemPageAllocator::new();
    if host.commit_page_size() > GUARD_PAGE_SIZE {
        log::warn!("host pages are larger than guard pages; skipping");
        return None;
    }
    Some(
        tracking()
            .with_allocate_page_size(PAGE_SIZE)
            .with_commit_page_size(GUARD_PAGE_SIZE),
    )
}

fn assert_guarded(page: &PageMemory) {
    let overall = page.overall_region();
    let writeable = page.writeable_region();
    assert!(overall.contains_region(&writeable));
    assert_eq!(writeable.base(), overall.base() + GUARD_PAGE_SIZE);
    assert_eq!(overall.end(), writeable.end() + GUARD_PAGE_SIZE);
}

#[test]
fn every_page_is_guard_padded() {
    let alloc = tracking();
    let normal = NormalPageMemoryRegion::new(&alloc);
    normal.iter().for_each(assert_guarded);

    let large = LargePageMemoryRegion::new(&alloc, 3 * PAGE_SIZE + 5);
    assert_guarded(large.page_memory());
}

#[test]
fn normal_region_has_ten_tightly_packed_pages() {
    let alloc = tracking();
    let region = NormalPageMemoryRegion::new(&alloc);

    let pages: Vec<&PageMemory> = region.iter().collect();
    assert_eq!(pages.len(), NUM_PAGE_REGIONS);
    assert_eq!(NUM_PAGE_REGIONS, 10);
    for pair in pages.windows(2) {
        assert_eq!(pair[0].overall_region().end(), pair[1].overall_region().base());
    }
    assert!(region.reserved_region().contains_region(&pages[0].overall_region()));
    assert!(region.reserved_region().contains_region(&pages[9].overall_region()));
}

#[test]
fn large_region_fits_requested_length() {
    let alloc = tracking();
    for length in [1, 1024, GUARD_PAGE_SIZE, PAGE_SIZE, 5 * PAGE_SIZE + 3] {
        let region = LargePageMemoryRegion::new(&alloc, length);
        assert!(region.page_memory().writeable_region().size() >= length);
        assert!(region.is_large());
    }
    assert_eq!(alloc.live_reservations(), 0);
}

#[test]
fn reservations_are_returned_on_drop() {
    let probe = tracking();
    let size = NormalPageMemoryRegion::new(&probe).reserved_region().size();

    let alloc = tracking().with_reservation_limit(size);
    for _ in 0..3 {
        let region = NormalPageMemoryRegion::new(&alloc);
        assert_eq!(alloc.reserved_bytes(), region.reserved_region().size());
        drop(region);
        assert_eq!(alloc.reserved_bytes(), 0);
    }
    assert_eq!(alloc.reserve_calls(), 3);
    assert_eq!(alloc.release_calls(), 3);
}

#[test]
#[should_panic(expected = "failed to reserve")]
fn reservation_failure_is_fatal() {
    let alloc = tracking().with_reservation_limit(PAGE_SIZE);
    let _region = NormalPageMemoryRegion::new(&alloc);
}

#[test]
fn everything_starts_inaccessible() {
    let alloc = tracking();
    let region = NormalPageMemoryRegion::new(&alloc);
    for page in &region {
        let writeable = page.writeable_region();
        assert_eq!(alloc.permission_at(writeable.base()), Some(Permission::NoAccess));
        assert!(!is_readable(writeable.base()));
    }
}

#[test]
fn guard_pages_stay_closed_after_unprotect() {
    let Some(alloc) = guard_granular() else {
        return;
    };
    assert!(supports_committing_guard_pages(&alloc));

    let region = NormalPageMemoryRegion::new(&alloc);
    region.unprotect_for_testing();
    for page in &region {
        let writeable = page.writeable_region();
        assert!(is_readable(writeable.base()));
        assert!(is_readable(writeable.end() - 1));
        assert!(!is_readable(writeable.base() - 1));
        assert!(!is_readable(writeable.end()));
    }

    let large = LargePageMemoryRegion::new(&alloc, 1024);
    large.unprotect_for_testing();
    let writeable = large.page_memory().writeable_region();
    assert!(is_readable(writeable.base()));
    assert!(!is_readable(writeable.base() - 1));
    assert!(!is_readable(writeable.end()));
}

#[test]
fn coarse_commit_granularity_opens_whole_pages() {
    let host = SystemPageAllocator::new().commit_page_size();
    let alloc = tracking().with_commit_page_size(host.max(2 * GUARD_PAGE_SIZE));
    assert!(!supports_committing_guard_pages(&alloc));

    let region = NormalPageMemoryRegion::new(&alloc);
    region.unprotect_for_testing();
    for page in &region {
        let overall = page.overall_region();
        assert_eq!(alloc.permission_at(overall.base()), Some(Permission::ReadWrite));
        assert_eq!(alloc.permission_at(overall.end() - 1), Some(Permission::ReadWrite));
        assert!(is_readable(overall.base()));
        assert!(is_readable(page.writeable_region().base() - 1));
    }
}

#[test]
fn memory_is_gone_after_drop() {
    let alloc = tracking();
    let region = NormalPageMemoryRegion::new(&alloc);
    region.unprotect_for_testing();
    let reserved = region.reserved_region();
    let first = region.page_memory(0).writeable_region().base();
    assert!(is_readable(first));

    drop(region);
    assert!(!alloc.is_reserved(reserved.base()));
    assert!(!alloc.is_reserved(reserved.end() - 1));
    assert_eq!(alloc.permission_at(first), None);
    assert_eq!(alloc.live_reservations(), 0);
    assert_eq!(alloc.release_calls(), 1);
}

#[test]
fn zero_bytes_round_trip_through_every_normal_page() {
    let Some(alloc) = guard_granular() else {
        return;
    };
    let region = NormalPageMemoryRegion::new(&alloc);
    region.unprotect_for_testing();

    for page in &region {
        let writeable = page.writeable_region();
        let ptr = writeable.base().as_mut_ptr::<u8>();
        // SAFETY: the writeable region was just made read-write and is
        // exclusively owned by `region`.
        let bytes = unsafe { core::slice::from_raw_parts_mut(ptr, writeable.size()) };
        bytes.fill(0);
        assert!(bytes.iter().all(|&b| b == 0));
    }
}

#[test]
fn large_page_is_readable_end_to_end() {
    let Some(alloc) = guard_granular() else {
        return;
    };
    let region = LargePageMemoryRegion::new(&alloc, 1024);
    region.unprotect_for_testing();

    let writeable = region.page_memory().writeable_region();
    assert!(writeable.size() >= 1024);
    // SAFETY: unprotected above; the region outlives both reads.
    let (first, last) = unsafe {
        (
            writeable.base().as_ptr::<u8>().read_volatile(),
            (writeable.end() - 1).as_ptr::<u8>().read_volatile(),
        )
    };
    assert_eq!(first, 0);
    assert_eq!(last, 0);
}
