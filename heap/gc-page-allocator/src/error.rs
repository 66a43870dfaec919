use crate::{Address, Permission};

/// Failure reported by a [`PageAllocator`](crate::PageAllocator).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageAllocatorError {
    #[error("failed to reserve {length:#x} bytes (errno {errno})")]
    Reserve { length: usize, errno: i32 },
    #[error("failed to release {length:#x} bytes at {address} (errno {errno})")]
    Release {
        address: Address,
        length: usize,
        errno: i32,
    },
    #[error("failed to set {permission} on {length:#x} bytes at {address} (errno {errno})")]
    Protect {
        address: Address,
        length: usize,
        permission: Permission,
        errno: i32,
    },
    #[error("range {address}+{length:#x} is not aligned to {granularity:#x}")]
    Unaligned {
        address: Address,
        length: usize,
        granularity: usize,
    },
    #[error("no reservation of {length:#x} bytes at {address}")]
    UnknownReservation { address: Address, length: usize },
    #[error("address space exhausted: {requested:#x} bytes requested, {available:#x} available")]
    OutOfAddressSpace { requested: usize, available: usize },
}
