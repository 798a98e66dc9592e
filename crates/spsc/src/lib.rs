pub mod channel;
pub mod errors;
pub mod futex;
pub mod header;
pub mod notify;
pub mod paths;
pub mod reader;
pub mod region;
pub mod retry;
#[cfg(feature = "semaphores")]
pub mod semaphore;
pub mod writer;

pub use channel::Channel;
pub use errors::{Result, Side, SpscError};
pub use header::{HEADER_SIZE, MAX_CAPACITY};
pub use notify::{FutexNotifier, HookNotifier, Notifier};
pub use reader::{ReadData, ReadOptions, ReadResult, Reader};
pub use region::{Region, region_size};
pub use retry::RetryConfig;
#[cfg(feature = "semaphores")]
pub use semaphore::{Semaphore, SemaphoreError, SemaphoreNotifier};
pub use writer::{WriteOptions, Writer};

/// Allocate a fresh anonymous region for `capacity` payload bytes.
pub fn allocate(capacity: usize) -> Result<std::sync::Arc<Region>> {
    Ok(std::sync::Arc::new(Region::allocate(capacity)?))
}

/// Reinitialize `region` as a brand-new, empty pipe.
///
/// Call only after both ends have closed and while neither is in use.
pub fn reset(region: &Region) {
    region.reset();
}
