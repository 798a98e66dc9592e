use crate::errors::{Result, SpscError};
use crate::futex;
use crate::header::{HEADER_SIZE, Header, MAX_CAPACITY};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::ptr::NonNull;

/// One contiguous shared mapping: a [`Header`] followed by `capacity`
/// payload bytes.
///
/// Endpoints share a region through `Arc<Region>`. The payload is never
/// handed out as a slice because both ends touch disjoint parts of it at
/// the same time; all access goes through [`crate::Channel`].
pub struct Region {
    _mmap: MmapMut,
    base: NonNull<u8>,
    len: usize,
}

// The mapping is only reached through atomics and the disjoint-range copies
// in `Channel`.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Allocate an anonymous, zero-filled region for `capacity` payload bytes.
    pub fn allocate(capacity: usize) -> Result<Self> {
        let size = region_size(capacity)?;
        let mmap = MmapOptions::new().len(size).map_anon()?;
        tracing::debug!(capacity, size, "allocated anonymous pipe region");
        Self::from_mmap(mmap)
    }

    /// Create or open a file-backed region and reset its header.
    ///
    /// The file is created if it doesn't exist and resized to exactly
    /// `HEADER_SIZE + capacity` bytes. Both endpoints start from a fresh,
    /// empty pipe. Use `open()` instead to attach to a live pipe.
    pub fn create(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let size = region_size(capacity)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(&path)?;

        if file.metadata()?.len() != size as u64 {
            file.set_len(size as u64)?;
        }

        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        let region = Self::from_mmap(mmap)?;
        region.header().reset();

        tracing::debug!(
            path = %path.as_ref().display(),
            capacity,
            "created file-backed pipe region"
        );
        Ok(region)
    }

    /// Map an existing file-backed region without touching its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        let region = Self::from_mmap(mmap)?;

        tracing::debug!(
            path = %path.as_ref().display(),
            capacity = region.capacity(),
            "opened file-backed pipe region"
        );
        Ok(region)
    }

    fn from_mmap(mut mmap: MmapMut) -> Result<Self> {
        let len = mmap.len();
        capacity_for_len(len)?;
        let base = NonNull::new(mmap.as_mut_ptr()).ok_or(SpscError::Unspecified)?;
        Ok(Self {
            _mmap: mmap,
            base,
            len,
        })
    }

    /// Zero both positions and both closed flags so the region can back a
    /// brand-new pipe.
    ///
    /// Only legal once both ends have closed and while no read, write or
    /// poll is in flight. Any thread still parked on a position cell is
    /// woken so it re-checks the fresh state.
    pub fn reset(&self) {
        let header = self.header();
        header.reset();
        futex::wake_all(&header.reader_pos);
        futex::wake_all(&header.writer_pos);
        tracing::debug!(capacity = self.capacity(), "pipe region reset");
    }

    /// Total mapped size, header included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.len - HEADER_SIZE
    }

    pub(crate) fn header(&self) -> &Header {
        // Mappings are page aligned, which satisfies Header's alignment.
        unsafe { &*(self.base.as_ptr() as *const Header) }
    }

    pub(crate) fn payload_ptr(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(HEADER_SIZE) }
    }
}

/// Bytes needed for a region carrying `capacity` payload bytes.
pub fn region_size(capacity: usize) -> Result<usize> {
    if capacity == 0 {
        return Err(SpscError::Size {
            size: HEADER_SIZE,
            min: HEADER_SIZE + 1,
        });
    }
    if capacity > MAX_CAPACITY {
        return Err(SpscError::CapacityTooLarge {
            capacity,
            max: MAX_CAPACITY,
        });
    }
    Ok(HEADER_SIZE + capacity)
}

/// Payload capacity of a region of `len` bytes, validating its size.
pub(crate) fn capacity_for_len(len: usize) -> Result<usize> {
    if len < HEADER_SIZE + 1 {
        return Err(SpscError::Size {
            size: len,
            min: HEADER_SIZE + 1,
        });
    }
    let capacity = len - HEADER_SIZE;
    if capacity > MAX_CAPACITY {
        return Err(SpscError::CapacityTooLarge {
            capacity,
            max: MAX_CAPACITY,
        });
    }
    Ok(capacity)
}
