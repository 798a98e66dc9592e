use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

/// SAFETY & MEMORY ORDERING:
///
/// This header defines the shared memory layout of one pipe region.
///
/// Writer protocol:
/// 1. Copy payload bytes into space the reader has already vacated
/// 2. Publish `writer_pos` with `Ordering::Release`
///
/// Reader protocol:
/// 1. Load `writer_pos` with `Ordering::Acquire`
/// 2. Copy out the published bytes
/// 3. Publish `reader_pos` with `Ordering::Release`
///
/// Both positions count bytes modulo `2 * capacity`. Equal positions mean
/// the ring is empty; positions that differ by exactly `capacity` mean it
/// is full.
///
/// Layout (byte offsets): `[0..4)` reader position, `[4..8)` writer
/// position, `[8]` reader-closed flag, `[12]` writer-closed flag. The
/// padding bytes are reserved and always zero.
#[repr(C, align(8))]
pub struct Header {
    pub reader_pos: AtomicI32,
    pub writer_pos: AtomicI32,
    pub reader_closed: AtomicU8,
    _reserved0: [u8; 3],
    pub writer_closed: AtomicU8,
    _reserved1: [u8; 3],
}

impl Header {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Zero both positions and both closed flags.
    pub fn reset(&self) {
        self.reader_pos.store(0, Ordering::Release);
        self.writer_pos.store(0, Ordering::Release);
        self.reader_closed.store(0, Ordering::Release);
        self.writer_closed.store(0, Ordering::Release);
    }
}

/// Size of the fixed header in front of the payload.
pub const HEADER_SIZE: usize = Header::SIZE;

/// Largest payload such that `2 * capacity` still fits an `i32` position.
pub const MAX_CAPACITY: usize = (1 << 30) - 1;
