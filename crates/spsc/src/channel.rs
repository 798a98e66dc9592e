use crate::errors::Result;
use crate::region::{Region, capacity_for_len};
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

/// Shared view of a pipe region used by both endpoints.
///
/// Holds no state of its own beyond the bound region. Positions are byte
/// counters modulo `2 * capacity`; they are only reduced modulo `capacity`
/// when indexing the payload.
#[derive(Clone)]
pub struct Channel {
    region: Arc<Region>,
    capacity: usize,
}

impl Channel {
    pub fn new(region: Arc<Region>) -> Result<Self> {
        let capacity = capacity_for_len(region.len())?;
        Ok(Self { region, capacity })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }

    #[inline]
    pub fn load_reader_pos(&self) -> usize {
        self.normalize(self.region.header().reader_pos.load(Ordering::Acquire))
    }

    #[inline]
    pub fn load_writer_pos(&self) -> usize {
        self.normalize(self.region.header().writer_pos.load(Ordering::Acquire))
    }

    /// Free space as seen by the writer.
    ///
    /// Equal positions mean empty. Otherwise positions that are congruent
    /// modulo `capacity` mean full, which this yields as zero.
    #[inline]
    pub fn available_to_writer(&self, rpos: usize, wpos: usize) -> usize {
        if rpos == wpos {
            self.capacity
        } else {
            (rpos + self.capacity - wpos % self.capacity) % self.capacity
        }
    }

    #[inline]
    pub fn available_to_reader(&self, rpos: usize, wpos: usize) -> usize {
        self.capacity - self.available_to_writer(rpos, wpos)
    }

    pub fn is_reader_closed(&self) -> bool {
        self.region.header().reader_closed.load(Ordering::Acquire) != 0
    }

    pub fn is_writer_closed(&self) -> bool {
        self.region.header().writer_closed.load(Ordering::Acquire) != 0
    }

    /// Set the reader-closed flag. Returns false if it was already set.
    pub(crate) fn mark_reader_closed(&self) -> bool {
        self.region
            .header()
            .reader_closed
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Set the writer-closed flag. Returns false if it was already set.
    pub(crate) fn mark_writer_closed(&self) -> bool {
        self.region
            .header()
            .writer_closed
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn store_reader_pos(&self, pos: usize) {
        debug_assert!(pos < self.span());
        self.region
            .header()
            .reader_pos
            .store(pos as i32, Ordering::Release);
    }

    pub(crate) fn store_writer_pos(&self, pos: usize) {
        debug_assert!(pos < self.span());
        self.region
            .header()
            .writer_pos
            .store(pos as i32, Ordering::Release);
    }

    pub(crate) fn reader_pos_cell(&self) -> &AtomicI32 {
        &self.region.header().reader_pos
    }

    pub(crate) fn writer_pos_cell(&self) -> &AtomicI32 {
        &self.region.header().writer_pos
    }

    /// Advance a position by `n` bytes, wrapping at `2 * capacity`.
    #[inline]
    pub(crate) fn advance(&self, pos: usize, n: usize) -> usize {
        (pos + n) % self.span()
    }

    /// Copy `src` into the payload starting at `offset`.
    ///
    /// # Safety
    ///
    /// The destination range must be space the reader has already vacated,
    /// and only the single writer may call this.
    pub(crate) unsafe fn copy_in(&self, offset: usize, src: &[u8]) {
        assert!(offset + src.len() <= self.capacity, "copy_in out of bounds");
        unsafe {
            ptr::copy_nonoverlapping(
                src.as_ptr(),
                self.region.payload_ptr().add(offset),
                src.len(),
            );
        }
    }

    /// Copy payload bytes starting at `offset` into `dst`.
    ///
    /// # Safety
    ///
    /// The source range must already be published by the writer, and only
    /// the single reader may call this.
    pub(crate) unsafe fn copy_out(&self, offset: usize, dst: &mut [u8]) {
        assert!(offset + dst.len() <= self.capacity, "copy_out out of bounds");
        unsafe {
            ptr::copy_nonoverlapping(
                self.region.payload_ptr().add(offset),
                dst.as_mut_ptr(),
                dst.len(),
            );
        }
    }

    #[inline]
    fn span(&self) -> usize {
        self.capacity << 1
    }

    #[inline]
    fn normalize(&self, raw: i32) -> usize {
        (raw as u32 as usize) % self.span()
    }
}
