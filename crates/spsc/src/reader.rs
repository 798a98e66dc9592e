use crate::channel::Channel;
use crate::errors::{Result, Side, SpscError};
use crate::futex::{self, WaitOutcome};
use crate::notify::{FutexNotifier, Notifier};
use crate::region::Region;
use crate::retry::RetryConfig;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Options for [`Reader::read`].
#[derive(Debug, Default)]
pub struct ReadOptions<'a> {
    /// Fail with `WouldBlock` instead of waiting for data.
    pub nonblock: bool,
    /// Copy into this buffer instead of allocating. Must hold at least the
    /// requested number of bytes.
    pub into: Option<&'a mut [u8]>,
}

impl<'a> ReadOptions<'a> {
    pub fn nonblocking() -> Self {
        Self {
            nonblock: true,
            into: None,
        }
    }

    pub fn into_buf(mut self, buf: &'a mut [u8]) -> Self {
        self.into = Some(buf);
        self
    }
}

/// Where the bytes of a read ended up.
#[derive(Debug)]
pub enum ReadData<'a> {
    /// Freshly allocated, exactly `bytes_read` long.
    Owned(Vec<u8>),
    /// The caller's buffer, filled from the start.
    Borrowed(&'a mut [u8]),
}

#[derive(Debug)]
pub struct ReadResult<'a> {
    pub bytes_read: usize,
    pub data: ReadData<'a>,
}

impl<'a> ReadResult<'a> {
    fn empty(into: Option<&'a mut [u8]>) -> Self {
        let data = match into {
            Some(buf) => ReadData::Borrowed(buf),
            None => ReadData::Owned(Vec::new()),
        };
        Self {
            bytes_read: 0,
            data,
        }
    }

    /// The bytes this read produced.
    pub fn bytes(&self) -> &[u8] {
        match &self.data {
            ReadData::Owned(v) => &v[..self.bytes_read],
            ReadData::Borrowed(buf) => &buf[..self.bytes_read],
        }
    }

    pub fn is_eof(&self) -> bool {
        self.bytes_read == 0
    }

    pub fn into_vec(self) -> Vec<u8> {
        match self.data {
            ReadData::Owned(v) => v,
            ReadData::Borrowed(buf) => buf[..self.bytes_read].to_vec(),
        }
    }
}

/// Consuming end of the pipe.
pub struct Reader {
    channel: Channel,
    notifier: Box<dyn Notifier>,
}

impl Reader {
    /// Bind to `region`, waking writers natively.
    pub fn new(region: Arc<Region>) -> Result<Self> {
        Self::with_notifier(region, FutexNotifier)
    }

    /// Bind to `region`, calling `notifier` after every publish and on close.
    pub fn with_notifier(region: Arc<Region>, notifier: impl Notifier + 'static) -> Result<Self> {
        Ok(Self {
            channel: Channel::new(region)?,
            notifier: Box::new(notifier),
        })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn capacity(&self) -> usize {
        self.channel.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_reader_closed()
    }

    /// Consume up to `max_bytes` bytes.
    ///
    /// A successful read of zero bytes for a non-zero request is EOF: the
    /// writer has closed and everything it wrote has been consumed. One read
    /// never returns more than `capacity` bytes.
    pub fn read<'a>(&mut self, max_bytes: usize, options: ReadOptions<'a>) -> Result<ReadResult<'a>> {
        if self.channel.is_reader_closed() {
            return Err(SpscError::Closed);
        }

        if let Some(buf) = options.into.as_deref() {
            if buf.len() < max_bytes {
                return Err(SpscError::Argument(format!(
                    "the buffer to read into ({}) is smaller than bytes requested ({})",
                    buf.len(),
                    max_bytes
                )));
            }
        }

        if max_bytes == 0 {
            return Ok(ReadResult::empty(options.into));
        }

        let rpos = self.channel.load_reader_pos();
        let mut wpos = self.channel.load_writer_pos();
        while wpos == rpos {
            if self.channel.is_writer_closed() {
                // The writer publishes before it closes, so one more load
                // catches a final write that raced with the check above.
                wpos = self.channel.load_writer_pos();
                if wpos == rpos {
                    return Ok(ReadResult::empty(options.into));
                }
                break;
            }

            if options.nonblock {
                return Err(SpscError::WouldBlock);
            }

            let _s = common::span_debug!("read_wait");
            futex::park(self.channel.writer_pos_cell(), rpos as i32, None);
            wpos = self.channel.load_writer_pos();
        }

        let cap = self.channel.capacity();
        let r = rpos % cap;
        let w = wpos % cap;

        // r == w here means the ring is full.
        let (head, wrapped) = if r < w {
            (max_bytes.min(w - r), 0)
        } else {
            let head = max_bytes.min(cap - r);
            (head, w.min(max_bytes - head))
        };
        let nread = head + wrapped;

        let data = match options.into {
            Some(buf) => {
                self.copy_segments(r, head, &mut buf[..nread]);
                ReadData::Borrowed(buf)
            }
            None => {
                let mut buf = vec![0u8; nread];
                self.copy_segments(r, head, &mut buf);
                ReadData::Owned(buf)
            }
        };

        let new_rpos = self.channel.advance(rpos, nread);
        self.channel.store_reader_pos(new_rpos);
        tracing::trace!(bytes = nread, rpos = new_rpos, "published reader position");
        self.notifier.notify(self.channel.reader_pos_cell());

        Ok(ReadResult {
            bytes_read: nread,
            data,
        })
    }

    fn copy_segments(&self, offset: usize, head: usize, dst: &mut [u8]) {
        let (first, rest) = dst.split_at_mut(head);
        unsafe {
            self.channel.copy_out(offset, first);
            if !rest.is_empty() {
                self.channel.copy_out(0, rest);
            }
        }
    }

    /// Blocking read into a fresh vector. Empty means EOF.
    pub fn read_to_vec(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        Ok(self.read(max_bytes, ReadOptions::default())?.into_vec())
    }

    /// Read up to `buf.len()` bytes into `buf`, returning how many arrived.
    pub fn read_into(&mut self, buf: &mut [u8], nonblock: bool) -> Result<usize> {
        let max_bytes = buf.len();
        let options = ReadOptions {
            nonblock,
            into: Some(buf),
        };
        Ok(self.read(max_bytes, options)?.bytes_read)
    }

    /// Non-blocking read, retried with backoff while it would block.
    pub fn read_with_retry(&mut self, max_bytes: usize, config: &RetryConfig) -> Result<Vec<u8>> {
        crate::retry::retry_would_block(config, || {
            Ok(self.read(max_bytes, ReadOptions::nonblocking())?.into_vec())
        })
    }

    /// Async version of `read_with_retry` using tokio
    #[cfg(feature = "tokio")]
    pub async fn read_with_retry_async(
        &mut self,
        max_bytes: usize,
        config: &RetryConfig,
    ) -> Result<Vec<u8>> {
        crate::retry::retry_would_block_async(config, || {
            Ok(self.read(max_bytes, ReadOptions::nonblocking())?.into_vec())
        })
        .await
    }

    /// Close the reading end. Writers see `BrokenPipe` from then on.
    pub fn close(&mut self) -> Result<()> {
        if !self.channel.mark_reader_closed() {
            return Err(SpscError::AlreadyClosed(Side::Reader));
        }
        tracing::debug!("reader closed");
        self.notifier.notify(self.channel.reader_pos_cell());
        Ok(())
    }

    /// Bytes ready to be read right now.
    pub fn bytes_available(&self) -> usize {
        let rpos = self.channel.load_reader_pos();
        let wpos = self.channel.load_writer_pos();
        self.channel.available_to_reader(rpos, wpos)
    }

    /// Wait until a read can make progress.
    ///
    /// Returns `true` once data is buffered or the writer has closed (the
    /// next read then returns EOF once drained), and `false` if `timeout`
    /// elapses first. `None`, or a timeout too large to form a deadline,
    /// waits indefinitely.
    pub fn poll_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        if self.channel.is_reader_closed() {
            return Err(SpscError::Closed);
        }

        // A deadline past what Instant can represent means no deadline.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let rpos = self.channel.load_reader_pos();
        loop {
            let wpos = self.channel.load_writer_pos();
            if wpos != rpos || self.channel.is_writer_closed() {
                return Ok(true);
            }

            let _s = common::span_debug!("poll_readable_wait");
            if futex::park(self.channel.writer_pos_cell(), rpos as i32, deadline)
                == WaitOutcome::TimedOut
            {
                return Ok(false);
            }
        }
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("capacity", &self.channel.capacity())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if !self.channel.is_reader_closed() {
            tracing::debug!("reader dropped without close()");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{WriteOptions, Writer};

    fn pipe(capacity: usize) -> (Writer, Reader) {
        let region = Arc::new(Region::allocate(capacity).unwrap());
        let writer = Writer::new(Arc::clone(&region)).unwrap();
        let reader = Reader::new(region).unwrap();
        (writer, reader)
    }

    #[test]
    fn test_binds_reader_and_writer_to_one_region() {
        let (writer, reader) = pipe(8);
        assert_eq!(writer.capacity(), 8);
        assert_eq!(reader.capacity(), 8);
        assert!(Arc::ptr_eq(
            writer.channel().region(),
            reader.channel().region()
        ));
    }

    #[test]
    fn test_reads_at_most_the_buffer_size() {
        let (mut writer, mut reader) = pipe(4);
        writer.write(&[1, 2, 3], WriteOptions::default()).unwrap();

        let first = reader.read(2, ReadOptions::default()).unwrap();
        assert_eq!(first.bytes(), &[1, 2]);

        writer.write(&[4, 5], WriteOptions::default()).unwrap();
        let second = reader.read(999, ReadOptions::default()).unwrap();
        assert_eq!(second.bytes_read, 3);
        assert_eq!(second.bytes(), &[3, 4, 5]);
    }

    #[test]
    fn test_read_on_closed_reader_fails() {
        let (_writer, mut reader) = pipe(4);
        reader.close().unwrap();
        assert!(matches!(
            reader.read(1, ReadOptions::default()),
            Err(SpscError::Closed)
        ));
    }

    #[test]
    fn test_closed_takes_precedence_over_bad_arguments() {
        let (_writer, mut reader) = pipe(4);
        reader.close().unwrap();
        let mut small = [0u8; 1];
        let options = ReadOptions::default().into_buf(&mut small);
        assert!(matches!(reader.read(4, options), Err(SpscError::Closed)));
    }

    #[test]
    fn test_double_close_is_rejected() {
        let (_writer, mut reader) = pipe(4);
        reader.close().unwrap();
        assert!(matches!(
            reader.close(),
            Err(SpscError::AlreadyClosed(Side::Reader))
        ));
    }

    #[test]
    fn test_zero_byte_read_returns_immediately() {
        let (_writer, mut reader) = pipe(4);
        let result = reader.read(0, ReadOptions::default()).unwrap();
        assert_eq!(result.bytes_read, 0);
        assert!(result.bytes().is_empty());
    }

    #[test]
    fn test_nonblocking_read_on_empty_pipe_would_block() {
        let (_writer, mut reader) = pipe(4);
        assert!(matches!(
            reader.read(1, ReadOptions::nonblocking()),
            Err(SpscError::WouldBlock)
        ));
    }

    #[test]
    fn test_reads_eof_after_pipe_is_drained() {
        let (mut writer, mut reader) = pipe(4);
        writer.write(&[1, 2, 3, 4], WriteOptions::default()).unwrap();
        writer.close().unwrap();

        let drained = reader.read(5, ReadOptions::default()).unwrap();
        assert_eq!(drained.bytes(), &[1, 2, 3, 4]);

        for _ in 0..3 {
            let eof = reader.read(5, ReadOptions::default()).unwrap();
            assert!(eof.is_eof(), "every read after drain must be EOF");
        }
        let eof = reader.read(5, ReadOptions::nonblocking()).unwrap();
        assert!(eof.is_eof(), "EOF wins over WouldBlock");
    }

    #[test]
    fn test_reads_into_preallocated_buffer() {
        let (mut writer, mut reader) = pipe(8);
        writer
            .write(&[1, 5, 2, 7, 3, 8, 4, 6], WriteOptions::default())
            .unwrap();

        let mut dest = [0u8; 4];
        let rr1 = reader
            .read(3, ReadOptions::default().into_buf(&mut dest))
            .unwrap();
        assert_eq!(rr1.bytes_read, 3);
        assert!(matches!(rr1.data, ReadData::Borrowed(_)));
        assert_eq!(dest, [1, 5, 2, 0]);

        let too_big = reader.read(5, ReadOptions::default().into_buf(&mut dest));
        assert!(matches!(too_big, Err(SpscError::Argument(_))));
        assert_eq!(
            reader.bytes_available(),
            5,
            "a rejected read must not consume anything"
        );

        let rr2 = reader
            .read(2, ReadOptions::default().into_buf(&mut dest))
            .unwrap();
        assert_eq!(rr2.bytes_read, 2);
        assert_eq!(dest, [7, 3, 2, 0]);
    }

    #[test]
    fn test_read_into_reports_count() {
        let (mut writer, mut reader) = pipe(8);
        writer.write(&[10, 20, 30], WriteOptions::default()).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(reader.read_into(&mut buf, true).unwrap(), 3);
        assert_eq!(&buf[..3], &[10, 20, 30]);
    }

    #[test]
    fn test_read_crosses_wrap_boundary() {
        let (mut writer, mut reader) = pipe(4);
        writer.write(&[1, 2, 3], WriteOptions::default()).unwrap();
        assert_eq!(reader.read_to_vec(2).unwrap(), vec![1, 2]);
        writer.write(&[4, 5, 6], WriteOptions::default()).unwrap();

        // Ring holds [5, 6, 3, 4] with the reader at offset 2.
        let mut buf = [0u8; 4];
        assert_eq!(reader.read_into(&mut buf, false).unwrap(), 4);
        assert_eq!(buf, [3, 4, 5, 6]);
    }

    #[test]
    fn test_bytes_available_sums_to_capacity() {
        let (mut writer, mut reader) = pipe(5);
        let mut expected_buffered = 0usize;
        for step in 0..20u8 {
            if step % 3 == 2 {
                let got = reader.read_to_vec(2).unwrap();
                expected_buffered -= got.len();
            } else if writer.bytes_available() > 0 {
                expected_buffered += writer.write(&[step], WriteOptions::default()).unwrap();
            }
            assert_eq!(reader.bytes_available() + writer.bytes_available(), 5);
            assert_eq!(reader.bytes_available(), expected_buffered);
        }
    }

    #[test]
    fn test_blocking_read_wakes_on_write() {
        let (mut writer, mut reader) = pipe(4);
        let handle = std::thread::spawn(move || reader.read_to_vec(4).unwrap());

        std::thread::sleep(Duration::from_millis(20));
        writer.write(&[9, 9], WriteOptions::default()).unwrap();

        assert_eq!(handle.join().unwrap(), vec![9, 9]);
    }

    #[test]
    fn test_blocking_read_wakes_on_writer_close() {
        let (mut writer, mut reader) = pipe(4);
        let handle = std::thread::spawn(move || reader.read_to_vec(4).unwrap());

        std::thread::sleep(Duration::from_millis(20));
        writer.close().unwrap();

        assert!(handle.join().unwrap().is_empty(), "expected EOF");
    }

    #[test]
    fn test_poll_readable() {
        let (mut writer, reader) = pipe(4);
        assert!(!reader.poll_readable(Some(Duration::from_millis(10))).unwrap());

        writer.write(&[1], WriteOptions::default()).unwrap();
        assert!(reader.poll_readable(Some(Duration::ZERO)).unwrap());
    }

    #[test]
    fn test_poll_readable_accepts_unbounded_timeout() {
        let (mut writer, reader) = pipe(4);
        writer.write(&[1], WriteOptions::default()).unwrap();
        assert!(
            reader.poll_readable(Some(Duration::MAX)).unwrap(),
            "buffered data should be reported without computing a deadline overflow"
        );
    }

    #[test]
    fn test_poll_readable_ready_after_writer_close() {
        let (mut writer, reader) = pipe(4);
        writer.close().unwrap();
        assert!(reader.poll_readable(None).unwrap());
    }

    #[test]
    fn test_poll_readable_on_closed_reader_fails() {
        let (_writer, mut reader) = pipe(4);
        reader.close().unwrap();
        assert!(matches!(
            reader.poll_readable(Some(Duration::ZERO)),
            Err(SpscError::Closed)
        ));
    }

    #[test]
    fn test_read_with_retry_picks_up_late_data() {
        let (mut writer, mut reader) = pipe(4);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            writer.write(&[7], WriteOptions::default()).unwrap();
            writer
        });

        let config = RetryConfig {
            max_attempts: 200,
            base_delay: Duration::from_micros(200),
            max_delay: Duration::from_millis(1),
        };
        assert_eq!(reader.read_with_retry(1, &config).unwrap(), vec![7]);
        drop(handle.join().unwrap());
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn test_read_with_retry_async() {
        let (mut writer, mut reader) = pipe(4);
        writer.write(&[3, 1], WriteOptions::default()).unwrap();
        let got = reader
            .read_with_retry_async(4, &RetryConfig::default())
            .await
            .unwrap();
        assert_eq!(got, vec![3, 1]);
    }
}
