use crate::channel::Channel;
use crate::errors::{Result, Side, SpscError};
use crate::futex::{self, WaitOutcome};
use crate::notify::{FutexNotifier, Notifier};
use crate::region::Region;
use crate::retry::RetryConfig;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Options for [`Writer::write`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Fail with `WouldBlock` instead of waiting for space.
    pub nonblock: bool,
    /// Write only the first `length` bytes of the input. Defaults to all of it.
    pub length: Option<usize>,
}

impl WriteOptions {
    pub fn nonblocking() -> Self {
        Self {
            nonblock: true,
            ..Self::default()
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }
}

/// Producing end of the pipe.
pub struct Writer {
    channel: Channel,
    notifier: Box<dyn Notifier>,
}

impl Writer {
    /// Bind to `region`, waking readers natively.
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
        self.channel.is_writer_closed()
    }

    /// Append bytes to the pipe.
    ///
    /// Returns the number of bytes written, which is only zero for an empty
    /// request. A non-blocking request that fits in the buffer is
    /// all-or-nothing. Larger non-blocking requests, and blocking requests
    /// cut short by the reader closing, may be partial; the caller retries
    /// with the remainder.
    pub fn write(&mut self, data: &[u8], options: WriteOptions) -> Result<usize> {
        if self.channel.is_writer_closed() {
            return Err(SpscError::Closed);
        }
        if self.channel.is_reader_closed() {
            return Err(SpscError::BrokenPipe);
        }

        let nbytes = match options.length {
            Some(n) if n > data.len() => {
                return Err(SpscError::Argument(format!(
                    "length {} exceeds the {} bytes supplied",
                    n,
                    data.len()
                )));
            }
            Some(n) => n,
            None => data.len(),
        };

        if nbytes == 0 {
            return Ok(0);
        }

        let cap = self.channel.capacity();
        let mut wpos = self.channel.load_writer_pos();

        if options.nonblock
            && nbytes <= cap
            && self
                .channel
                .available_to_writer(self.channel.load_reader_pos(), wpos)
                < nbytes
        {
            return Err(SpscError::WouldBlock);
        }

        let mut nwritten = 0;
        while nwritten < nbytes {
            let rpos = self.channel.load_reader_pos();

            if self.channel.available_to_writer(rpos, wpos) == 0 {
                if self.channel.is_reader_closed() {
                    return if nwritten > 0 {
                        Ok(nwritten)
                    } else {
                        Err(SpscError::BrokenPipe)
                    };
                }
                if options.nonblock {
                    if nwritten > 0 {
                        break;
                    }
                    return Err(SpscError::WouldBlock);
                }

                let _s = common::span_debug!("write_wait");
                futex::park(self.channel.reader_pos_cell(), rpos as i32, None);
                continue;
            }

            let r = rpos % cap;
            let w = wpos % cap;
            let remaining = nbytes - nwritten;

            // Up to the reader if it is ahead in the ring, otherwise up to the
            // end of the ring and then from the start up to the reader.
            let (head, wrapped) = if w < r {
                (remaining.min(r - w), 0)
            } else {
                let head = remaining.min(cap - w);
                (head, r.min(remaining - head))
            };

            let chunk = &data[nwritten..nwritten + head + wrapped];
            unsafe {
                self.channel.copy_in(w, &chunk[..head]);
                if wrapped > 0 {
                    self.channel.copy_in(0, &chunk[head..]);
                }
            }

            nwritten += chunk.len();
            wpos = self.channel.advance(wpos, chunk.len());
            self.channel.store_writer_pos(wpos);
            tracing::trace!(bytes = chunk.len(), wpos, "published writer position");
            self.notifier.notify(self.channel.writer_pos_cell());
        }

        Ok(nwritten)
    }

    /// Blocking write of the whole slice.
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            offset += self.write(&data[offset..], WriteOptions::default())?;
        }
        Ok(())
    }

    /// Non-blocking write, retried with backoff while it would block.
    pub fn write_with_retry(&mut self, data: &[u8], config: &RetryConfig) -> Result<usize> {
        crate::retry::retry_would_block(config, || {
            self.write(data, WriteOptions::nonblocking())
        })
    }

    /// Async version of `write_with_retry` using tokio
    #[cfg(feature = "tokio")]
    pub async fn write_with_retry_async(
        &mut self,
        data: &[u8],
        config: &RetryConfig,
    ) -> Result<usize> {
        crate::retry::retry_would_block_async(config, || {
            self.write(data, WriteOptions::nonblocking())
        })
        .await
    }

    /// Close the writing end. Readers drain what is left and then see EOF.
    pub fn close(&mut self) -> Result<()> {
        if !self.channel.mark_writer_closed() {
            return Err(SpscError::AlreadyClosed(Side::Writer));
        }
        tracing::debug!("writer closed");
        self.notifier.notify(self.channel.writer_pos_cell());
        Ok(())
    }

    /// Free space in the pipe right now.
    pub fn bytes_available(&self) -> usize {
        let wpos = self.channel.load_writer_pos();
        let rpos = self.channel.load_reader_pos();
        self.channel.available_to_writer(rpos, wpos)
    }

    /// Wait until a write can make progress.
    ///
    /// Returns `true` once there is free space or the reader has closed
    /// (the next write then fails with `BrokenPipe`), and `false` if
    /// `timeout` elapses first. `None`, or a timeout too large to form a deadline,
    /// waits indefinitely.
    pub fn poll_writable(&self, timeout: Option<Duration>) -> Result<bool> {
        if self.channel.is_writer_closed() {
            return Err(SpscError::Closed);
        }

        // A deadline past what Instant can represent means no deadline.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            let wpos = self.channel.load_writer_pos();
            let rpos = self.channel.load_reader_pos();
            if self.channel.available_to_writer(rpos, wpos) > 0 || self.channel.is_reader_closed()
            {
                return Ok(true);
            }

            let _s = common::span_debug!("poll_writable_wait");
            if futex::park(self.channel.reader_pos_cell(), rpos as i32, deadline)
                == WaitOutcome::TimedOut
            {
                return Ok(false);
            }
        }
    }
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("capacity", &self.channel.capacity())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if !self.channel.is_writer_closed() {
            tracing::debug!("writer dropped without close()");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{ReadOptions, Reader};

    fn pipe(capacity: usize) -> (Writer, Reader) {
        let region = Arc::new(Region::allocate(capacity).unwrap());
        let writer = Writer::new(Arc::clone(&region)).unwrap();
        let reader = Reader::new(region).unwrap();
        (writer, reader)
    }

    #[test]
    fn test_fills_buffer_completely() {
        let (mut writer, _reader) = pipe(4);
        assert_eq!(writer.write(&[1, 2, 3, 4], WriteOptions::default()).unwrap(), 4);
        assert_eq!(writer.bytes_available(), 0);
        assert!(matches!(
            writer.write(&[5], WriteOptions::nonblocking()),
            Err(SpscError::WouldBlock)
        ));
    }

    #[test]
    fn test_one_byte_short_of_full_accepts_one_more() {
        let (mut writer, _reader) = pipe(4);
        writer.write(&[1, 2, 3], WriteOptions::default()).unwrap();
        assert_eq!(writer.write(&[4], WriteOptions::nonblocking()).unwrap(), 1);
    }

    #[test]
    fn test_small_nonblocking_write_is_all_or_nothing() {
        let (mut writer, reader) = pipe(4);
        writer.write(&[1, 2, 3], WriteOptions::default()).unwrap();

        assert!(matches!(
            writer.write(&[4, 5], WriteOptions::nonblocking()),
            Err(SpscError::WouldBlock)
        ));
        assert_eq!(
            reader.bytes_available(),
            3,
            "a rejected small write must not write anything"
        );
    }

    #[test]
    fn test_large_nonblocking_write_is_partial() {
        let (mut writer, _reader) = pipe(4);
        let written = writer
            .write(&[1, 2, 3, 4, 5, 6], WriteOptions::nonblocking())
            .unwrap();
        assert_eq!(written, 4, "writes larger than capacity fill what fits");
    }

    #[test]
    fn test_length_option_limits_write() {
        let (mut writer, mut reader) = pipe(8);
        let written = writer
            .write(&[9, 8, 7, 6], WriteOptions::default().with_length(2))
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(reader.read_to_vec(8).unwrap(), vec![9, 8]);
    }

    #[test]
    fn test_length_option_longer_than_data_is_rejected() {
        let (mut writer, reader) = pipe(8);
        assert!(matches!(
            writer.write(&[1], WriteOptions::default().with_length(2)),
            Err(SpscError::Argument(_))
        ));
        assert_eq!(reader.bytes_available(), 0);
    }

    #[test]
    fn test_zero_length_write_succeeds() {
        let (mut writer, _reader) = pipe(4);
        assert_eq!(writer.write(&[], WriteOptions::default()).unwrap(), 0);
    }

    #[test]
    fn test_write_after_close_fails_closed() {
        let (mut writer, _reader) = pipe(4);
        writer.close().unwrap();
        assert!(matches!(
            writer.write(&[42], WriteOptions::default()),
            Err(SpscError::Closed)
        ));
    }

    #[test]
    fn test_double_close_is_rejected() {
        let (mut writer, _reader) = pipe(4);
        writer.close().unwrap();
        assert!(matches!(
            writer.close(),
            Err(SpscError::AlreadyClosed(Side::Writer))
        ));
    }

    #[test]
    fn test_broken_pipe_after_reader_close() {
        let (mut writer, mut reader) = pipe(4);
        writer.write(&[0], WriteOptions::default()).unwrap();
        reader.close().unwrap();
        assert!(matches!(
            writer.write(&[1], WriteOptions::default()),
            Err(SpscError::BrokenPipe)
        ));
    }

    #[test]
    fn test_broken_pipe_checked_before_zero_length() {
        let (mut writer, mut reader) = pipe(4);
        reader.close().unwrap();
        assert!(matches!(
            writer.write(&[], WriteOptions::default()),
            Err(SpscError::BrokenPipe)
        ));
    }

    #[test]
    fn test_write_wraps_around_ring() {
        let (mut writer, mut reader) = pipe(4);
        writer.write(&[1, 2, 3], WriteOptions::default()).unwrap();
        assert_eq!(reader.read_to_vec(3).unwrap(), vec![1, 2, 3]);

        // Starts at offset 3, wraps after one byte.
        assert_eq!(
            writer.write(&[4, 5, 6, 7], WriteOptions::nonblocking()).unwrap(),
            4
        );
        assert_eq!(reader.read_to_vec(4).unwrap(), vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_blocked_writer_sees_broken_pipe_on_reader_close() {
        let (mut writer, mut reader) = pipe(2);
        writer.write(&[1, 2], WriteOptions::default()).unwrap();

        let handle = std::thread::spawn(move || writer.write(&[3], WriteOptions::default()));
        std::thread::sleep(Duration::from_millis(30));
        reader.close().unwrap();

        let result = handle.join().expect("writer thread panicked");
        assert!(matches!(result, Err(SpscError::BrokenPipe)));
    }

    #[test]
    fn test_poll_writable_times_out_when_full() {
        let (mut writer, _reader) = pipe(2);
        writer.write(&[1, 2], WriteOptions::default()).unwrap();
        assert!(!writer.poll_writable(Some(Duration::from_millis(20))).unwrap());
        assert!(!writer.poll_writable(Some(Duration::ZERO)).unwrap());
    }

    #[test]
    fn test_poll_writable_ready_with_space_or_reader_gone() {
        let (mut writer, mut reader) = pipe(2);
        assert!(writer.poll_writable(Some(Duration::ZERO)).unwrap());

        writer.write(&[1, 2], WriteOptions::default()).unwrap();
        reader.close().unwrap();
        assert!(writer.poll_writable(None).unwrap());
    }

    #[test]
    fn test_poll_writable_accepts_unbounded_timeout() {
        let (writer, _reader) = pipe(2);
        assert!(
            writer.poll_writable(Some(Duration::MAX)).unwrap(),
            "free space should be reported without computing a deadline overflow"
        );
    }

    #[test]
    fn test_poll_writable_wakes_on_read() {
        let (mut writer, mut reader) = pipe(2);
        writer.write(&[1, 2], WriteOptions::default()).unwrap();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            reader.read(1, ReadOptions::default()).unwrap().bytes_read
        });

        assert!(writer.poll_writable(Some(Duration::from_secs(5))).unwrap());
        assert_eq!(handle.join().unwrap(), 1);
    }

    #[test]
    fn test_poll_writable_on_closed_writer_fails() {
        let (mut writer, _reader) = pipe(2);
        writer.close().unwrap();
        assert!(matches!(
            writer.poll_writable(Some(Duration::ZERO)),
            Err(SpscError::Closed)
        ));
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn test_write_with_retry_async_waits_for_space() {
        let (mut writer, mut reader) = pipe(2);
        writer.write(&[1, 2], WriteOptions::default()).unwrap();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            let got = reader.read(2, ReadOptions::default()).unwrap().into_vec();
            (reader, got)
        });

        let config = RetryConfig {
            max_attempts: 200,
            base_delay: Duration::from_micros(200),
            max_delay: Duration::from_millis(1),
        };
        let written = writer
            .write_with_retry_async(&[3, 4], &config)
            .await
            .unwrap();
        assert_eq!(written, 2);

        let (mut reader, got) = handle.join().unwrap();
        assert_eq!(got, vec![1, 2]);
        assert_eq!(reader.read_to_vec(2).unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_write_with_retry_gives_up_on_full_pipe() {
        let (mut writer, _reader) = pipe(2);
        writer.write(&[1, 2], WriteOptions::default()).unwrap();
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_micros(10),
            max_delay: Duration::from_micros(50),
        };
        assert!(matches!(
            writer.write_with_retry(&[3], &config),
            Err(SpscError::RetriesExhausted { attempts: 3 })
        ));
    }
}
