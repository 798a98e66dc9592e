use crate::errors::SpscError;
use crate::notify::Notifier;
use nix::libc;
use std::ffi::CString;
use std::os::raw::c_int;
use std::sync::atomic::AtomicI32;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SemaphoreError {
    #[error("Semaphore call failed: {0}")]
    Os(#[from] nix::errno::Errno),
    #[error("Invalid semaphore name")]
    InvalidName,
    #[error("Semaphore operation timed out")]
    Timeout,
}

impl From<SemaphoreError> for SpscError {
    fn from(e: SemaphoreError) -> Self {
        SpscError::Semaphore(e.to_string())
    }
}

/// Named POSIX semaphore, usable across processes.
pub struct Semaphore {
    sem: *mut libc::sem_t,
}

impl Semaphore {
    pub fn new(name: &str, initial_value: u32) -> Result<Self, SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;

        let sem = unsafe { libc::sem_open(c_name.as_ptr(), libc::O_CREAT, 0o644, initial_value) };

        if sem == libc::SEM_FAILED {
            return Err(SemaphoreError::Os(nix::errno::Errno::last()));
        }

        Ok(Self { sem })
    }

    pub fn open(name: &str) -> Result<Self, SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;

        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };

        if sem == libc::SEM_FAILED {
            return Err(SemaphoreError::Os(nix::errno::Errno::last()));
        }

        Ok(Self { sem })
    }

    pub fn wait(&self) -> Result<(), SemaphoreError> {
        loop {
            let ret = unsafe { libc::sem_wait(self.sem) };
            if ret == 0 {
                return Ok(());
            }
            let errno = nix::errno::Errno::last();
            if errno != nix::errno::Errno::EINTR {
                return Err(SemaphoreError::Os(errno));
            }
        }
    }

    /// Wait at most `timeout`. Returns `Timeout` if nothing was posted.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), SemaphoreError> {
        // sem_timedwait takes an absolute CLOCK_REALTIME deadline.
        let deadline = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            + timeout;
        let ts = libc::timespec {
            tv_sec: deadline.as_secs() as libc::time_t,
            tv_nsec: deadline.subsec_nanos() as libc::c_long,
        };

        loop {
            let ret = unsafe { libc::sem_timedwait(self.sem, &ts) };
            if ret == 0 {
                return Ok(());
            }
            match nix::errno::Errno::last() {
                nix::errno::Errno::EINTR => continue,
                nix::errno::Errno::ETIMEDOUT => return Err(SemaphoreError::Timeout),
                errno => return Err(SemaphoreError::Os(errno)),
            }
        }
    }

    pub fn post(&self) -> Result<(), SemaphoreError> {
        let ret = unsafe { libc::sem_post(self.sem) };
        if ret != 0 {
            return Err(SemaphoreError::Os(nix::errno::Errno::last()));
        }
        Ok(())
    }

    pub fn value(&self) -> Result<i32, SemaphoreError> {
        let mut val: c_int = 0;
        let ret = unsafe { libc::sem_getvalue(self.sem, &mut val) };
        if ret != 0 {
            return Err(SemaphoreError::Os(nix::errno::Errno::last()));
        }
        Ok(val)
    }

    pub fn unlink(name: &str) -> Result<(), SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;
        let ret = unsafe { libc::sem_unlink(c_name.as_ptr()) };
        if ret != 0 {
            return Err(SemaphoreError::Os(nix::errno::Errno::last()));
        }
        Ok(())
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

/// Notifier hook that posts a named semaphore after every publish.
///
/// The peer sleeps on the same semaphore and retries its non-blocking
/// operation each time it is posted.
pub struct SemaphoreNotifier {
    sem: Semaphore,
}

impl SemaphoreNotifier {
    pub fn new(sem: Semaphore) -> Self {
        Self { sem }
    }

    /// Open (creating if needed) the semaphore called `name`.
    pub fn open(name: &str) -> Result<Self, SemaphoreError> {
        Ok(Self::new(Semaphore::new(name, 0)?))
    }

    pub fn semaphore(&self) -> &Semaphore {
        &self.sem
    }
}

impl Notifier for SemaphoreNotifier {
    fn notify(&self, _cell: &AtomicI32) {
        if let Err(e) = self.sem.post() {
            tracing::warn!(error = %e, "failed to post pipe semaphore");
        }
    }
}
