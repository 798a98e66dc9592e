//! Block/wake on a single 32-bit cell of the shared region.
//!
//! Uses the futex syscall on Linux. Other platforms fall back to short
//! sleeps, which callers observe as spurious wakeups.

use std::sync::atomic::AtomicI32;
use std::time::{Duration, Instant};

/// Longest single park on a position cell.
///
/// Closing a side never changes a position cell, so a waiter that parks
/// right after the peer's close-and-wake would otherwise sleep forever.
pub const CLOSE_RECHECK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken by a notify, a signal, or spuriously. Re-check the condition.
    Woken,
    /// The cell no longer held the expected value when the wait started.
    Changed,
    /// The timeout elapsed.
    TimedOut,
}

#[cfg(target_os = "linux")]
pub fn wait(cell: &AtomicI32, expected: i32, timeout: Option<Duration>) -> WaitOutcome {
    use nix::errno::Errno;

    let ts = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    });
    let ts_ptr = ts
        .as_ref()
        .map_or(std::ptr::null(), |t| t as *const libc::timespec);

    // Not FUTEX_PRIVATE_FLAG: the region may be mapped by another process.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_futex,
            cell.as_ptr(),
            libc::FUTEX_WAIT,
            expected,
            ts_ptr,
            std::ptr::null::<u32>(),
            0u32,
        )
    };

    if ret == 0 {
        return WaitOutcome::Woken;
    }

    match Errno::last() {
        Errno::EAGAIN => WaitOutcome::Changed,
        Errno::ETIMEDOUT => WaitOutcome::TimedOut,
        _ => WaitOutcome::Woken,
    }
}

#[cfg(target_os = "linux")]
pub fn wake_all(cell: &AtomicI32) {
    unsafe {
        libc::syscall(libc::SYS_futex, cell.as_ptr(), libc::FUTEX_WAKE, i32::MAX);
    }
}

#[cfg(not(target_os = "linux"))]
pub fn wait(cell: &AtomicI32, expected: i32, timeout: Option<Duration>) -> WaitOutcome {
    use std::sync::atomic::Ordering;

    const POLL_INTERVAL: Duration = Duration::from_micros(500);

    if cell.load(Ordering::Acquire) != expected {
        return WaitOutcome::Changed;
    }
    let nap = timeout.map_or(POLL_INTERVAL, |t| t.min(POLL_INTERVAL));
    std::thread::sleep(nap);
    match timeout {
        Some(t) if t <= POLL_INTERVAL => WaitOutcome::TimedOut,
        _ => WaitOutcome::Woken,
    }
}

#[cfg(not(target_os = "linux"))]
pub fn wake_all(_cell: &AtomicI32) {}

/// Park on `cell` while it holds `expected`, for at most one re-check slice.
///
/// Returns `TimedOut` only once `deadline` has passed; expiry of the slice
/// itself is reported as `Woken`.
pub fn park(cell: &AtomicI32, expected: i32, deadline: Option<Instant>) -> WaitOutcome {
    let slice = match deadline {
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            (deadline - now).min(CLOSE_RECHECK_INTERVAL)
        }
        None => CLOSE_RECHECK_INTERVAL,
    };

    match wait(cell, expected, Some(slice)) {
        WaitOutcome::TimedOut => match deadline {
            Some(deadline) if Instant::now() >= deadline => WaitOutcome::TimedOut,
            _ => WaitOutcome::Woken,
        },
        other => other,
    }
}
