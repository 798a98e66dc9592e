//! Default locations for file-backed pipe regions and their semaphores.

/// Directory for file-backed regions (tmpfs on Linux).
pub const SHM_DIR: &str = "/dev/shm";

/// Default region path used by the demo producer/consumer processes.
pub const DEFAULT_REGION_PATH: &str = "/dev/shm/spsc_pipe";

/// Semaphore posted by a hook-driven writer to wake its reader.
pub const SEMAPHORE_WRITER_NOTIFY: &str = "/spsc_writer_notify";

/// Default payload capacity of a pipe region (64KB, a typical pipe buffer).
pub const DEFAULT_CAPACITY: usize = 64 * 1024;
