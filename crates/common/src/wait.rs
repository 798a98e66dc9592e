use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Poll `connect` until it succeeds or `shutdown` is raised.
///
/// Used by a process that attaches to a resource another process creates,
/// e.g. a consumer waiting for its producer to create the shared region.
/// Returns `None` if shutdown was requested first.
pub fn wait_for_resource<F, T, E>(
    mut connect: F,
    poll_interval: Duration,
    resource_name: &str,
    shutdown: &AtomicBool,
) -> Option<T>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("Stopped waiting for {}", resource_name);
            return None;
        }
        match connect() {
            Ok(resource) => {
                tracing::info!("{} connected", resource_name);
                return Some(resource);
            }
            Err(e) => {
                tracing::debug!("Waiting for {} ({})", resource_name, e);
                std::thread::sleep(poll_interval);
            }
        }
    }
}
