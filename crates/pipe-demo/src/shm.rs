//! File-backed regions shared between a `produce` and a `consume` process.

use anyhow::{Context, Result, bail};
use spsc::{Channel, Region};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

/// Create a new region at `path`, replacing a file left by an earlier run.
///
/// The old file is unlinked rather than reused, so a consumer still mapped
/// to it never sees its positions reset underneath it.
pub fn create_region(path: &Path, capacity: usize) -> Result<Arc<Region>> {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "removed stale pipe region"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to remove stale region at {}", path.display()));
        }
    }

    let region = Region::create(path, capacity)
        .with_context(|| format!("Failed to create pipe region at {}", path.display()))?;
    Ok(Arc::new(region))
}

/// Map the region at `path` only if no reader has used it yet.
///
/// A region whose reader has closed or already consumed bytes belongs to an
/// earlier run; the caller keeps polling until the producer replaces it.
pub fn attach_fresh(path: &Path) -> Result<Arc<Region>> {
    let region = Arc::new(Region::open(path)?);
    let channel = Channel::new(Arc::clone(&region))?;
    if channel.is_reader_closed() || channel.load_reader_pos() != 0 {
        bail!("region at {} is left over from an earlier run", path.display());
    }
    Ok(region)
}
