//! The [`Prober`] trait defining the interface for media file probing.

use std::path::Path;

use crate::types::MediaDescriptor;

/// A media file prober capable of extracting a [`MediaDescriptor`].
///
/// Probing is synchronous and read-only. Implementations must be safe to
/// share across threads (`Send + Sync`).
pub trait Prober: Send + Sync {
    /// Human-readable name identifying this prober implementation.
    fn name(&self) -> &'static str;

    /// Probe a media file at the given path.
    ///
    /// Fails with `NotFound` when the path does not exist and with
    /// `UnreadableMedia` when the container cannot be parsed.
    fn probe(&self, path: &Path) -> cf_core::Result<MediaDescriptor>;

    /// Check whether this prober supports the given file path.
    ///
    /// A return value of `true` does not guarantee that [`Prober::probe`]
    /// will succeed.
    fn supports(&self, path: &Path) -> bool;
}

/// Fail with `NotFound` if `path` does not exist.
pub fn ensure_exists(path: &Path) -> cf_core::Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(cf_core::Error::not_found(path))
    }
}
