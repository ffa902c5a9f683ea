//! A composite prober that delegates to multiple [`Prober`] implementations.

use std::path::Path;

use crate::prober::{ensure_exists, Prober};
use crate::types::MediaDescriptor;

/// Tries each registered [`Prober`] in order and returns the first successful result.
///
/// This allows layering an ffprobe-backed prober over the native one (or the
/// reverse) without callers caring which backend answered.
pub struct CompositeProber {
    probers: Vec<Box<dyn Prober>>,
}

impl CompositeProber {
    /// Create a new `CompositeProber` from an ordered list of probers.
    pub fn new(probers: Vec<Box<dyn Prober>>) -> Self {
        Self { probers }
    }
}

impl Prober for CompositeProber {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn supports(&self, path: &Path) -> bool {
        self.probers.iter().any(|p| p.supports(path))
    }

    fn probe(&self, path: &Path) -> cf_core::Result<MediaDescriptor> {
        ensure_exists(path)?;

        let mut last_err = None;

        for prober in &self.probers {
            if !prober.supports(path) {
                continue;
            }

            match prober.probe(path) {
                Ok(descriptor) => return Ok(descriptor),
                Err(e) => {
                    tracing::debug!(
                        prober = prober.name(),
                        error = %e,
                        "prober failed, trying next"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            cf_core::Error::unreadable(path, "no prober supports this file")
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeProber;
    use cf_core::ErrorKind;

    struct Fixed(f64);

    impl Prober for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn supports(&self, _path: &Path) -> bool {
            true
        }
        fn probe(&self, path: &Path) -> cf_core::Result<MediaDescriptor> {
            Ok(MediaDescriptor::new(path, self.0))
        }
    }

    struct Broken;

    impl Prober for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn supports(&self, _path: &Path) -> bool {
            true
        }
        fn probe(&self, path: &Path) -> cf_core::Result<MediaDescriptor> {
            Err(cf_core::Error::unreadable(path, "garbage"))
        }
    }

    #[test]
    fn composite_supports_delegates() {
        let composite = CompositeProber::new(vec![Box::new(NativeProber::new())]);
        assert!(composite.supports(Path::new("movie.mkv")));
        assert!(composite.supports(Path::new("movie.mp4")));
        assert!(!composite.supports(Path::new("movie.avi")));
    }

    #[test]
    fn missing_path_is_not_found() {
        let composite = CompositeProber::new(vec![Box::new(Fixed(1.0))]);
        let err = composite.probe(Path::new("/nonexistent/clip.mp4")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn falls_through_to_next_prober() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let composite = CompositeProber::new(vec![Box::new(Broken), Box::new(Fixed(7.0))]);
        let d = composite.probe(file.path()).unwrap();
        assert_eq!(d.duration_seconds, 7.0);
    }

    #[test]
    fn no_probers_is_unreadable() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let composite = CompositeProber::new(vec![]);
        let err = composite.probe(file.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnreadableMedia);
    }
}
