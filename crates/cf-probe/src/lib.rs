//! # cf-probe
//!
//! Media descriptor probing.
//!
//! This crate defines the normalized [`MediaDescriptor`] every other crate
//! validates against, the [`Prober`] trait, a [`CompositeProber`] that layers
//! backends, and a [`NativeProber`] that reads Matroska and MP4 headers
//! without any external tool.
//!
//! ## Quick start
//!
//! ```no_run
//! use cf_probe::{NativeProber, Prober};
//! use std::path::Path;
//!
//! let prober = NativeProber::new();
//! let d = prober.probe(Path::new("clip.mkv")).unwrap();
//! println!("{:.2}s, {}", d.duration_seconds, d.shape());
//! ```

pub mod composite;
pub mod native;
pub mod prober;
pub mod types;

pub use composite::CompositeProber;
pub use native::NativeProber;
pub use prober::{ensure_exists, Prober};
pub use types::{AudioStream, MediaDescriptor, StreamShape, VideoStream};
