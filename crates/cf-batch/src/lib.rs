//! # cf-batch
//!
//! Runs many pipelines on a bounded worker pool.
//!
//! - **[`Scheduler`]** -- priority queue (FIFO within a priority) in front of
//!   a semaphore of `workers` permits. `submit` never blocks.
//! - **[`JobHandle`]** -- per-job completion signal with `wait` and `cancel`.
//! - **[`PipelineRunner`]** -- the seam jobs run through; implemented by
//!   [`cf_pipeline::Engine`].
//!
//! Lifecycle events go out on the [`cf_core::events::EventBus`].

pub mod job;
pub mod scheduler;

pub use job::{Job, JobHandle, JobStatus};
pub use scheduler::{PipelineRunner, Scheduler};
