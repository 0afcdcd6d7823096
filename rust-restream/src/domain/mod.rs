//! Domain layer.
//!
//! The `StreamJob` snapshot handed to callers and the validated request that
//! creates one.

pub mod stream_job;

pub use stream_job::{JobState, NewStreamJob, StartJobRequest, StreamJob};
