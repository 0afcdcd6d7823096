//! Database models for rust-restream.
//!
//! These models map directly to the database schema.

pub mod stream_job;

pub use stream_job::*;
