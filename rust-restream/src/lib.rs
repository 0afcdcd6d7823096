//! rust-restream library crate.
//!
//! Runs unattended looping live broadcasts: each job pushes a video file to an
//! RTMP endpoint through ffmpeg for a fixed duration, while its record in the
//! SQLite store tracks status and remaining time.

pub mod api;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod media;
pub mod metrics;
pub mod orchestrator;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
