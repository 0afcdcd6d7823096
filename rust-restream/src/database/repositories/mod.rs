//! Repository layer for database access.
//!
//! Implements the Repository Pattern so the orchestrator only talks to the
//! record store through a trait.

pub mod stream_job;

pub use stream_job::*;
