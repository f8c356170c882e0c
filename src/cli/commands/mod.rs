//! Command-specific modules.

pub mod enqueue;
pub mod requeue;
pub mod run;
pub mod status;
