//! Data models for the processing pipeline.

mod breaker;
mod item;

pub use breaker::{BreakerRecord, BreakerState, BreakerStatus};
pub use item::{ItemState, NewItem, Priority, QueueItem, QueueStats};
