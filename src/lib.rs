//! hopper: watched-inbox document processing pipeline.
//!
//! Documents dropped into an inbox directory are fingerprinted, queued
//! durably in SQLite, and processed by a worker pool that calls an external
//! analysis service behind a circuit breaker. A resource monitor advises the
//! pool on how many workers to keep active.

pub mod analysis;
pub mod breaker;
pub mod cli;
pub mod config;
pub mod extract;
pub mod models;
pub mod monitor;
pub mod pipeline;
pub mod repository;
pub mod sink;
pub mod watcher;
