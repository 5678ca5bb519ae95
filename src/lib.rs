//! # delegate-queue
//!
//! Manager-side maintenance of the delegate task queue.
//!
//! Expires tasks that sat too long, pins force-execution tasks to a capable
//! delegate before giving up on them, and rebroadcasts unclaimed tasks.
//! Safe to run on many replicas against one Postgres store; see [`engine`].

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod services;
pub mod store;
pub mod telemetry;
