//! Persistence for posts, platform records, queue items and analytics caches
//!
//! The scheduling core depends only on [`SchedulingStore`]; [`SqliteStore`]
//! is the shipped implementation.

pub mod repository;
pub mod sqlite;

pub use repository::{
    AttemptResolution, PostQuery, QueueDepth, SchedulingStore, ScoreRecord, StorageError,
    StorageResult,
};
pub use sqlite::SqliteStore;
