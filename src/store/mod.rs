//! Durable storage for marginalia.
//!
//! - [`CacheStore`]: process-wide memoization of remote generation results
//!   (redb), shared by every chapter and worker.

pub mod cache;

pub use cache::{CacheStats, CacheStore};
