//! Persistent anime cache.
//!
//! This module provides the durable side of the stale-while-revalidate flow:
//! - A single SQLite table of anime records keyed by id
//! - Whole-record upserts, table clears and age-based pruning
//! - Live streams that re-read the table after every committed write
//! - Freshness policies that decide when a background refresh is due

mod observe;
mod policy;
mod storage;
mod traits;

pub use observe::{observe_all, observe_by_id};
pub use policy::EmptyCachePolicy;
pub use storage::SqliteStorage;
pub use traits::{AnimeStore, FreshnessPolicy};
