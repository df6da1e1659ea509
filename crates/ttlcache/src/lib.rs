//! # ttlcache
//!
//! In-process TTL cache for LingUBible's read-mostly data (reviews,
//! courses, instructors, vote tallies).
//!
//! ## Architecture
//! - **HashMap**: AHash keyed entries behind a single mutex
//! - **Clock**: injected time source, so tests control expiry
//! - **Expiry**: lazy on `get`/`has`, eager on `cleanup`
//! - **CachedService**: cache-aside wrapper used by callers

#![warn(missing_docs)]

mod cache;
mod clock;
mod service;
mod stats;

pub use cache::{TtlCache, DEFAULT_TTL};
pub use clock::{Clock, ManualClock, SystemClock};
pub use service::{course_key, instructor_key, review_key, tally_key, CachedService};
pub use stats::{CacheStats, Lookup, StatsSnapshot};
