//! Generic caching layer for fetched payloads.
//!
//! This module provides an API-agnostic cache that:
//! - Keeps the last known good payload per query key, with its fetch time
//! - Tracks each key through Idle, Loading, Ready and Error
//! - Leaves TTLs to the caller so one store can serve every resource kind
//! - Registers running fetches so every caller of a store shares them
//! - Tags fetches with store-wide sequence numbers so late completions never
//!   overwrite newer data

mod flight;
mod store;
mod traits;

pub use flight::{Flight, FlightOutcome, Landed, Liveness, Observers, Settlement, SharedOutcome};
pub use store::{CacheEntry, CacheStore, EntryState};
pub use traits::{CacheSource, QueryKey, Resolution};
