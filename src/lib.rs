//! Fetch and cache layer for a market-data dashboard.
//!
//! - `fetch` runs one logical GET under a timeout and retry policy
//! - `validate` drops malformed records instead of failing a response
//! - `cache` keeps the last known good payload per query
//! - `query` coordinates the three with single-flight fetches
//! - `market` binds it all to the market data API

pub mod cache;
pub mod config;
pub mod fetch;
pub mod logging;
pub mod market;
pub mod query;
pub mod validate;
