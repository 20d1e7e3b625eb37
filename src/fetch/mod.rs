//! Network side of the data layer.
//!
//! This module turns one logical GET into a classified outcome:
//! - `executor` races each attempt against a timeout and retries transient
//!   failures with a bounded backoff loop
//! - `envelope` parses the `{ success, data, error, timestamp }` wrapper
//! - `error` holds the typed taxonomy every failure is reported as

pub mod envelope;
mod error;
pub mod executor;

pub use envelope::Envelope;
pub use error::{FetchError, TransportError};
pub use executor::{AttemptOutcome, Backoff, FetchAttempt, FetchExecutor, RawResponse, RetryPolicy};
