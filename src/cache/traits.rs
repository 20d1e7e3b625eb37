//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::store::{CacheEntry, EntryState};
use crate::fetch::FetchError;

/// A logical query that can be cached.
///
/// Two queries with the same parameters must produce the same `cache_hash`.
pub trait QueryKey {
  /// Stable identifier used as the store key
  fn cache_hash(&self) -> String;

  /// Human readable form for logs
  fn description(&self) -> String;
}

impl QueryKey for str {
  fn cache_hash(&self) -> String {
    self.to_string()
  }

  fn description(&self) -> String {
    self.to_string()
  }
}

impl QueryKey for String {
  fn cache_hash(&self) -> String {
    self.clone()
  }

  fn description(&self) -> String {
    self.clone()
  }
}

/// Indicates where resolved data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache past its TTL, served while a refetch runs
  CacheStale,
  /// The fetch failed and the last good payload is served instead
  Fallback,
}

/// Outcome of resolving a query, shaped for renderers.
#[derive(Debug, Clone)]
pub struct Resolution<T> {
  pub status: EntryState,
  /// The payload to show, if any
  pub data: Option<T>,
  pub error: Option<FetchError>,
  /// When `data` was fetched
  pub last_updated: Option<DateTime<Utc>>,
  /// Where `data` came from; `None` when there is no data
  pub source: Option<CacheSource>,
  /// Records dropped by validation while decoding `data`
  pub dropped: usize,
}

impl<T> Resolution<T> {
  /// Fresh data straight from the network.
  pub fn from_network(data: T, fetched_at: DateTime<Utc>, dropped: usize) -> Self {
    Self {
      status: EntryState::Ready,
      data: Some(data),
      error: None,
      last_updated: Some(fetched_at),
      source: Some(CacheSource::Network),
      dropped,
    }
  }

  /// Cached data, fresh or stale.
  pub fn from_cache(entry: CacheEntry<T>, is_stale: bool) -> Self {
    Self {
      status: EntryState::Ready,
      source: entry.payload.as_ref().map(|_| {
        if is_stale {
          CacheSource::CacheStale
        } else {
          CacheSource::CacheFresh
        }
      }),
      data: entry.payload,
      error: None,
      last_updated: entry.fetched_at,
      dropped: entry.dropped,
    }
  }

  /// A failed fetch, keeping the last good payload when one exists.
  pub fn failed(error: FetchError, prior: Option<CacheEntry<T>>) -> Self {
    let (data, last_updated, dropped) = match prior {
      Some(entry) => (entry.payload, entry.fetched_at, entry.dropped),
      None => (None, None, 0),
    };
    Self {
      status: EntryState::Error,
      source: data.as_ref().map(|_| CacheSource::Fallback),
      data,
      error: Some(error),
      last_updated,
      dropped,
    }
  }

  /// Current state of an entry without fetching anything; a ready payload
  /// older than `ttl` is reported as stale.
  pub fn snapshot(entry: Option<CacheEntry<T>>, ttl: Duration) -> Self {
    match entry {
      Some(entry) => Self {
        status: entry.state,
        source: entry.payload.as_ref().map(|_| match entry.state {
          EntryState::Ready if entry.is_fresh(ttl) => CacheSource::CacheFresh,
          EntryState::Error => CacheSource::Fallback,
          EntryState::Ready | EntryState::Idle | EntryState::Loading => CacheSource::CacheStale,
        }),
        data: entry.payload,
        error: entry.error,
        last_updated: entry.fetched_at,
        dropped: entry.dropped,
      },
      None => Self {
        status: EntryState::Idle,
        data: None,
        error: None,
        last_updated: None,
        source: None,
        dropped: 0,
      },
    }
  }

  pub fn is_ready(&self) -> bool {
    self.status == EntryState::Ready
  }

  pub fn is_error(&self) -> bool {
    self.status == EntryState::Error
  }

  /// Whether the payload is served despite a failed or pending refresh.
  pub fn is_stale(&self) -> bool {
    matches!(
      self.source,
      Some(CacheSource::CacheStale) | Some(CacheSource::Fallback)
    )
  }

  /// The payload of a ready resolution, or the error of a failed one.
  pub fn into_result(self) -> Result<T, FetchError> {
    match (self.status, self.data, self.error) {
      (EntryState::Error, _, Some(error)) => Err(error),
      (_, Some(data), _) => Ok(data),
      (_, None, Some(error)) => Err(error),
      (_, None, None) => Err(FetchError::Abandoned),
    }
  }
}
