//! Handles for fetches that are currently running.
//!
//! A [`Flight`] is registered in the [`CacheStore`](super::CacheStore) that the
//! fetch will write to, so every caller sharing that store attaches to the same
//! fetch no matter which coordinator it came through.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::store::lock;
use crate::fetch::FetchError;
use crate::validate::Decoded;

/// Flag telling the store whether a caller still wants a result.
///
/// Revoke it when the consumer goes away (a view closes, the user switches
/// symbol). A fetch whose callers have all revoked their flags leaves the
/// cache untouched.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
  pub fn new() -> Self {
    Self(Arc::new(AtomicBool::new(true)))
  }

  pub fn is_alive(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }

  pub fn revoke(&self) {
    self.0.store(false, Ordering::Release);
  }
}

impl Default for Liveness {
  fn default() -> Self {
    Self::new()
  }
}

/// Liveness flags of every caller attached to one fetch.
#[derive(Debug, Clone, Default)]
pub struct Observers(Arc<Mutex<Vec<Liveness>>>);

impl Observers {
  pub(super) fn attach(&self, liveness: Liveness) {
    lock(&self.0).push(liveness);
  }

  pub fn any_alive(&self) -> bool {
    lock(&self.0).iter().any(Liveness::is_alive)
  }
}

/// A decoded payload and when it arrived.
#[derive(Debug, Clone)]
pub struct Landed<T> {
  pub decoded: Decoded<T>,
  pub fetched_at: DateTime<Utc>,
}

pub type FlightOutcome<T> = Result<Landed<T>, FetchError>;

pub type SharedOutcome<T> = Shared<BoxFuture<'static, FlightOutcome<T>>>;

/// A running fetch that later callers for the same key attach to.
pub struct Flight<T> {
  pub seq: u64,
  pub outcome: SharedOutcome<T>,
  pub(super) observers: Observers,
}

impl<T> Clone for Flight<T> {
  fn clone(&self) -> Self {
    Self {
      seq: self.seq,
      outcome: self.outcome.clone(),
      observers: self.observers.clone(),
    }
  }
}

/// What happened to a finished fetch's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
  /// Written to the entry
  Applied,
  /// A newer fetch or an invalidation already moved the entry on
  Superseded,
  /// Every attached caller had gone away; the entry went back to `Idle`
  Unobserved,
}
