//! Query coordination for cached, single-flight data fetching.
//!
//! Inspired by TanStack Query, `QueryCoordinator<T>` decides per key whether
//! to serve the cached payload or fetch, runs the fetch under the retry
//! policy, decodes and validates the response, and writes the outcome to the
//! shared [`CacheStore`].
//!
//! # Example
//!
//! ```ignore
//! let coordinator = QueryCoordinator::new(Arc::new(CacheStore::new()), executor);
//!
//! let resolution = coordinator
//!   .resolve(&key, Duration::from_secs(300), client.get(url), decode_chart, ResolveOptions::default())
//!   .await;
//!
//! match resolution.status {
//!   EntryState::Ready => render_chart(resolution.data),
//!   EntryState::Error => render_error_with_fallback(resolution.error, resolution.data),
//!   _ => render_spinner(),
//! }
//! ```

use chrono::Utc;
use futures::future::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, Flight, FlightOutcome, Landed, Observers, QueryKey, Resolution, Settlement};
use crate::fetch::{Envelope, FetchError, FetchExecutor, RawResponse, TransportError};
use crate::validate::Decoded;

pub use crate::cache::Liveness;

/// Per-call options for [`QueryCoordinator::resolve`].
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
  /// Skip the freshness check (manual refresh)
  pub force: bool,
  /// Return a stale payload immediately and refetch in the background
  pub stale_while_revalidate: bool,
  pub liveness: Option<Liveness>,
}

impl ResolveOptions {
  pub fn forced() -> Self {
    Self {
      force: true,
      ..Self::default()
    }
  }

  pub fn with_force(mut self, force: bool) -> Self {
    self.force = force;
    self
  }

  pub fn with_stale_while_revalidate(mut self) -> Self {
    self.stale_while_revalidate = true;
    self
  }

  pub fn with_liveness(mut self, liveness: Liveness) -> Self {
    self.liveness = Some(liveness);
    self
  }
}

/// Orchestrates cache lookups and fetches for every query of one payload type.
///
/// At most one fetch per key is outstanding at any time: concurrent
/// `resolve` calls for a key that is already loading await the same fetch.
/// Running fetches live in the store, so this holds for every coordinator
/// built over the same `Arc<CacheStore>`.
pub struct QueryCoordinator<T> {
  store: Arc<CacheStore<T>>,
  executor: FetchExecutor,
}

impl<T> Clone for QueryCoordinator<T> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      executor: self.executor.clone(),
    }
  }
}

impl<T> QueryCoordinator<T>
where
  T: Clone + Send + Sync + 'static,
{
  pub fn new(store: Arc<CacheStore<T>>, executor: FetchExecutor) -> Self {
    Self { store, executor }
  }

  pub fn store(&self) -> &Arc<CacheStore<T>> {
    &self.store
  }

  /// Resolve `key`, fetching only when the cached payload is older than `ttl`
  /// or `options.force` is set.
  ///
  /// `fetch_fn` performs one GET; it may be invoked several times by the
  /// retry loop. `decode` turns the envelope's `data` into the typed payload
  /// and reports how many records were dropped; returning an error marks the
  /// response as invalid.
  pub async fn resolve<K, F, Fut, D>(
    &self,
    key: &K,
    ttl: Duration,
    fetch_fn: F,
    decode: D,
    options: ResolveOptions,
  ) -> Resolution<T>
  where
    K: QueryKey + ?Sized,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<RawResponse, TransportError>> + Send + 'static,
    D: FnOnce(Value) -> Result<Decoded<T>, FetchError> + Send + 'static,
  {
    let hash = key.cache_hash();
    let description = key.description();

    if !options.force {
      if let Some(entry) = self.store.get(&hash) {
        if entry.is_fresh(ttl) {
          debug!(key = %description, "cache hit");
          return Resolution::from_cache(entry, false);
        }
      }
    }

    let liveness = options.liveness.clone().unwrap_or_default();
    let flight = self.join_or_start(&hash, &description, fetch_fn, decode, liveness);

    if options.stale_while_revalidate {
      if let Some(entry) = self.store.get(&hash) {
        if entry.payload.is_some() {
          debug!(key = %description, "serving stale payload while revalidating");
          return Resolution::from_cache(entry, true);
        }
      }
    }

    match flight.outcome.await {
      Ok(landed) => Resolution::from_network(
        landed.decoded.value,
        landed.fetched_at,
        landed.decoded.dropped,
      ),
      Err(error) => Resolution::failed(error, self.store.get(&hash)),
    }
  }

  /// Refetch `key` regardless of freshness, joining a fetch already running.
  pub async fn force_refresh<K, F, Fut, D>(&self, key: &K, fetch_fn: F, decode: D) -> Resolution<T>
  where
    K: QueryKey + ?Sized,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<RawResponse, TransportError>> + Send + 'static,
    D: FnOnce(Value) -> Result<Decoded<T>, FetchError> + Send + 'static,
  {
    self
      .resolve(key, Duration::ZERO, fetch_fn, decode, ResolveOptions::forced())
      .await
  }

  /// Current state of `key` without fetching, judged against `ttl`.
  pub fn snapshot<K: QueryKey + ?Sized>(&self, key: &K, ttl: Duration) -> Resolution<T> {
    Resolution::snapshot(self.store.get(&key.cache_hash()), ttl)
  }

  /// Whether a fetch for `key` is outstanding.
  pub fn is_in_flight<K: QueryKey + ?Sized>(&self, key: &K) -> bool {
    self.store.is_in_flight(&key.cache_hash())
  }

  /// Mark `key` stale and detach any running fetch for it.
  ///
  /// The detached fetch still completes, but its result is discarded.
  pub fn invalidate<K: QueryKey + ?Sized>(&self, key: &K) {
    debug!(key = %key.description(), "invalidating");
    self.store.invalidate(&key.cache_hash());
  }

  /// Forget every entry. Fetches still running are detached first.
  pub fn clear(&self) {
    self.store.clear();
  }

  fn join_or_start<F, Fut, D>(
    &self,
    hash: &str,
    description: &str,
    fetch_fn: F,
    decode: D,
    liveness: Liveness,
  ) -> Flight<T>
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<RawResponse, TransportError>> + Send + 'static,
    D: FnOnce(Value) -> Result<Decoded<T>, FetchError> + Send + 'static,
  {
    let (flight, started) = self.store.join_or_start(hash, liveness, |seq, observers| {
      info!(key = %description, seq, "fetching");
      let task = FetchTask {
        key: hash.to_string(),
        description: description.to_string(),
        seq,
        store: Arc::clone(&self.store),
        observers,
        settled: false,
      };
      let executor = self.executor.clone();

      let handle = tokio::spawn(async move {
        let outcome = executor
          .run(fetch_fn)
          .await
          .and_then(|response| {
            let envelope = Envelope::parse(&response.body)?;
            decode(envelope.data)
          })
          .map(|decoded| Landed {
            decoded,
            fetched_at: Utc::now(),
          });
        task.settle(&outcome);
        outcome
      });

      handle
        .map(|joined| joined.unwrap_or_else(|_| Err(FetchError::Abandoned)))
        .boxed()
        .shared()
    });

    if !started {
      debug!(key = %description, seq = flight.seq, "joining in-flight fetch");
    }
    flight
  }
}

/// Everything a spawned fetch needs to write its outcome back.
///
/// Dropping it unsettled (the task panicked or was cancelled) unregisters the
/// fetch and returns the entry to `Idle`.
struct FetchTask<T> {
  key: String,
  description: String,
  seq: u64,
  store: Arc<CacheStore<T>>,
  observers: Observers,
  settled: bool,
}

impl<T: Clone> FetchTask<T> {
  fn settle(mut self, outcome: &FlightOutcome<T>) {
    match outcome {
      Ok(landed) if landed.decoded.dropped > 0 => {
        warn!(
          key = %self.description,
          dropped = landed.decoded.dropped,
          "dropped malformed records"
        );
      }
      Ok(_) => {}
      Err(error) => warn!(key = %self.description, error = %error, "fetch failed"),
    }

    match self.store.settle(&self.key, self.seq, &self.observers, outcome) {
      Settlement::Applied => {}
      Settlement::Superseded => {
        debug!(key = %self.description, seq = self.seq, "discarding superseded completion")
      }
      Settlement::Unobserved => {
        debug!(key = %self.description, seq = self.seq, "no live observers, discarding result")
      }
    }
    self.settled = true;
  }
}

impl<T> Drop for FetchTask<T> {
  fn drop(&mut self) {
    if !self.settled {
      warn!(key = %self.description, seq = self.seq, "fetch ended without an outcome");
      self.store.abandon(&self.key, self.seq);
    }
  }
}
