//! In-memory store of the last known good payload per query.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use super::flight::{Flight, FlightOutcome, Liveness, Observers, Settlement, SharedOutcome};
use crate::fetch::FetchError;

// entries are never left half-updated, so a poisoned lock is still usable
pub(super) fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
  /// Known key with no fetch running; any payload is treated as stale
  Idle,
  /// A fetch is in flight
  Loading,
  /// Holds a validated payload
  Ready,
  /// The last fetch failed; a previous payload may still be present
  Error,
}

/// Snapshot of one cached query.
///
/// `state == Ready` implies `payload` and `fetched_at` are set.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  pub key: String,
  pub payload: Option<T>,
  /// Wall-clock time the payload was stored
  pub fetched_at: Option<DateTime<Utc>>,
  pub state: EntryState,
  pub error: Option<FetchError>,
  /// Records dropped by validation while decoding `payload`
  pub dropped: usize,
  stored_at: Option<Instant>,
  issued_seq: u64,
  applied_seq: u64,
}

impl<T> CacheEntry<T> {
  /// A fresh entry that rejects every sequence number issued up to `floor`.
  fn new(key: &str, floor: u64) -> Self {
    Self {
      key: key.to_string(),
      payload: None,
      fetched_at: None,
      state: EntryState::Idle,
      error: None,
      dropped: 0,
      stored_at: None,
      issued_seq: floor,
      applied_seq: floor,
    }
  }

  /// Time since the payload was stored.
  pub fn age(&self) -> Option<Duration> {
    self.stored_at.map(|t| t.elapsed())
  }

  pub fn is_fresh(&self, ttl: Duration) -> bool {
    self.state == EntryState::Ready && self.age().is_some_and(|age| age < ttl)
  }

  /// Sequence number of the last completion written to this entry.
  pub fn applied_seq(&self) -> u64 {
    self.applied_seq
  }

  /// Whether a completion tagged `seq` may still be written.
  fn accepts(&self, seq: u64) -> bool {
    seq > self.applied_seq
  }
}

struct Entries<T> {
  map: HashMap<String, CacheEntry<T>>,
  /// Last sequence number issued for any key; survives `clear`
  last_seq: u64,
}

/// Process-wide store shared by every caller of the data layer.
///
/// Callers only ever receive clones of entries. Every mutation goes through
/// the methods below, each of which holds the lock for its whole update.
/// Running fetches are registered here too, so coordinators sharing a store
/// also share its fetches.
///
/// Lock order is always `flights` before `entries`.
pub struct CacheStore<T> {
  flights: Mutex<HashMap<String, Flight<T>>>,
  entries: Mutex<Entries<T>>,
}

impl<T> Default for CacheStore<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> CacheStore<T> {
  pub fn new() -> Self {
    Self {
      flights: Mutex::new(HashMap::new()),
      entries: Mutex::new(Entries {
        map: HashMap::new(),
        last_seq: 0,
      }),
    }
  }

  fn entries(&self) -> MutexGuard<'_, Entries<T>> {
    lock(&self.entries)
  }

  /// Whether `key` holds a ready payload younger than `ttl`.
  pub fn is_fresh(&self, key: &str, ttl: Duration) -> bool {
    self
      .entries()
      .map
      .get(key)
      .is_some_and(|entry| entry.is_fresh(ttl))
  }

  /// Start a fetch for `key`, creating the entry on first sight.
  ///
  /// Returns the sequence number tagging the new fetch, or `None` if the
  /// entry is already loading.
  pub fn mark_loading(&self, key: &str) -> Option<u64> {
    let mut entries = self.entries();
    let Entries { map, last_seq } = &mut *entries;
    let entry = map
      .entry(key.to_string())
      .or_insert_with(|| CacheEntry::new(key, *last_seq));
    if entry.state == EntryState::Loading {
      return None;
    }
    *last_seq += 1;
    entry.state = EntryState::Loading;
    entry.issued_seq = *last_seq;
    Some(*last_seq)
  }

  /// Store a validated payload from the fetch tagged `seq`.
  ///
  /// Returns `false` without touching anything when the key is unknown or a
  /// newer completion has already been applied.
  pub fn put(&self, key: &str, seq: u64, payload: T, dropped: usize) -> bool {
    let mut entries = self.entries();
    let Some(entry) = entries.map.get_mut(key) else {
      return false;
    };
    if !entry.accepts(seq) {
      return false;
    }
    entry.payload = Some(payload);
    entry.fetched_at = Some(Utc::now());
    entry.stored_at = Some(Instant::now());
    entry.dropped = dropped;
    entry.error = None;
    entry.state = EntryState::Ready;
    entry.applied_seq = seq;
    true
  }

  /// Record a failed fetch tagged `seq`, keeping any previous payload.
  pub fn mark_error(&self, key: &str, seq: u64, error: FetchError) -> bool {
    let mut entries = self.entries();
    let Some(entry) = entries.map.get_mut(key) else {
      return false;
    };
    if !entry.accepts(seq) {
      return false;
    }
    entry.error = Some(error);
    entry.state = EntryState::Error;
    entry.applied_seq = seq;
    true
  }

  /// Force the entry back to `Idle` without dropping its payload, and detach
  /// any fetch running for it.
  ///
  /// Completions of fetches issued before this call are discarded.
  pub fn invalidate(&self, key: &str) {
    let mut flights = lock(&self.flights);
    flights.remove(key);
    self.reset_entry(key);
  }

  fn reset_entry(&self, key: &str) {
    if let Some(entry) = self.entries().map.get_mut(key) {
      entry.state = EntryState::Idle;
      entry.applied_seq = entry.issued_seq;
    }
  }

  /// Return the entry to `Idle` when the fetch tagged `seq` finished with
  /// nobody left to observe it.
  pub fn release(&self, key: &str, seq: u64) {
    if let Some(entry) = self.entries().map.get_mut(key) {
      if entry.state == EntryState::Loading && entry.issued_seq == seq {
        entry.state = EntryState::Idle;
      }
    }
  }

  pub fn len(&self) -> usize {
    self.entries().map.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries().map.is_empty()
  }

  /// Drop every entry and detach every running fetch.
  ///
  /// Sequence numbers keep counting, so a detached fetch can never write over
  /// an entry created after the clear.
  pub fn clear(&self) {
    let mut flights = lock(&self.flights);
    flights.clear();
    self.entries().map.clear();
  }

  /// Whether a fetch for `key` is registered.
  pub fn is_in_flight(&self, key: &str) -> bool {
    lock(&self.flights).contains_key(key)
  }

  /// Attach `liveness` to the fetch running for `key`, or register a new one.
  ///
  /// `start` receives the new fetch's sequence number and observer list and
  /// must return its shared outcome; it runs under the registry lock, so it
  /// should only spawn. The flag is `true` when a new fetch was started.
  pub fn join_or_start(
    &self,
    key: &str,
    liveness: Liveness,
    start: impl FnOnce(u64, Observers) -> SharedOutcome<T>,
  ) -> (Flight<T>, bool) {
    let mut flights = lock(&self.flights);

    if let Some(existing) = flights.get(key) {
      existing.observers.attach(liveness);
      return (existing.clone(), false);
    }

    let seq = match self.mark_loading(key) {
      Some(seq) => seq,
      None => {
        // loading, yet no fetch is registered anywhere for it
        warn!(key, "orphaned loading entry, restarting fetch");
        self.reset_entry(key);
        self.mark_loading(key).unwrap_or_default()
      }
    };

    let observers = Observers::default();
    observers.attach(liveness);
    let flight = Flight {
      seq,
      outcome: start(seq, observers.clone()),
      observers,
    };
    flights.insert(key.to_string(), flight.clone());
    (flight, true)
  }

  /// Unregister the fetch tagged `seq` after it ended without an outcome.
  pub fn abandon(&self, key: &str, seq: u64) {
    let mut flights = lock(&self.flights);
    if flights.get(key).is_some_and(|f| f.seq == seq) {
      flights.remove(key);
    }
    self.release(key, seq);
  }
}

impl<T: Clone> CacheStore<T> {
  /// Copy of the entry for `key`, if the key has been seen.
  pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
    self.entries().map.get(key).cloned()
  }

  /// Apply the outcome of the fetch tagged `seq` and unregister it.
  ///
  /// Holds the registry lock throughout so no new fetch for the key can start
  /// between the entry update and the unregistration.
  pub fn settle(
    &self,
    key: &str,
    seq: u64,
    observers: &Observers,
    outcome: &FlightOutcome<T>,
  ) -> Settlement {
    let mut flights = lock(&self.flights);

    let settlement = if !observers.any_alive() {
      self.release(key, seq);
      Settlement::Unobserved
    } else {
      let applied = match outcome {
        Ok(landed) => self.put(
          key,
          seq,
          landed.decoded.value.clone(),
          landed.decoded.dropped,
        ),
        Err(error) => self.mark_error(key, seq, error.clone()),
      };
      if applied {
        Settlement::Applied
      } else {
        Settlement::Superseded
      }
    };

    if flights.get(key).is_some_and(|f| f.seq == seq) {
      flights.remove(key);
    }
    settlement
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Landed;
  use crate::validate::Decoded;
  use futures::future::{self, FutureExt};

  fn timeout_error() -> FetchError {
    FetchError::Timeout { attempts: 4 }
  }

  fn landed(value: u32) -> FlightOutcome<u32> {
    Ok(Landed {
      decoded: Decoded::clean(value),
      fetched_at: Utc::now(),
    })
  }

  fn ready_outcome(value: u32) -> SharedOutcome<u32> {
    future::ready(landed(value)).boxed().shared()
  }

  #[test]
  fn test_get_unknown_key_is_miss() {
    let store: CacheStore<u32> = CacheStore::new();
    assert!(store.get("AAPL").is_none());
    assert!(store.is_empty());
  }

  #[test]
  fn test_first_sight_creates_idle_then_loading() {
    let store: CacheStore<u32> = CacheStore::new();
    assert_eq!(store.mark_loading("AAPL"), Some(1));

    let entry = store.get("AAPL").unwrap();
    assert_eq!(entry.state, EntryState::Loading);
    assert!(entry.payload.is_none());
    assert!(entry.fetched_at.is_none());
  }

  #[test]
  fn test_mark_loading_twice_is_noop() {
    let store: CacheStore<u32> = CacheStore::new();
    assert_eq!(store.mark_loading("AAPL"), Some(1));
    assert_eq!(store.mark_loading("AAPL"), None);
    assert_eq!(store.get("AAPL").unwrap().state, EntryState::Loading);
  }

  #[test]
  fn test_put_sets_ready() {
    let store = CacheStore::new();
    let seq = store.mark_loading("AAPL").unwrap();
    assert!(store.put("AAPL", seq, 42u32, 2));

    let entry = store.get("AAPL").unwrap();
    assert_eq!(entry.state, EntryState::Ready);
    assert_eq!(entry.payload, Some(42));
    assert!(entry.fetched_at.is_some());
    assert_eq!(entry.dropped, 2);
    assert!(entry.error.is_none());
  }

  #[test]
  fn test_writes_to_unknown_key_are_refused() {
    let store = CacheStore::new();
    assert!(!store.put("AAPL", 1, 42u32, 0));
    assert!(!store.mark_error("AAPL", 1, timeout_error()));
    assert!(store.is_empty());
  }

  #[test]
  fn test_error_keeps_previous_payload() {
    let store = CacheStore::new();
    let seq = store.mark_loading("AAPL").unwrap();
    store.put("AAPL", seq, 42u32, 0);
    let fetched_at = store.get("AAPL").unwrap().fetched_at;

    let seq = store.mark_loading("AAPL").unwrap();
    assert!(store.mark_error("AAPL", seq, timeout_error()));

    let entry = store.get("AAPL").unwrap();
    assert_eq!(entry.state, EntryState::Error);
    assert_eq!(entry.payload, Some(42));
    assert_eq!(entry.fetched_at, fetched_at);
    assert_eq!(entry.error, Some(timeout_error()));
  }

  #[test]
  fn test_put_clears_error() {
    let store = CacheStore::new();
    let seq = store.mark_loading("AAPL").unwrap();
    store.mark_error("AAPL", seq, timeout_error());
    let seq = store.mark_loading("AAPL").unwrap();
    store.put("AAPL", seq, 7u32, 0);
    assert!(store.get("AAPL").unwrap().error.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_freshness_follows_ttl() {
    let store = CacheStore::new();
    let seq = store.mark_loading("AAPL").unwrap();
    store.put("AAPL", seq, 1u32, 0);

    assert!(store.is_fresh("AAPL", Duration::from_secs(300)));
    tokio::time::advance(Duration::from_secs(299)).await;
    assert!(store.is_fresh("AAPL", Duration::from_secs(300)));
    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!store.is_fresh("AAPL", Duration::from_secs(300)));
    assert!(!store.is_fresh("MSFT", Duration::from_secs(300)));
  }

  #[test]
  fn test_loading_and_error_entries_are_not_fresh() {
    let store = CacheStore::new();
    let seq = store.mark_loading("AAPL").unwrap();
    store.put("AAPL", seq, 1u32, 0);
    store.mark_loading("AAPL");
    assert!(!store.is_fresh("AAPL", Duration::from_secs(300)));
  }

  #[test]
  fn test_invalidate_keeps_payload_and_goes_idle() {
    let store = CacheStore::new();
    let seq = store.mark_loading("AAPL").unwrap();
    store.put("AAPL", seq, 5u32, 0);

    store.invalidate("AAPL");

    let entry = store.get("AAPL").unwrap();
    assert_eq!(entry.state, EntryState::Idle);
    assert_eq!(entry.payload, Some(5));
    assert!(!store.is_fresh("AAPL", Duration::from_secs(300)));
  }

  #[test]
  fn test_older_completion_never_overwrites_newer() {
    let store = CacheStore::new();
    let first = store.mark_loading("AAPL").unwrap();
    store.invalidate("AAPL");
    let second = store.mark_loading("AAPL").unwrap();
    assert!(second > first);

    assert!(store.put("AAPL", second, "B", 0));
    assert!(!store.put("AAPL", first, "A", 0));
    assert!(!store.mark_error("AAPL", first, timeout_error()));

    let entry = store.get("AAPL").unwrap();
    assert_eq!(entry.payload, Some("B"));
    assert_eq!(entry.state, EntryState::Ready);
    assert_eq!(entry.applied_seq(), second);
  }

  #[test]
  fn test_fetch_from_before_clear_cannot_write_after_it() {
    let store = CacheStore::new();
    let before = store.mark_loading("AAPL").unwrap();
    store.clear();

    assert!(!store.put("AAPL", before, "OLD", 0));
    let after = store.mark_loading("AAPL").unwrap();
    assert!(after > before);
    assert!(!store.put("AAPL", before, "OLD", 0));
    assert!(store.put("AAPL", after, "NEW", 0));
    assert_eq!(store.get("AAPL").unwrap().payload, Some("NEW"));
  }

  #[test]
  fn test_release_only_affects_current_fetch() {
    let store: CacheStore<u32> = CacheStore::new();
    let first = store.mark_loading("AAPL").unwrap();
    store.invalidate("AAPL");
    let second = store.mark_loading("AAPL").unwrap();

    store.release("AAPL", first);
    assert_eq!(store.get("AAPL").unwrap().state, EntryState::Loading);

    store.release("AAPL", second);
    assert_eq!(store.get("AAPL").unwrap().state, EntryState::Idle);
  }

  #[test]
  fn test_clear_resets_store() {
    let store: CacheStore<u32> = CacheStore::new();
    store.mark_loading("AAPL");
    store.mark_loading("MSFT");
    assert_eq!(store.len(), 2);
    store.clear();
    assert!(store.is_empty());
  }

  #[test]
  fn test_second_caller_joins_registered_fetch() {
    let store: CacheStore<u32> = CacheStore::new();
    let mut starts = 0;

    let (first, started) = store.join_or_start("AAPL", Liveness::new(), |_, _| {
      starts += 1;
      ready_outcome(1)
    });
    assert!(started);
    let (second, started) = store.join_or_start("AAPL", Liveness::new(), |_, _| {
      starts += 1;
      ready_outcome(2)
    });

    assert!(!started);
    assert_eq!(starts, 1);
    assert_eq!(first.seq, second.seq);
    assert!(store.is_in_flight("AAPL"));
    assert_eq!(store.get("AAPL").unwrap().state, EntryState::Loading);
  }

  #[test]
  fn test_settle_applies_and_unregisters() {
    let store: CacheStore<u32> = CacheStore::new();
    let (flight, _) = store.join_or_start("AAPL", Liveness::new(), |_, _| ready_outcome(1));

    let settlement = store.settle("AAPL", flight.seq, &flight.observers, &landed(1));

    assert_eq!(settlement, Settlement::Applied);
    assert!(!store.is_in_flight("AAPL"));
    assert_eq!(store.get("AAPL").unwrap().payload, Some(1));
  }

  #[test]
  fn test_settle_without_live_observers_releases() {
    let store: CacheStore<u32> = CacheStore::new();
    let liveness = Liveness::new();
    let (flight, _) = store.join_or_start("AAPL", liveness.clone(), |_, _| ready_outcome(1));
    liveness.revoke();

    let settlement = store.settle("AAPL", flight.seq, &flight.observers, &landed(1));

    assert_eq!(settlement, Settlement::Unobserved);
    let entry = store.get("AAPL").unwrap();
    assert_eq!(entry.state, EntryState::Idle);
    assert!(entry.payload.is_none());
  }

  #[test]
  fn test_abandon_frees_the_key() {
    let store: CacheStore<u32> = CacheStore::new();
    let (flight, _) = store.join_or_start("AAPL", Liveness::new(), |_, _| ready_outcome(1));

    store.abandon("AAPL", flight.seq);

    assert!(!store.is_in_flight("AAPL"));
    assert_eq!(store.get("AAPL").unwrap().state, EntryState::Idle);
    let (_, started) = store.join_or_start("AAPL", Liveness::new(), |_, _| ready_outcome(2));
    assert!(started);
  }

  #[test]
  fn test_loading_entry_without_flight_is_restarted() {
    let store: CacheStore<u32> = CacheStore::new();
    let stray = store.mark_loading("AAPL").unwrap();

    let (flight, started) = store.join_or_start("AAPL", Liveness::new(), |_, _| ready_outcome(1));

    assert!(started);
    assert!(flight.seq > stray);
    assert!(!store.put("AAPL", stray, 9, 0));
  }
}
