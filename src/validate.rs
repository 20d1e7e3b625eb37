//! Shape validation for time-series and list payloads.
//!
//! Records that fail their schema are dropped and counted; they never fail the
//! response as a whole. An input where every record is rejected yields an empty
//! result, which callers render as "no data" rather than as an error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
  /// ISO-8601 timestamp as sent by the API
  pub timestamp: String,
  pub open: f64,
  pub high: f64,
  pub low: f64,
  pub close: f64,
  pub volume: f64,
}

/// Records that passed validation plus how many were rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct Filtered<T> {
  pub valid: Vec<T>,
  pub dropped_count: usize,
}

impl<T> Default for Filtered<T> {
  fn default() -> Self {
    Self {
      valid: Vec::new(),
      dropped_count: 0,
    }
  }
}

/// A decoded payload and the number of records dropped while decoding it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
  pub value: T,
  pub dropped: usize,
}

impl<T> Decoded<T> {
  /// A payload with nothing dropped.
  pub fn clean(value: T) -> Self {
    Self { value, dropped: 0 }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decoded<U> {
    Decoded {
      value: f(self.value),
      dropped: self.dropped,
    }
  }
}

impl<T> From<Filtered<T>> for Decoded<Vec<T>> {
  fn from(filtered: Filtered<T>) -> Self {
    Self {
      value: filtered.valid,
      dropped: filtered.dropped_count,
    }
  }
}

/// Keep the points whose `timestamp` is a string and whose `open`, `high`,
/// `low`, `close` and `volume` are all numbers.
pub fn filter(raw_points: &[Value]) -> Filtered<TimeSeriesPoint> {
  let mut filtered = Filtered::default();
  for raw in raw_points {
    match parse_point(raw) {
      Some(point) => filtered.valid.push(point),
      None => filtered.dropped_count += 1,
    }
  }
  filtered
}

fn parse_point(raw: &Value) -> Option<TimeSeriesPoint> {
  let fields = raw.as_object()?;
  Some(TimeSeriesPoint {
    timestamp: fields.get("timestamp")?.as_str()?.to_string(),
    open: number(fields, "open")?,
    high: number(fields, "high")?,
    low: number(fields, "low")?,
    close: number(fields, "close")?,
    volume: number(fields, "volume")?,
  })
}

fn number(fields: &Map<String, Value>, name: &str) -> Option<f64> {
  fields.get(name)?.as_f64()
}

/// Deserialize each record into `T`, dropping the ones that don't fit.
pub fn filter_records<T: DeserializeOwned>(raw: &[Value]) -> Filtered<T> {
  let mut filtered = Filtered::default();
  for record in raw {
    match T::deserialize(record) {
      Ok(value) => filtered.valid.push(value),
      Err(_) => filtered.dropped_count += 1,
    }
  }
  filtered
}
