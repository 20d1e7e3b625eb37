//! Request-side domain types: symbols, chart parameters and index names.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Years of dividend history the API will return.
pub const DIVIDEND_YEARS: RangeInclusive<u32> = 1..=10;
pub const DEFAULT_DIVIDEND_YEARS: u32 = 5;

/// How many symbols one comparison may hold.
pub const COMPARE_SYMBOLS: RangeInclusive<usize> = 2..=5;

/// Client-side rejection of a request before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
  #[error("invalid symbol '{0}'")]
  InvalidSymbol(String),
  #[error("search query must not be empty")]
  EmptyQuery,
  #[error("unknown chart period '{0}'")]
  UnknownPeriod(String),
  #[error("unknown chart interval '{0}'")]
  UnknownInterval(String),
  #[error("unknown index '{0}' (expected one of: dow, nasdaq, sp500, russell2000)")]
  UnknownIndex(String),
  #[error("dividend history covers 1 to 10 years, got {0}")]
  DividendYears(u32),
  #[error("comparison takes 2 to 5 symbols, got {0}")]
  CompareCount(usize),
  #[error("cannot build request url from base '{0}'")]
  InvalidBaseUrl(String),
}

/// A ticker symbol, trimmed and upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(String);

impl Symbol {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl FromStr for Symbol {
  type Err = InputError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let symbol = s.trim().to_uppercase();
    let valid = !symbol.is_empty()
      && symbol.len() <= 12
      && symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '^'));
    if valid {
      Ok(Self(symbol))
    } else {
      Err(InputError::InvalidSymbol(s.to_string()))
    }
  }
}

impl fmt::Display for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Defines a string-backed enum with `as_str`, `ALL`, `FromStr` and `Display`.
macro_rules! wire_enum {
  (
    $(#[$meta:meta])*
    $name:ident, $error:ident, default = $default:ident,
    { $($variant:ident => $wire:literal),+ $(,)? }
  ) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum $name {
      $($variant),+
    }

    impl $name {
      pub const ALL: &'static [Self] = &[$(Self::$variant),+];

      pub fn as_str(&self) -> &'static str {
        match self {
          $(Self::$variant => $wire),+
        }
      }
    }

    impl Default for $name {
      fn default() -> Self {
        Self::$default
      }
    }

    impl FromStr for $name {
      type Err = InputError;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
          .iter()
          .copied()
          .find(|v| v.as_str() == wanted)
          .ok_or_else(|| InputError::$error(s.to_string()))
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
      }
    }
  };
}

wire_enum! {
  /// Chart look-back window.
  ChartPeriod, UnknownPeriod, default = OneMonth,
  {
    OneDay => "1d",
    FiveDays => "5d",
    OneMonth => "1mo",
    ThreeMonths => "3mo",
    SixMonths => "6mo",
    OneYear => "1y",
    TwoYears => "2y",
    FiveYears => "5y",
    TenYears => "10y",
    YearToDate => "ytd",
    Max => "max",
  }
}

wire_enum! {
  /// Bar width of a chart.
  ChartInterval, UnknownInterval, default = OneDay,
  {
    OneMinute => "1m",
    TwoMinutes => "2m",
    FiveMinutes => "5m",
    FifteenMinutes => "15m",
    ThirtyMinutes => "30m",
    SixtyMinutes => "60m",
    NinetyMinutes => "90m",
    OneHour => "1h",
    OneDay => "1d",
    FiveDays => "5d",
    OneWeek => "1wk",
    OneMonth => "1mo",
    ThreeMonths => "3mo",
  }
}

wire_enum! {
  /// Market index whose constituents can be listed.
  IndexName, UnknownIndex, default = Sp500,
  {
    Dow => "dow",
    Nasdaq => "nasdaq",
    Sp500 => "sp500",
    Russell2000 => "russell2000",
  }
}

/// Normalize a search query for keying: trimmed and lower-cased.
pub fn normalize_query(query: &str) -> Result<String, InputError> {
  let query = query.trim().to_lowercase();
  if query.is_empty() {
    Err(InputError::EmptyQuery)
  } else {
    Ok(query)
  }
}

/// Parse a comma-separated symbol list such as `"aapl, msft"`.
pub fn parse_symbols(list: &str) -> Result<Vec<Symbol>, InputError> {
  let parts: Vec<&str> = list.split(',').collect();
  if !COMPARE_SYMBOLS.contains(&parts.len()) {
    return Err(InputError::CompareCount(parts.len()));
  }
  parts.into_iter().map(str::parse::<Symbol>).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_symbol_is_normalized() {
    let symbol: Symbol = "  aapl ".parse().unwrap();
    assert_eq!(symbol.as_str(), "AAPL");
    assert_eq!("brk-b".parse::<Symbol>().unwrap().to_string(), "BRK-B");
  }

  #[test]
  fn test_symbol_rejects_garbage() {
    assert!(matches!("".parse::<Symbol>(), Err(InputError::InvalidSymbol(_))));
    assert!("   ".parse::<Symbol>().is_err());
    assert!("AA PL".parse::<Symbol>().is_err());
    assert!("../info".parse::<Symbol>().is_err());
  }

  #[test]
  fn test_chart_defaults() {
    assert_eq!(ChartPeriod::default(), ChartPeriod::OneMonth);
    assert_eq!(ChartInterval::default(), ChartInterval::OneDay);
  }

  #[test]
  fn test_chart_parameters_parse_wire_values() {
    assert_eq!("1y".parse::<ChartPeriod>().unwrap(), ChartPeriod::OneYear);
    assert_eq!("YTD".parse::<ChartPeriod>().unwrap(), ChartPeriod::YearToDate);
    assert_eq!("1wk".parse::<ChartInterval>().unwrap(), ChartInterval::OneWeek);
    assert_eq!(
      "2w".parse::<ChartInterval>(),
      Err(InputError::UnknownInterval("2w".to_string()))
    );
    assert_eq!(ChartPeriod::ALL.len(), 11);
    assert_eq!(ChartInterval::ALL.len(), 13);
  }

  #[test]
  fn test_index_names_are_case_insensitive() {
    assert_eq!("NASDAQ".parse::<IndexName>().unwrap(), IndexName::Nasdaq);
    assert_eq!(" Russell2000".parse::<IndexName>().unwrap(), IndexName::Russell2000);
    assert_eq!(
      "ftse".parse::<IndexName>(),
      Err(InputError::UnknownIndex("ftse".to_string()))
    );
  }

  #[test]
  fn test_query_normalization() {
    assert_eq!(normalize_query("  Apple ").unwrap(), "apple");
    assert_eq!(normalize_query(" "), Err(InputError::EmptyQuery));
  }

  #[test]
  fn test_symbol_list() {
    let symbols = parse_symbols("aapl, msft,GOOGL").unwrap();
    let names: Vec<&str> = symbols.iter().map(Symbol::as_str).collect();
    assert_eq!(names, ["AAPL", "MSFT", "GOOGL"]);

    assert_eq!(parse_symbols("AAPL"), Err(InputError::CompareCount(1)));
    assert_eq!(parse_symbols("A,B,C,D,E,F"), Err(InputError::CompareCount(6)));
    assert!(matches!(parse_symbols("AAPL,"), Err(InputError::InvalidSymbol(_))));
  }
}
