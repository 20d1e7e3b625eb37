//! Cache keys for market data queries.

use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::cache::QueryKey;

use super::types::{
  normalize_query, parse_symbols, ChartInterval, ChartPeriod, IndexName, InputError, Symbol, DIVIDEND_YEARS,
};

/// Resource families that share a freshness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
  Quote,
  Chart,
  Search,
  /// Popular, top market cap and index listings
  Listing,
  Profile,
  /// Financial statements and dividend history
  Fundamentals,
}

impl ResourceKind {
  pub fn default_ttl(self) -> Duration {
    Duration::from_secs(match self {
      Self::Quote => 60,
      Self::Chart => 300,
      Self::Search => 60,
      Self::Listing => 300,
      Self::Profile => 3600,
      Self::Fundamentals => 3600,
    })
  }
}

/// Query key types for market API calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarketQueryKey {
  Quote { symbol: Symbol },
  Chart {
    symbol: Symbol,
    period: ChartPeriod,
    interval: ChartInterval,
  },
  /// `query` is already normalized
  Search { query: String },
  Popular,
  TopMarketCap,
  Index { index: IndexName },
  Profile { symbol: Symbol },
  Financial { symbol: Symbol },
  Dividends { symbol: Symbol, years: u32 },
  /// Symbols in the order given
  Compare { symbols: Vec<Symbol> },
}

impl MarketQueryKey {
  pub fn quote(symbol: &str) -> Result<Self, InputError> {
    Ok(Self::Quote {
      symbol: symbol.parse()?,
    })
  }

  pub fn chart(symbol: &str, period: ChartPeriod, interval: ChartInterval) -> Result<Self, InputError> {
    Ok(Self::Chart {
      symbol: symbol.parse()?,
      period,
      interval,
    })
  }

  pub fn search(query: &str) -> Result<Self, InputError> {
    Ok(Self::Search {
      query: normalize_query(query)?,
    })
  }

  pub fn index(name: &str) -> Result<Self, InputError> {
    Ok(Self::Index { index: name.parse()? })
  }

  pub fn profile(symbol: &str) -> Result<Self, InputError> {
    Ok(Self::Profile {
      symbol: symbol.parse()?,
    })
  }

  pub fn financial(symbol: &str) -> Result<Self, InputError> {
    Ok(Self::Financial {
      symbol: symbol.parse()?,
    })
  }

  pub fn dividends(symbol: &str, years: u32) -> Result<Self, InputError> {
    if !DIVIDEND_YEARS.contains(&years) {
      return Err(InputError::DividendYears(years));
    }
    Ok(Self::Dividends {
      symbol: symbol.parse()?,
      years,
    })
  }

  /// `symbols` is comma separated, 2 to 5 entries.
  pub fn compare(symbols: &str) -> Result<Self, InputError> {
    Ok(Self::Compare {
      symbols: parse_symbols(symbols)?,
    })
  }

  pub fn kind(&self) -> ResourceKind {
    match self {
      Self::Quote { .. } | Self::Compare { .. } => ResourceKind::Quote,
      Self::Chart { .. } => ResourceKind::Chart,
      Self::Search { .. } => ResourceKind::Search,
      Self::Popular | Self::TopMarketCap | Self::Index { .. } => ResourceKind::Listing,
      Self::Profile { .. } => ResourceKind::Profile,
      Self::Financial { .. } | Self::Dividends { .. } => ResourceKind::Fundamentals,
    }
  }
}

impl QueryKey for MarketQueryKey {
  fn cache_hash(&self) -> String {
    let input = match self {
      Self::Quote { symbol } => format!("quote:{symbol}"),
      Self::Chart {
        symbol,
        period,
        interval,
      } => format!("chart:{symbol}:{period}:{interval}"),
      Self::Search { query } => format!("search:{query}"),
      Self::Popular => "popular".to_string(),
      Self::TopMarketCap => "top_market_cap".to_string(),
      Self::Index { index } => format!("index:{index}"),
      Self::Profile { symbol } => format!("profile:{symbol}"),
      Self::Financial { symbol } => format!("financial:{symbol}"),
      Self::Dividends { symbol, years } => format!("dividends:{symbol}:{years}"),
      Self::Compare { symbols } => format!("compare:{}", join(symbols, ",")),
    };

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  fn description(&self) -> String {
    match self {
      Self::Quote { symbol } => format!("quote {symbol}"),
      Self::Chart {
        symbol,
        period,
        interval,
      } => format!("chart {symbol} ({period}, {interval})"),
      Self::Search { query } => format!("search '{query}'"),
      Self::Popular => "popular stocks".to_string(),
      Self::TopMarketCap => "top market cap".to_string(),
      Self::Index { index } => format!("index {index}"),
      Self::Profile { symbol } => format!("profile {symbol}"),
      Self::Financial { symbol } => format!("financial {symbol}"),
      Self::Dividends { symbol, years } => format!("dividends {symbol} ({years}y)"),
      Self::Compare { symbols } => format!("compare {}", join(symbols, ", ")),
    }
  }
}

pub(super) fn join(symbols: &[Symbol], separator: &str) -> String {
  symbols
    .iter()
    .map(Symbol::as_str)
    .collect::<Vec<_>>()
    .join(separator)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_hash_is_stable_and_case_insensitive() {
    let a = MarketQueryKey::chart("aapl", ChartPeriod::OneYear, ChartInterval::OneDay).unwrap();
    let b = MarketQueryKey::chart(" AAPL ", ChartPeriod::OneYear, ChartInterval::OneDay).unwrap();
    assert_eq!(a.cache_hash(), b.cache_hash());
    assert_eq!(a.cache_hash().len(), 64);
  }

  #[test]
  fn test_parameters_split_keys() {
    let year = MarketQueryKey::chart("AAPL", ChartPeriod::OneYear, ChartInterval::OneDay).unwrap();
    let month = MarketQueryKey::chart("AAPL", ChartPeriod::OneMonth, ChartInterval::OneDay).unwrap();
    let quote = MarketQueryKey::quote("AAPL").unwrap();
    let profile = MarketQueryKey::profile("AAPL").unwrap();

    assert_ne!(year.cache_hash(), month.cache_hash());
    assert_ne!(quote.cache_hash(), profile.cache_hash());
    assert_ne!(
      MarketQueryKey::Popular.cache_hash(),
      MarketQueryKey::TopMarketCap.cache_hash()
    );
  }

  #[test]
  fn test_search_keys_ignore_case() {
    let a = MarketQueryKey::search("Apple").unwrap();
    let b = MarketQueryKey::search("  apple").unwrap();
    assert_eq!(a, b);
    assert!(MarketQueryKey::search("").is_err());
  }

  #[test]
  fn test_unknown_index_is_rejected() {
    assert_eq!(
      MarketQueryKey::index("ftse"),
      Err(InputError::UnknownIndex("ftse".to_string()))
    );
    assert_eq!(
      MarketQueryKey::index("DOW").unwrap(),
      MarketQueryKey::Index { index: IndexName::Dow }
    );
  }

  #[test]
  fn test_kinds_and_ttls() {
    assert_eq!(MarketQueryKey::Popular.kind(), ResourceKind::Listing);
    assert_eq!(MarketQueryKey::index("nasdaq").unwrap().kind(), ResourceKind::Listing);
    assert_eq!(ResourceKind::Chart.default_ttl(), Duration::from_secs(300));
    assert_eq!(ResourceKind::Profile.default_ttl(), Duration::from_secs(3600));
  }

  #[test]
  fn test_description() {
    let key = MarketQueryKey::chart("msft", ChartPeriod::FiveDays, ChartInterval::OneHour).unwrap();
    assert_eq!(key.description(), "chart MSFT (5d, 1h)");
  }

  #[test]
  fn test_dividend_years_are_bounded() {
    assert_eq!(MarketQueryKey::dividends("AAPL", 0), Err(InputError::DividendYears(0)));
    assert_eq!(MarketQueryKey::dividends("AAPL", 11), Err(InputError::DividendYears(11)));
    let five = MarketQueryKey::dividends("aapl", 5).unwrap();
    let ten = MarketQueryKey::dividends("AAPL", 10).unwrap();
    assert_ne!(five.cache_hash(), ten.cache_hash());
    assert_eq!(five.kind(), ResourceKind::Fundamentals);
    assert_eq!(five.description(), "dividends AAPL (5y)");
  }

  #[test]
  fn test_compare_keys_keep_order() {
    let key = MarketQueryKey::compare("aapl,msft").unwrap();
    assert_eq!(key.description(), "compare AAPL, MSFT");
    assert_eq!(key.kind(), ResourceKind::Quote);
    assert_eq!(key, MarketQueryKey::compare(" AAPL , MSFT ").unwrap());
    assert_ne!(
      key.cache_hash(),
      MarketQueryKey::compare("MSFT,AAPL").unwrap().cache_hash()
    );
    assert!(MarketQueryKey::compare("AAPL").is_err());
  }
}
