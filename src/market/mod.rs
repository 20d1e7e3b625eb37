//! Market data API: request types, payload schemas, transport and the cached
//! client built on the query coordinator.

pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod types;

pub use api_types::{
  ChartSeries, CompanyProfile, DividendData, FinancialData, ListingEntry, MarketData, StockInfo, Suggestion,
};
pub use cache::{MarketQueryKey, ResourceKind};
pub use cached_client::CachedMarketClient;
pub use client::MarketClient;
pub use types::{ChartInterval, ChartPeriod, IndexName, InputError, Symbol, DEFAULT_DIVIDEND_YEARS};
