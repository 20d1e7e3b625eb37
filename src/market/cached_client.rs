//! Cached market client: the typed surface UI callers resolve data through.

use color_eyre::Result;
use std::sync::Arc;

use crate::cache::{CacheStore, QueryKey, Resolution};
use crate::config::{Config, TtlConfig};
use crate::fetch::FetchExecutor;
use crate::query::{QueryCoordinator, ResolveOptions};

use super::api_types::{
  decode_chart, decode_comparison, decode_dividends, decode_financial, decode_listing, decode_profile,
  decode_quote, decode_suggestions, ChartSeries, CompanyProfile, DecodeResult, DividendData, FinancialData,
  ListingEntry, MarketData, StockInfo, Suggestion,
};
use super::cache::MarketQueryKey;
use super::client::MarketClient;
use super::types::{ChartInterval, ChartPeriod, InputError};

/// Market client with freshness-aware caching and single-flight fetches.
///
/// Every method validates its input first; an `InputError` means nothing was
/// sent. Network and payload failures are reported inside the returned
/// [`Resolution`], alongside any last known good payload.
#[derive(Clone)]
pub struct CachedMarketClient {
  inner: MarketClient,
  queries: QueryCoordinator<MarketData>,
  ttl: TtlConfig,
}

impl CachedMarketClient {
  pub fn new(config: &Config) -> Result<Self> {
    let inner = MarketClient::new(config)?;
    let executor = FetchExecutor::new(config.fetch.retry_policy());
    Ok(Self::with_parts(
      inner,
      Arc::new(CacheStore::new()),
      executor,
      config.ttl.clone(),
    ))
  }

  /// Build on an existing store, e.g. one shared with other clients.
  pub fn with_parts(
    inner: MarketClient,
    store: Arc<CacheStore<MarketData>>,
    executor: FetchExecutor,
    ttl: TtlConfig,
  ) -> Self {
    Self {
      inner,
      queries: QueryCoordinator::new(store, executor),
      ttl,
    }
  }

  pub fn coordinator(&self) -> &QueryCoordinator<MarketData> {
    &self.queries
  }

  pub async fn quote(&self, symbol: &str, options: ResolveOptions) -> Result<Resolution<StockInfo>, InputError> {
    let key = MarketQueryKey::quote(symbol)?;
    let resolution = self.resolve_key(&key, options).await?;
    Ok(narrow(resolution, MarketData::into_quote))
  }

  pub async fn chart(
    &self,
    symbol: &str,
    period: ChartPeriod,
    interval: ChartInterval,
    options: ResolveOptions,
  ) -> Result<Resolution<ChartSeries>, InputError> {
    let key = MarketQueryKey::chart(symbol, period, interval)?;
    let resolution = self.resolve_key(&key, options).await?;
    Ok(narrow(resolution, MarketData::into_chart))
  }

  pub async fn search(&self, query: &str, options: ResolveOptions) -> Result<Resolution<Vec<Suggestion>>, InputError> {
    let key = MarketQueryKey::search(query)?;
    let resolution = self.resolve_key(&key, options).await?;
    Ok(narrow(resolution, MarketData::into_suggestions))
  }

  pub async fn popular(&self, options: ResolveOptions) -> Result<Resolution<Vec<ListingEntry>>, InputError> {
    let resolution = self.resolve_key(&MarketQueryKey::Popular, options).await?;
    Ok(narrow(resolution, MarketData::into_listing))
  }

  pub async fn top_market_cap(&self, options: ResolveOptions) -> Result<Resolution<Vec<ListingEntry>>, InputError> {
    let resolution = self.resolve_key(&MarketQueryKey::TopMarketCap, options).await?;
    Ok(narrow(resolution, MarketData::into_listing))
  }

  /// Constituents of `index` (dow, nasdaq, sp500, russell2000).
  pub async fn index(&self, index: &str, options: ResolveOptions) -> Result<Resolution<Vec<ListingEntry>>, InputError> {
    let key = MarketQueryKey::index(index)?;
    let resolution = self.resolve_key(&key, options).await?;
    Ok(narrow(resolution, MarketData::into_listing))
  }

  pub async fn profile(&self, symbol: &str, options: ResolveOptions) -> Result<Resolution<CompanyProfile>, InputError> {
    let key = MarketQueryKey::profile(symbol)?;
    let resolution = self.resolve_key(&key, options).await?;
    Ok(narrow(resolution, MarketData::into_profile))
  }

  pub async fn financial(&self, symbol: &str, options: ResolveOptions) -> Result<Resolution<FinancialData>, InputError> {
    let key = MarketQueryKey::financial(symbol)?;
    let resolution = self.resolve_key(&key, options).await?;
    Ok(narrow(resolution, MarketData::into_financial))
  }

  /// Dividend history over the last `years` (1 to 10).
  pub async fn dividends(
    &self,
    symbol: &str,
    years: u32,
    options: ResolveOptions,
  ) -> Result<Resolution<Vec<DividendData>>, InputError> {
    let key = MarketQueryKey::dividends(symbol, years)?;
    let resolution = self.resolve_key(&key, options).await?;
    Ok(narrow(resolution, MarketData::into_dividends))
  }

  /// Side-by-side quotes for 2 to 5 comma-separated symbols.
  pub async fn compare(&self, symbols: &str, options: ResolveOptions) -> Result<Resolution<Vec<StockInfo>>, InputError> {
    let key = MarketQueryKey::compare(symbols)?;
    let resolution = self.resolve_key(&key, options).await?;
    Ok(narrow(resolution, MarketData::into_comparison))
  }

  /// Resolve any market key with its kind's TTL and decoder.
  pub async fn resolve_key(
    &self,
    key: &MarketQueryKey,
    options: ResolveOptions,
  ) -> Result<Resolution<MarketData>, InputError> {
    let url = self.inner.endpoint(key)?;
    let ttl = self.ttl.for_kind(key.kind());
    Ok(
      self
        .queries
        .resolve(key, ttl, self.inner.get(url), decoder(key), options)
        .await,
    )
  }

  /// Current state of `key` without fetching.
  pub fn snapshot(&self, key: &MarketQueryKey) -> Resolution<MarketData> {
    self.queries.snapshot(key, self.ttl.for_kind(key.kind()))
  }

  pub fn invalidate(&self, key: &MarketQueryKey) {
    self.queries.invalidate(key);
  }

  pub fn is_fresh(&self, key: &MarketQueryKey) -> bool {
    self
      .queries
      .store()
      .is_fresh(&key.cache_hash(), self.ttl.for_kind(key.kind()))
  }
}

fn decoder(key: &MarketQueryKey) -> fn(serde_json::Value) -> DecodeResult {
  match key {
    MarketQueryKey::Quote { .. } => decode_quote,
    MarketQueryKey::Chart { .. } => decode_chart,
    MarketQueryKey::Search { .. } => decode_suggestions,
    MarketQueryKey::Popular | MarketQueryKey::TopMarketCap | MarketQueryKey::Index { .. } => decode_listing,
    MarketQueryKey::Profile { .. } => decode_profile,
    MarketQueryKey::Financial { .. } => decode_financial,
    MarketQueryKey::Dividends { .. } => decode_dividends,
    MarketQueryKey::Compare { .. } => decode_comparison,
  }
}

/// Narrow a shared-store resolution to one payload type.
fn narrow<X>(resolution: Resolution<MarketData>, pick: fn(MarketData) -> Option<X>) -> Resolution<X> {
  let data = resolution.data.and_then(pick);
  Resolution {
    status: resolution.status,
    source: data.as_ref().and(resolution.source),
    data,
    error: resolution.error,
    last_updated: resolution.last_updated,
    dropped: resolution.dropped,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, EntryState};
  use crate::fetch::{FetchError, RetryPolicy};
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  /// Serve `(status, body)` to every request, counting hits.
  async fn serve(status: u16, body: &'static str) -> (String, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
      loop {
        let Ok((mut socket, _)) = listener.accept().await else {
          return;
        };
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
          let mut request = Vec::new();
          let mut buf = [0u8; 1024];
          while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
              Ok(0) | Err(_) => return,
              Ok(n) => request.extend_from_slice(&buf[..n]),
            }
          }
          let response = format!(
            "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
          );
          let _ = socket.write_all(response.as_bytes()).await;
          let _ = socket.shutdown().await;
        });
      }
    });

    (base_url, hits)
  }

  fn client(base_url: &str) -> CachedMarketClient {
    let mut config = Config::default();
    config.api.base_url = base_url.to_string();
    let policy = RetryPolicy::default()
      .with_timeout(Duration::from_secs(5))
      .with_max_retries(0);
    CachedMarketClient::with_parts(
      MarketClient::new(&config).unwrap(),
      Arc::new(CacheStore::new()),
      FetchExecutor::new(policy),
      TtlConfig::default(),
    )
  }

  const QUOTE: &str = r#"{"success":true,"data":{"symbol":"AAPL","name":"Apple Inc.","currentPrice":190.5,"previousClose":188.0,"change":2.5,"changePercent":1.33},"timestamp":"2024-01-01T00:00:00"}"#;

  #[tokio::test]
  async fn test_quote_is_fetched_once_within_ttl() {
    let (base_url, hits) = serve(200, QUOTE).await;
    let client = client(&base_url);

    let first = client.quote("aapl", ResolveOptions::default()).await.unwrap();
    let second = client.quote("AAPL", ResolveOptions::default()).await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(first.source, Some(CacheSource::Network));
    assert_eq!(second.source, Some(CacheSource::CacheFresh));
    let info = second.data.unwrap();
    assert_eq!(info.symbol, "AAPL");
    assert_eq!(info.currency, "USD");
    assert!(client.is_fresh(&MarketQueryKey::quote("AAPL").unwrap()));
  }

  #[tokio::test]
  async fn test_refresh_refetches() {
    let (base_url, hits) = serve(200, QUOTE).await;
    let client = client(&base_url);

    client.quote("AAPL", ResolveOptions::default()).await.unwrap();
    let refreshed = client.quote("AAPL", ResolveOptions::forced()).await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(refreshed.source, Some(CacheSource::Network));
  }

  #[tokio::test]
  async fn test_chart_reports_dropped_points() {
    let body = r#"{"success":true,"data":{"symbol":"AAPL","period":"1y","interval":"1d","data":[{"timestamp":"t1","open":1,"high":2,"low":0.5,"close":1.5,"volume":100},{"timestamp":"t2","open":"bad","high":2,"low":0.5,"close":1.5,"volume":100}]}}"#;
    let (base_url, _) = serve(200, body).await;
    let client = client(&base_url);

    let chart = client
      .chart("AAPL", ChartPeriod::OneYear, ChartInterval::OneDay, ResolveOptions::default())
      .await
      .unwrap();

    assert!(chart.is_ready());
    assert_eq!(chart.dropped, 1);
    assert_eq!(chart.data.unwrap().points.len(), 1);
  }

  #[tokio::test]
  async fn test_unknown_index_never_reaches_network() {
    let (base_url, hits) = serve(200, r#"{"success":true,"data":[]}"#).await;
    let client = client(&base_url);

    let result = client.index("ftse", ResolveOptions::default()).await;

    assert!(matches!(result, Err(InputError::UnknownIndex(_))));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_detail_error_body_is_http_error() {
    let (base_url, _) = serve(404, r#"{"detail":"Stock not found"}"#).await;
    let client = client(&base_url);

    let quote = client.quote("ZZZZ", ResolveOptions::default()).await.unwrap();

    assert_eq!(quote.status, EntryState::Error);
    match quote.error {
      Some(FetchError::Http { status, message, .. }) => {
        assert_eq!(status, 404);
        assert_eq!(message, "Stock not found");
      }
      other => panic!("unexpected error: {other:?}"),
    }
    assert!(quote.data.is_none());
  }

  #[tokio::test]
  async fn test_api_error_envelope() {
    let body = r#"{"success":false,"error":{"code":"RATE_LIMITED","message":"slow down"},"timestamp":"2024-01-01T00:00:00"}"#;
    let (base_url, _) = serve(200, body).await;
    let client = client(&base_url);

    let listing = client.popular(ResolveOptions::default()).await.unwrap();

    assert_eq!(
      listing.error,
      Some(FetchError::Api {
        code: "RATE_LIMITED".to_string(),
        message: "slow down".to_string(),
      })
    );
  }

  #[tokio::test]
  async fn test_snapshot_before_and_after() {
    let (base_url, _) = serve(200, r#"{"success":true,"data":[]}"#).await;
    let client = client(&base_url);
    let key = MarketQueryKey::TopMarketCap;

    assert_eq!(client.snapshot(&key).status, EntryState::Idle);
    let top = client.top_market_cap(ResolveOptions::default()).await.unwrap();
    assert_eq!(top.data, Some(Vec::new()));

    let snapshot = client.snapshot(&key);
    assert_eq!(snapshot.status, EntryState::Ready);
    assert_eq!(snapshot.source, Some(CacheSource::CacheFresh));
    assert!(snapshot.data.is_some_and(|data| data.is_empty()));

    client.invalidate(&key);
    assert!(!client.is_fresh(&key));
  }

  #[tokio::test]
  async fn test_compare_returns_quotes() {
    let body = r#"{"success":true,"data":[{"symbol":"AAPL","name":"Apple Inc.","currentPrice":190.5,"previousClose":188.0,"change":2.5,"changePercent":1.33},{"symbol":"MSFT","name":"Microsoft","currentPrice":410.0,"previousClose":405.0,"change":5.0,"changePercent":1.2}]}"#;
    let (base_url, hits) = serve(200, body).await;
    let client = client(&base_url);

    let compared = client.compare("aapl,msft", ResolveOptions::default()).await.unwrap();
    client.compare("AAPL, MSFT", ResolveOptions::default()).await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    let quotes = compared.data.unwrap();
    assert_eq!(quotes.len(), 2);
    assert_eq!(quotes[1].symbol, "MSFT");
  }

  #[tokio::test]
  async fn test_compare_and_dividend_bounds_never_reach_network() {
    let (base_url, hits) = serve(200, r#"{"success":true,"data":[]}"#).await;
    let client = client(&base_url);

    let single = client.compare("AAPL", ResolveOptions::default()).await;
    let too_long = client.dividends("KO", 11, ResolveOptions::default()).await;

    assert!(matches!(single, Err(InputError::CompareCount(1))));
    assert!(matches!(too_long, Err(InputError::DividendYears(11))));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_dividends_and_financial() {
    let body = r#"{"success":true,"data":[{"symbol":"KO","date":"2024-03-14","amount":0.485,"type":"cash"}]}"#;
    let (dividends_url, _) = serve(200, body).await;
    let (financial_url, _) = serve(404, r#"{"detail":"Financial data not found"}"#).await;

    let dividends = client(&dividends_url)
      .dividends("ko", 5, ResolveOptions::default())
      .await
      .unwrap();
    assert!(dividends.is_ready());
    assert_eq!(dividends.data.unwrap()[0].amount, 0.485);

    let financial = client(&financial_url)
      .financial("KO", ResolveOptions::default())
      .await
      .unwrap();
    assert!(financial.is_error());
    assert_eq!(financial.error.as_ref().and_then(FetchError::status), Some(404));
  }
}
