use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use url::Url;

use crate::config::Config;
use crate::fetch::{RawResponse, TransportError};

use super::cache::{join, MarketQueryKey};
use super::types::InputError;

/// One GET attempt, as handed to the retry loop.
pub type FetchFuture = BoxFuture<'static, Result<RawResponse, TransportError>>;

/// HTTP transport for the market data API.
///
/// Issues exactly one request per call and reports the raw status and body;
/// timeouts, retries and envelope parsing happen above it.
#[derive(Clone)]
pub struct MarketClient {
  http: reqwest::Client,
  base_url: Url,
}

impl MarketClient {
  pub fn new(config: &Config) -> Result<Self> {
    let base_url = config.base_url()?;
    let http = reqwest::Client::builder()
      .user_agent(concat!("marketdash/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base_url })
  }

  /// Request URL for `key` under `/api/v1/stock`.
  pub fn endpoint(&self, key: &MarketQueryKey) -> Result<Url, InputError> {
    let mut url = self.base_url.clone();
    {
      let mut segments = url
        .path_segments_mut()
        .map_err(|_| InputError::InvalidBaseUrl(self.base_url.to_string()))?;
      segments.pop_if_empty().extend(["api", "v1", "stock"]);
      match key {
        MarketQueryKey::Quote { symbol } => {
          segments.extend([symbol.as_str(), "info"]);
        }
        MarketQueryKey::Chart { symbol, .. } => {
          segments.extend([symbol.as_str(), "chart"]);
        }
        MarketQueryKey::Search { .. } => {
          segments.push("search");
        }
        MarketQueryKey::Popular => {
          segments.push("popular");
        }
        MarketQueryKey::TopMarketCap => {
          segments.push("top-market-cap");
        }
        MarketQueryKey::Index { index } => {
          segments.extend(["index", index.as_str(), "stocks"]);
        }
        MarketQueryKey::Profile { symbol } => {
          segments.extend([symbol.as_str(), "description"]);
        }
        MarketQueryKey::Financial { symbol } => {
          segments.extend([symbol.as_str(), "financial"]);
        }
        MarketQueryKey::Dividends { symbol, .. } => {
          segments.extend([symbol.as_str(), "dividends"]);
        }
        MarketQueryKey::Compare { .. } => {
          segments.push("compare");
        }
      }
    }

    match key {
      MarketQueryKey::Chart {
        period, interval, ..
      } => {
        url
          .query_pairs_mut()
          .append_pair("period", period.as_str())
          .append_pair("interval", interval.as_str());
      }
      MarketQueryKey::Search { query } => {
        url.query_pairs_mut().append_pair("query", query);
      }
      MarketQueryKey::Dividends { years, .. } => {
        url.query_pairs_mut().append_pair("years", &years.to_string());
      }
      MarketQueryKey::Compare { symbols } => {
        url.query_pairs_mut().append_pair("symbols", &join(symbols, ","));
      }
      _ => {}
    }

    Ok(url)
  }

  /// A re-invocable GET of `url` for the retry loop.
  pub fn get(&self, url: Url) -> impl FnMut() -> FetchFuture + Send + 'static {
    let http = self.http.clone();
    move || {
      let request = http.get(url.clone());
      async move {
        let response = request.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;
        Ok(RawResponse::new(status, body))
      }
      .boxed()
    }
  }
}

fn classify(error: reqwest::Error) -> TransportError {
  if error.is_timeout() {
    TransportError::Timeout
  } else {
    TransportError::Connect(error.to_string())
  }
}
