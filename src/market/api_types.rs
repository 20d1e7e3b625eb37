//! Serde-deserializable types matching the market data API payloads.
//!
//! Each `decode_*` function is the boundary schema check for one endpoint: it
//! receives the envelope's `data` field and either yields the typed payload
//! (with a count of records dropped along the way) or an `InvalidEnvelope`
//! error when the top-level shape is wrong.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::fetch::FetchError;
use crate::validate::{self, Decoded, TimeSeriesPoint};

fn default_currency() -> String {
  "USD".to_string()
}

/// Accept `null` wherever a defaulted field is expected.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: Default + Deserialize<'de>,
{
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn schema_error(what: &str, err: impl std::fmt::Display) -> FetchError {
  FetchError::InvalidEnvelope(format!("{what}: {err}"))
}

// ============================================================================
// Quote snapshot
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockInfo {
  pub symbol: String,
  pub name: String,
  pub current_price: f64,
  pub previous_close: f64,
  pub change: f64,
  pub change_percent: f64,
  pub high: Option<f64>,
  pub low: Option<f64>,
  pub volume: Option<u64>,
  pub market_cap: Option<f64>,
  pub pe_ratio: Option<f64>,
  pub dividend_yield: Option<f64>,
  pub beta: Option<f64>,
  pub fifty_two_week_high: Option<f64>,
  pub fifty_two_week_low: Option<f64>,
  pub avg_volume: Option<u64>,
  #[serde(default = "default_currency")]
  pub currency: String,
  pub exchange: Option<String>,
  pub sector: Option<String>,
  pub industry: Option<String>,
}

// ============================================================================
// Chart
// ============================================================================

/// A validated price series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
  pub symbol: String,
  pub period: String,
  pub interval: String,
  pub points: Vec<TimeSeriesPoint>,
}

#[derive(Debug, Deserialize)]
struct ApiChartResponse {
  #[serde(default)]
  symbol: String,
  #[serde(default)]
  period: String,
  #[serde(default)]
  interval: String,
  data: Vec<Value>,
}

// ============================================================================
// Search
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
  pub symbol: String,
  pub name: String,
  pub exchange: String,
  #[serde(rename = "type")]
  pub kind: String,
  pub country: String,
}

#[derive(Debug, Deserialize)]
struct ApiSearchResponse {
  suggestions: Vec<Value>,
}

// ============================================================================
// Listings (popular, top market cap, index constituents)
// ============================================================================

/// One row of a stock listing.
///
/// Popular stocks arrive as full quote snapshots (`currentPrice`); the ranked
/// listings use `price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingEntry {
  pub symbol: String,
  pub name: String,
  #[serde(alias = "currentPrice")]
  pub price: f64,
  pub change: f64,
  pub change_percent: f64,
  pub market_cap: Option<f64>,
  pub volume: Option<u64>,
}

// ============================================================================
// Company profile
// ============================================================================

/// Company description and valuation figures; the API fills gaps with empty
/// strings and zeros, so every field is defaulted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyProfile {
  #[serde(default, deserialize_with = "null_as_default")]
  pub symbol: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub name: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub short_name: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub sector: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub industry: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub country: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub website: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub description: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub original_description: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub employees: u64,
  #[serde(default, deserialize_with = "null_as_default")]
  pub ceo: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub headquarters: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub market_cap: f64,
  #[serde(default, deserialize_with = "null_as_default")]
  pub enterprise_value: f64,
  #[serde(default, deserialize_with = "null_as_default")]
  pub revenue: f64,
  #[serde(default, deserialize_with = "null_as_default")]
  pub profit_margin: f64,
  #[serde(default, deserialize_with = "null_as_default")]
  pub operating_margin: f64,
  #[serde(default, deserialize_with = "null_as_default")]
  pub return_on_equity: f64,
  #[serde(default, deserialize_with = "null_as_default")]
  pub return_on_assets: f64,
  #[serde(default, deserialize_with = "null_as_default")]
  pub debt_to_equity: f64,
  #[serde(default, deserialize_with = "null_as_default")]
  pub current_ratio: f64,
  #[serde(default, deserialize_with = "null_as_default")]
  pub quick_ratio: f64,
  #[serde(default, deserialize_with = "null_as_default")]
  pub price_to_book: f64,
  #[serde(default, deserialize_with = "null_as_default")]
  pub price_to_sales: f64,
}

// ============================================================================
// Fundamentals
// ============================================================================

/// Headline statement figures; anything the provider lacks is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialData {
  pub symbol: String,
  pub period: String,
  pub revenue: Option<f64>,
  pub net_income: Option<f64>,
  pub operating_income: Option<f64>,
  pub total_assets: Option<f64>,
  pub total_liabilities: Option<f64>,
  pub cash_flow: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DividendData {
  pub symbol: String,
  pub date: String,
  pub amount: f64,
  #[serde(rename = "type")]
  pub kind: String,
}

// ============================================================================
// Shared payload
// ============================================================================

/// Every payload the market store holds, so one store serves all resources.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketData {
  Quote(StockInfo),
  Chart(ChartSeries),
  Suggestions(Vec<Suggestion>),
  Listing(Vec<ListingEntry>),
  Profile(CompanyProfile),
  Financial(FinancialData),
  Dividends(Vec<DividendData>),
  /// Quotes for a comparison, in request order
  Comparison(Vec<StockInfo>),
}

impl MarketData {
  pub fn into_quote(self) -> Option<StockInfo> {
    match self {
      Self::Quote(info) => Some(info),
      _ => None,
    }
  }

  pub fn into_chart(self) -> Option<ChartSeries> {
    match self {
      Self::Chart(series) => Some(series),
      _ => None,
    }
  }

  pub fn into_suggestions(self) -> Option<Vec<Suggestion>> {
    match self {
      Self::Suggestions(suggestions) => Some(suggestions),
      _ => None,
    }
  }

  pub fn into_listing(self) -> Option<Vec<ListingEntry>> {
    match self {
      Self::Listing(entries) => Some(entries),
      _ => None,
    }
  }

  pub fn into_profile(self) -> Option<CompanyProfile> {
    match self {
      Self::Profile(profile) => Some(profile),
      _ => None,
    }
  }

  pub fn into_financial(self) -> Option<FinancialData> {
    match self {
      Self::Financial(data) => Some(data),
      _ => None,
    }
  }

  pub fn into_dividends(self) -> Option<Vec<DividendData>> {
    match self {
      Self::Dividends(dividends) => Some(dividends),
      _ => None,
    }
  }

  pub fn into_comparison(self) -> Option<Vec<StockInfo>> {
    match self {
      Self::Comparison(quotes) => Some(quotes),
      _ => None,
    }
  }

  /// Whether the payload holds no records (a validated but empty series).
  pub fn is_empty(&self) -> bool {
    match self {
      Self::Chart(series) => series.points.is_empty(),
      Self::Suggestions(suggestions) => suggestions.is_empty(),
      Self::Listing(entries) => entries.is_empty(),
      Self::Dividends(dividends) => dividends.is_empty(),
      Self::Comparison(quotes) => quotes.is_empty(),
      Self::Quote(_) | Self::Profile(_) | Self::Financial(_) => false,
    }
  }
}

// ============================================================================
// Decoders
// ============================================================================

pub type DecodeResult = Result<Decoded<MarketData>, FetchError>;

pub fn decode_quote(data: Value) -> DecodeResult {
  let info: StockInfo = serde_json::from_value(data).map_err(|e| schema_error("quote", e))?;
  Ok(Decoded::clean(MarketData::Quote(info)))
}

pub fn decode_chart(data: Value) -> DecodeResult {
  let raw: ApiChartResponse = serde_json::from_value(data).map_err(|e| schema_error("chart", e))?;
  Ok(Decoded::from(validate::filter(&raw.data)).map(|points| {
    MarketData::Chart(ChartSeries {
      symbol: raw.symbol,
      period: raw.period,
      interval: raw.interval,
      points,
    })
  }))
}

pub fn decode_suggestions(data: Value) -> DecodeResult {
  let raw: ApiSearchResponse = serde_json::from_value(data).map_err(|e| schema_error("search", e))?;
  let filtered = validate::filter_records::<Suggestion>(&raw.suggestions);
  Ok(Decoded::from(filtered).map(MarketData::Suggestions))
}

/// Element-wise decode of a top-level array, dropping records that don't fit.
fn decode_records<T: serde::de::DeserializeOwned>(what: &str, data: Value) -> Result<Decoded<Vec<T>>, FetchError> {
  let Value::Array(records) = data else {
    return Err(schema_error(what, "expected an array"));
  };
  Ok(validate::filter_records::<T>(&records).into())
}

pub fn decode_listing(data: Value) -> DecodeResult {
  Ok(decode_records::<ListingEntry>("listing", data)?.map(MarketData::Listing))
}

pub fn decode_profile(data: Value) -> DecodeResult {
  if !data.is_object() {
    return Err(schema_error("profile", "expected an object"));
  }
  let profile: CompanyProfile =
    serde_json::from_value(data).map_err(|e| schema_error("profile", e))?;
  Ok(Decoded::clean(MarketData::Profile(profile)))
}

pub fn decode_financial(data: Value) -> DecodeResult {
  let financial: FinancialData =
    serde_json::from_value(data).map_err(|e| schema_error("financial", e))?;
  Ok(Decoded::clean(MarketData::Financial(financial)))
}

pub fn decode_dividends(data: Value) -> DecodeResult {
  Ok(decode_records::<DividendData>("dividends", data)?.map(MarketData::Dividends))
}

pub fn decode_comparison(data: Value) -> DecodeResult {
  Ok(decode_records::<StockInfo>("comparison", data)?.map(MarketData::Comparison))
}
