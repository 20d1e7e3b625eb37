//! Parsing of the API response envelope.
//!
//! Every endpoint answers with
//! `{ success: true, data, message?, timestamp }` or
//! `{ success: false, error: { code, message, details? }, timestamp }`.
//! Framework-level failures may instead carry `{ detail }`.

use serde::Deserialize;
use serde_json::Value;

use super::error::FetchError;

/// Error object inside a failed envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
  pub code: String,
  pub message: String,
  #[serde(default)]
  pub details: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
  success: bool,
  #[serde(default)]
  data: Option<Value>,
  #[serde(default)]
  message: Option<String>,
  #[serde(default)]
  error: Option<ApiErrorBody>,
  #[serde(default)]
  timestamp: Option<String>,
}

/// A successful envelope with its payload still untyped.
#[derive(Debug, Clone)]
pub struct Envelope {
  pub data: Value,
  pub message: Option<String>,
  pub timestamp: Option<String>,
}

impl Envelope {
  /// Parse the body of a 2xx response.
  pub fn parse(body: &str) -> Result<Self, FetchError> {
    let raw: RawEnvelope = serde_json::from_str(body)
      .map_err(|e| FetchError::InvalidEnvelope(format!("malformed body: {}", e)))?;

    if !raw.success {
      return Err(match raw.error {
        Some(error) => FetchError::Api {
          code: error.code,
          message: error.message,
        },
        None => FetchError::InvalidEnvelope("success=false without an error object".to_string()),
      });
    }

    let data = raw
      .data
      .ok_or_else(|| FetchError::InvalidEnvelope("success=true without data".to_string()))?;

    Ok(Self {
      data,
      message: raw.message,
      timestamp: raw.timestamp,
    })
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
  Envelope { error: ApiErrorBody },
  Detail { detail: Value },
}

/// Build the `Http` error for a non-2xx response, keeping whatever message
/// the body carries.
pub fn http_error(status: u16, body: &str) -> FetchError {
  let (code, message) = match serde_json::from_str::<ErrorBody>(body) {
    Ok(ErrorBody::Envelope { error }) => (Some(error.code), error.message),
    Ok(ErrorBody::Detail { detail }) => match detail {
      Value::String(s) => (None, s),
      other => (None, other.to_string()),
    },
    Err(_) => (None, canonical_reason(status)),
  };

  FetchError::Http {
    status,
    code,
    message,
  }
}

fn canonical_reason(status: u16) -> String {
  reqwest::StatusCode::from_u16(status)
    .ok()
    .and_then(|s| s.canonical_reason())
    .unwrap_or("unexpected status")
    .to_string()
}
