use thiserror::Error;

/// Failure reported by the transport before an HTTP status is available.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
  /// The transport gave up waiting for a response
  #[error("request timed out")]
  Timeout,

  /// Connection-level failure (DNS, refused, reset, TLS)
  #[error("connection failed: {0}")]
  Connect(String),
}

/// Classified failure of one logical fetch.
///
/// Cloneable so a single in-flight result can be handed to every caller
/// that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// Every attempt timed out
  #[error("request timed out after {attempts} attempt(s)")]
  Timeout { attempts: u32 },

  /// Every attempt failed at the connection level
  #[error("network error after {attempts} attempt(s): {message}")]
  Network { attempts: u32, message: String },

  /// Non-2xx response
  #[error("HTTP {status}: {message}")]
  Http {
    status: u16,
    code: Option<String>,
    message: String,
  },

  /// The body did not match the response envelope or the expected payload shape
  #[error("invalid response envelope: {0}")]
  InvalidEnvelope(String),

  /// 2xx response carrying `success: false`
  #[error("API error {code}: {message}")]
  Api { code: String, message: String },

  /// The fetch task ended without producing a result
  #[error("fetch abandoned before completion")]
  Abandoned,
}

impl FetchError {
  /// Whether the retry loop may try again after this failure.
  pub fn is_transient(&self) -> bool {
    matches!(self, FetchError::Timeout { .. } | FetchError::Network { .. })
  }

  /// HTTP status for `Http` failures.
  pub fn status(&self) -> Option<u16> {
    match self {
      FetchError::Http { status, .. } => Some(*status),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transient_classification() {
    assert!(FetchError::Timeout { attempts: 1 }.is_transient());
    assert!(FetchError::Network {
      attempts: 2,
      message: "refused".to_string()
    }
    .is_transient());
    assert!(!FetchError::InvalidEnvelope("x".to_string()).is_transient());
    assert!(!FetchError::Http {
      status: 503,
      code: None,
      message: "unavailable".to_string()
    }
    .is_transient());
  }

  #[test]
  fn test_display_includes_status() {
    let err = FetchError::Http {
      status: 404,
      code: Some("NOT_FOUND".to_string()),
      message: "Chart data not found".to_string(),
    };
    assert_eq!(err.to_string(), "HTTP 404: Chart data not found");
    assert_eq!(err.status(), Some(404));
  }
}
