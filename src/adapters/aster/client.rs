//! Aster HTTP Client - Rate-limited REST API Client
//!
//! Wraps reqwest with a token-bucket rate limiter, retries for
//! idempotent reads, query signing, and classification of venue
//! failures into `AdapterError` for every Aster REST interaction.

use std::num::NonZeroU32;
use std::time::Duration;

use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, Method, StatusCode, Url};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::auth::{AsterAuth, API_KEY_HEADER};
use super::types::{
  ApiErrorBody, BookTicker, ExchangeInfo, ListenKey, OrderResponse, PositionRisk,
};
use crate::config::VenueConfig;
use crate::domain::order::Side;
use crate::ports::exchange::AdapterError;

/// Venue error codes, Binance-compatible numbering.
mod codes {
  pub const UNAUTHORIZED: i64 = -1002;
  pub const TOO_MANY_REQUESTS: i64 = -1003;
  pub const DISCONNECTED: i64 = -1001;
  pub const TIMEOUT: i64 = -1007;
  pub const INVALID_TIMESTAMP: i64 = -1021;
  pub const INVALID_SIGNATURE: i64 = -1022;
  pub const BAD_PRECISION: i64 = -1111;
  pub const BAD_SYMBOL: i64 = -1121;
  pub const CANCEL_REJECTED: i64 = -2011;
  pub const NO_SUCH_ORDER: i64 = -2013;
  pub const BAD_API_KEY_FMT: i64 = -2014;
  pub const REJECTED_MBX_KEY: i64 = -2015;
  pub const INVALID_TICK: i64 = -4014;
}

/// Configuration for the Aster HTTP client.
#[derive(Debug, Clone)]
pub struct AsterClientConfig {
  /// REST base URL.
  pub base_url: String,
  /// Request timeout.
  pub timeout: Duration,
  /// Signed request validity window (ms).
  pub recv_window_ms: u64,
  /// Client-side request budget.
  pub max_requests_per_second: u32,
  /// Maximum retries on transient errors (reads only).
  pub max_retries: u32,
  /// Base delay between retries (exponential backoff).
  pub retry_base_delay: Duration,
}

impl Default for AsterClientConfig {
  fn default() -> Self {
    Self {
      base_url: "https://fapi.asterdex.com".to_string(),
      timeout: Duration::from_secs(10),
      recv_window_ms: 5_000,
      max_requests_per_second: 10,
      max_retries: 3,
      retry_base_delay: Duration::from_millis(200),
    }
  }
}

impl AsterClientConfig {
  pub fn from_venue(venue: &VenueConfig) -> Self {
    Self {
      base_url: venue.rest_url.trim_end_matches('/').to_string(),
      timeout: Duration::from_secs(venue.timeout_seconds),
      recv_window_ms: venue.recv_window_ms,
      max_requests_per_second: venue.max_requests_per_second,
      ..Self::default()
    }
  }
}

/// Failure of one REST call.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
  /// Venue answered with a structured error body.
  #[error("venue error {code} (HTTP {status}): {msg}")]
  Venue { status: u16, code: i64, msg: String },
  /// Transport or classification already decided.
  #[error(transparent)]
  Adapter(#[from] AdapterError),
}

impl ApiError {
  /// The referenced order does not exist on the venue.
  pub const fn is_unknown_order(&self) -> bool {
    matches!(
      self,
      Self::Venue {
        code: codes::CANCEL_REJECTED | codes::NO_SUCH_ORDER,
        ..
      }
    )
  }

  /// Map to the port's error classes.
  pub fn to_adapter(&self) -> AdapterError {
    match self {
      Self::Adapter(e) => e.clone(),
      Self::Venue { code, msg, .. } => {
        let detail = format!("{code}: {msg}");
        match *code {
          codes::UNAUTHORIZED
          | codes::INVALID_SIGNATURE
          | codes::BAD_API_KEY_FMT
          | codes::REJECTED_MBX_KEY => AdapterError::Auth(detail),
          codes::BAD_SYMBOL | codes::BAD_PRECISION | codes::INVALID_TICK => {
            AdapterError::Config(detail)
          }
          codes::DISCONNECTED | codes::TIMEOUT | codes::INVALID_TIMESTAMP => {
            AdapterError::Transient(detail)
          }
          codes::TOO_MANY_REQUESTS => AdapterError::RateLimited(detail),
          _ => AdapterError::Rejected(detail),
        }
      }
    }
  }

  fn is_retryable(&self) -> bool {
    matches!(
      self.to_adapter(),
      AdapterError::Transient(_) | AdapterError::RateLimited(_)
    )
  }
}

impl From<ApiError> for AdapterError {
  fn from(e: ApiError) -> Self {
    e.to_adapter()
  }
}

/// Rate-limited HTTP client for the Aster futures REST API.
///
/// Built without credentials it can only reach public endpoints.
pub struct AsterClient {
  http: Client,
  auth: Option<AsterAuth>,
  config: AsterClientConfig,
  limiter: DefaultDirectRateLimiter,
}

impl AsterClient {
  /// Create a new client.
  ///
  /// # Errors
  /// Returns `AdapterError::Config` if the HTTP client cannot be built
  /// or the base URL does not parse.
  pub fn new(auth: Option<AsterAuth>, config: AsterClientConfig) -> Result<Self, AdapterError> {
    Url::parse(&config.base_url)
      .map_err(|e| AdapterError::Config(format!("invalid rest_url {}: {e}", config.base_url)))?;

    let http = Client::builder()
      .timeout(config.timeout)
      .pool_max_idle_per_host(5)
      .build()
      .map_err(|e| AdapterError::Config(format!("failed to build HTTP client: {e}")))?;

    let per_second = NonZeroU32::new(config.max_requests_per_second).unwrap_or(NonZeroU32::MIN);
    let limiter = RateLimiter::direct(Quota::per_second(per_second));

    Ok(Self {
      http,
      auth,
      config,
      limiter,
    })
  }

  /// Whether private endpoints are reachable.
  pub const fn has_credentials(&self) -> bool {
    self.auth.is_some()
  }

  // ── Public endpoints ──────────────────────────────────────

  pub async fn book_ticker(&self, symbol: &str) -> Result<BookTicker, ApiError> {
    self
      .request(Method::GET, "/fapi/v1/ticker/bookTicker", &[("symbol", symbol.to_string())], false)
      .await
  }

  pub async fn exchange_info(&self) -> Result<ExchangeInfo, ApiError> {
    self.request(Method::GET, "/fapi/v1/exchangeInfo", &[], false).await
  }

  // ── Signed endpoints ──────────────────────────────────────

  /// Post-only (GTX) limit order.
  pub async fn place_limit_order(
    &self,
    symbol: &str,
    side: Side,
    quantity: Decimal,
    price: Decimal,
    client_order_id: &str,
  ) -> Result<OrderResponse, ApiError> {
    let params = [
      ("symbol", symbol.to_string()),
      ("side", side.as_venue_str().to_string()),
      ("type", "LIMIT".to_string()),
      ("quantity", quantity.normalize().to_string()),
      ("price", price.normalize().to_string()),
      ("timeInForce", "GTX".to_string()),
      ("newClientOrderId", client_order_id.to_string()),
    ];
    self.request(Method::POST, "/fapi/v1/order", &params, true).await
  }

  pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<OrderResponse, ApiError> {
    let params = [("symbol", symbol.to_string()), ("orderId", order_id.to_string())];
    self.request(Method::DELETE, "/fapi/v1/order", &params, true).await
  }

  pub async fn query_order(&self, symbol: &str, order_id: &str) -> Result<OrderResponse, ApiError> {
    let params = [("symbol", symbol.to_string()), ("orderId", order_id.to_string())];
    self.request(Method::GET, "/fapi/v1/order", &params, true).await
  }

  pub async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderResponse>, ApiError> {
    self
      .request(Method::GET, "/fapi/v1/openOrders", &[("symbol", symbol.to_string())], true)
      .await
  }

  pub async fn position_risk(&self, symbol: &str) -> Result<Vec<PositionRisk>, ApiError> {
    self
      .request(Method::GET, "/fapi/v2/positionRisk", &[("symbol", symbol.to_string())], true)
      .await
  }

  pub async fn create_listen_key(&self) -> Result<ListenKey, ApiError> {
    self.request(Method::POST, "/fapi/v1/listenKey", &[], true).await
  }

  pub async fn keepalive_listen_key(&self) -> Result<(), ApiError> {
    self
      .request::<serde_json::Value>(Method::PUT, "/fapi/v1/listenKey", &[], true)
      .await
      .map(|_| ())
  }

  pub async fn close_listen_key(&self) -> Result<(), ApiError> {
    self
      .request::<serde_json::Value>(Method::DELETE, "/fapi/v1/listenKey", &[], true)
      .await
      .map(|_| ())
  }

  // ── Transport ─────────────────────────────────────────────

  /// Execute a request with rate limiting, signing, and retries.
  ///
  /// Only GET is retried; a retried write could duplicate an order.
  async fn request<T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    params: &[(&str, String)],
    signed: bool,
  ) -> Result<T, ApiError> {
    let retries = if method == Method::GET {
      self.config.max_retries
    } else {
      0
    };

    let mut last_error = None;

    for attempt in 0..=retries {
      if attempt > 0 {
        let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
        debug!(attempt, path, delay_ms = delay.as_millis(), "Retrying request");
        sleep(delay).await;
      }

      self.limiter.until_ready().await;

      match self.send_once(method.clone(), path, params, signed).await {
        Ok(body) => {
          return serde_json::from_str(&body).map_err(|e| {
            ApiError::Adapter(AdapterError::Transient(format!("decode {path}: {e}")))
          });
        }
        Err(e) if e.is_retryable() && attempt < retries => {
          warn!(error = %e, attempt, path, "Request failed, will retry");
          last_error = Some(e);
        }
        Err(e) => return Err(e),
      }
    }

    Err(last_error.unwrap_or_else(|| {
      ApiError::Adapter(AdapterError::Transient("max retries exceeded".to_string()))
    }))
  }

  async fn send_once(
    &self,
    method: Method,
    path: &str,
    params: &[(&str, String)],
    signed: bool,
  ) -> Result<String, ApiError> {
    let url = self.build_url(path, params, signed)?;

    let mut req = self.http.request(method, url);
    if let Some(auth) = &self.auth {
      req = req.header(API_KEY_HEADER, auth.api_key());
    }

    let response = req.send().await.map_err(|e| ApiError::Adapter(transport_error(&e)))?;
    let status = response.status();
    let body = response
      .text()
      .await
      .map_err(|e| ApiError::Adapter(transport_error(&e)))?;

    if status.is_success() {
      Ok(body)
    } else {
      Err(classify_failure(status, &body))
    }
  }

  /// Encode `params`, and for signed calls append recvWindow,
  /// timestamp and the signature over the resulting query.
  fn build_url(&self, path: &str, params: &[(&str, String)], signed: bool) -> Result<Url, ApiError> {
    let mut url = Url::parse(&format!("{}{}", self.config.base_url, path))
      .map_err(|e| ApiError::Adapter(AdapterError::Config(format!("invalid url for {path}: {e}"))))?;

    if params.is_empty() && !signed {
      return Ok(url);
    }

    {
      let mut pairs = url.query_pairs_mut();
      for (k, v) in params {
        pairs.append_pair(k, v);
      }
      if signed {
        pairs.append_pair("recvWindow", &self.config.recv_window_ms.to_string());
        pairs.append_pair("timestamp", &Utc::now().timestamp_millis().to_string());
      }
    }

    if signed {
      let auth = self
        .auth
        .as_ref()
        .ok_or_else(|| ApiError::Adapter(AdapterError::Config("missing Aster credentials".to_string())))?;
      let query = url.query().unwrap_or_default().to_string();
      url.set_query(Some(&auth.signed_query(&query)));
    }

    Ok(url)
  }
}

fn transport_error(e: &reqwest::Error) -> AdapterError {
  if e.is_builder() {
    AdapterError::Config(e.to_string())
  } else {
    AdapterError::Transient(e.to_string())
  }
}

/// Classify a non-2xx response.
fn classify_failure(status: StatusCode, body: &str) -> ApiError {
  let parsed = serde_json::from_str::<ApiErrorBody>(body).ok();

  match status {
    StatusCode::TOO_MANY_REQUESTS | StatusCode::IM_A_TEAPOT => {
      ApiError::Adapter(AdapterError::RateLimited(format!("HTTP {status}")))
    }
    s if s.is_server_error() => ApiError::Adapter(AdapterError::Transient(format!("HTTP {s}: {body}"))),
    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
      ApiError::Adapter(AdapterError::Auth(format!("HTTP {status}: {body}")))
    }
    s => match parsed {
      Some(b) => ApiError::Venue {
        status: s.as_u16(),
        code: b.code,
        msg: b.msg,
      },
      None => ApiError::Adapter(AdapterError::Rejected(format!("HTTP {s}: {body}"))),
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(auth: Option<AsterAuth>) -> AsterClient {
    AsterClient::new(auth, AsterClientConfig::default()).unwrap()
  }

  #[test]
  fn test_classify_rate_limit_and_server_errors() {
    let e = classify_failure(StatusCode::TOO_MANY_REQUESTS, "");
    assert!(matches!(e.to_adapter(), AdapterError::RateLimited(_)));
    let e = classify_failure(StatusCode::IM_A_TEAPOT, "");
    assert!(matches!(e.to_adapter(), AdapterError::RateLimited(_)));
    let e = classify_failure(StatusCode::BAD_GATEWAY, "<html>");
    assert!(matches!(e.to_adapter(), AdapterError::Transient(_)));
    assert!(e.is_retryable());
  }

  #[test]
  fn test_classify_auth_failures_are_fatal() {
    let e = classify_failure(StatusCode::UNAUTHORIZED, "");
    assert!(e.to_adapter().is_fatal());
    let e = classify_failure(
      StatusCode::BAD_REQUEST,
      r#"{"code":-1022,"msg":"Signature for this request is not valid."}"#,
    );
    assert!(matches!(e.to_adapter(), AdapterError::Auth(_)));
    assert!(!e.is_retryable());
  }

  #[test]
  fn test_classify_unknown_order() {
    let e = classify_failure(StatusCode::BAD_REQUEST, r#"{"code":-2013,"msg":"Order does not exist."}"#);
    assert!(e.is_unknown_order());
    let e = classify_failure(StatusCode::BAD_REQUEST, r#"{"code":-2011,"msg":"Unknown order sent."}"#);
    assert!(e.is_unknown_order());
  }

  #[test]
  fn test_classify_order_rejection() {
    let e = classify_failure(
      StatusCode::BAD_REQUEST,
      r#"{"code":-5022,"msg":"Due to the order could not be executed as maker, the Post Only order will be rejected."}"#,
    );
    assert!(matches!(e.to_adapter(), AdapterError::Rejected(_)));
    assert!(!e.is_unknown_order());
  }

  #[test]
  fn test_classify_bad_symbol_is_config() {
    let e = classify_failure(StatusCode::BAD_REQUEST, r#"{"code":-1121,"msg":"Invalid symbol."}"#);
    assert!(matches!(e.to_adapter(), AdapterError::Config(_)));
  }

  #[test]
  fn test_signed_url_carries_window_timestamp_signature() {
    let c = client(Some(AsterAuth::new("key", "secret")));
    let url = c
      .build_url("/fapi/v1/openOrders", &[("symbol", "ETHUSDT".to_string())], true)
      .unwrap();
    let query = url.query().unwrap();
    assert!(query.starts_with("symbol=ETHUSDT&recvWindow=5000&timestamp="));
    assert!(query.contains("&signature="));
  }

  #[test]
  fn test_signed_url_without_credentials_is_config_error() {
    let c = client(None);
    let err = c.build_url("/fapi/v1/openOrders", &[], true).unwrap_err();
    assert!(err.to_adapter().is_fatal());
    assert!(!c.has_credentials());
  }

  #[test]
  fn test_public_url_is_unsigned() {
    let c = client(None);
    let url = c
      .build_url("/fapi/v1/ticker/bookTicker", &[("symbol", "ETHUSDT".to_string())], false)
      .unwrap();
    assert_eq!(url.as_str(), "https://fapi.asterdex.com/fapi/v1/ticker/bookTicker?symbol=ETHUSDT");
  }

  #[test]
  fn test_invalid_base_url_rejected() {
    let config = AsterClientConfig {
      base_url: "not a url".to_string(),
      ..AsterClientConfig::default()
    };
    assert!(AsterClient::new(None, config).is_err());
  }
}
