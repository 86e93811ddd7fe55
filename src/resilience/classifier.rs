//! Failure classification.
//!
//! # Responsibilities
//! - Map a raw upstream failure to a closed set of `FailureKind`s
//! - Extract server-supplied retry hints (`Retry-After`, rate-limit reset)
//!
//! # Design Decisions
//! - Classification is pure and total; unrecognized input is `Unknown`
//! - Provider quota signals win over the HTTP status they arrive with
//! - GitHub reports exhausted primary rate limits as 403 with
//!   `x-ratelimit-remaining: 0`; that is `RateLimited`, not `Unauthorized`

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

/// Closed classification of an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network blip: timeout, reset, DNS.
    Transient,
    /// HTTP 429 or a provider quota signal.
    RateLimited,
    /// HTTP 401/403.
    Unauthorized,
    /// HTTP 400/422. Caller error.
    InvalidRequest,
    /// HTTP 404.
    NotFound,
    /// HTTP 5xx.
    ServerFault,
    /// Anything else.
    Unknown,
}

impl FailureKind {
    /// Kinds for which retrying, or trying another provider, cannot help.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FailureKind::InvalidRequest | FailureKind::NotFound | FailureKind::Unauthorized
        )
    }

    /// Kinds the executor retries against the same provider.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::Transient | FailureKind::RateLimited | FailureKind::ServerFault
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::InvalidRequest => "invalid_request",
            FailureKind::NotFound => "not_found",
            FailureKind::ServerFault => "server_fault",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network-level failure observed before any HTTP status was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Timeout,
    Connect,
    ConnectionReset,
    Dns,
}

/// A server-supplied hint about when capacity returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerHint {
    /// Relative delay (`Retry-After: <seconds>`, `retry-after-ms`).
    RetryAfter(Duration),
    /// Absolute reset time (`x-ratelimit-reset: <epoch seconds>`).
    ResetAt(SystemTime),
}

impl ServerHint {
    /// Delay until the hint is satisfied, never negative.
    pub fn delay_from(&self, now: SystemTime) -> Duration {
        match self {
            ServerHint::RetryAfter(delay) => *delay,
            ServerHint::ResetAt(reset) => reset.duration_since(now).unwrap_or(Duration::ZERO),
        }
    }
}

/// Provider error codes that mean "quota exhausted" regardless of status.
const QUOTA_CODES: &[&str] = &[
    "insufficient_quota",
    "rate_limit_exceeded",
    "rate_limit_error",
    "resource_exhausted",
    "quota_exceeded",
    "overloaded_error",
];

/// Raw failure produced by a unit of work.
#[derive(Debug, Clone, Default)]
pub struct RawFailure {
    pub status: Option<u16>,
    pub headers: HeaderMap,
    pub network: Option<NetworkErrorKind>,
    pub provider_error_code: Option<String>,
    pub hint: Option<ServerHint>,
    pub message: String,
}

impl RawFailure {
    /// Failure carrying an HTTP status.
    pub fn http(status: u16) -> Self {
        Self {
            status: Some(status),
            message: format!("upstream returned HTTP {}", status),
            ..Default::default()
        }
    }

    /// Failure raised below HTTP (timeout, reset, DNS).
    pub fn network(kind: NetworkErrorKind) -> Self {
        Self {
            network: Some(kind),
            message: format!("network error: {:?}", kind),
            ..Default::default()
        }
    }

    /// Failure that carries nothing classifiable.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_error_code = Some(code.into());
        self
    }

    pub fn with_hint(mut self, hint: ServerHint) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// True when the provider body signalled an exhausted quota.
    pub fn signals_quota(&self) -> bool {
        self.provider_error_code
            .as_deref()
            .map(|code| QUOTA_CODES.iter().any(|q| q.eq_ignore_ascii_case(code.trim())))
            .unwrap_or(false)
    }

    fn header_str(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    }

    fn rate_limit_exhausted(&self) -> bool {
        self.header_str("x-ratelimit-remaining") == Some("0")
    }

    /// Server hint, explicit first, then from headers.
    pub fn server_hint(&self) -> Option<ServerHint> {
        if let Some(hint) = self.hint {
            return Some(hint);
        }

        if let Some(ms) = self.header_str("retry-after-ms").and_then(|v| v.parse::<u64>().ok()) {
            return Some(ServerHint::RetryAfter(Duration::from_millis(ms)));
        }

        if let Some(secs) = self.header_str("retry-after").and_then(|v| v.parse::<u64>().ok()) {
            return Some(ServerHint::RetryAfter(Duration::from_secs(secs)));
        }

        if self.rate_limit_exhausted() {
            // Out-of-range reset times are ignored rather than trusted.
            return self
                .header_str("x-ratelimit-reset")
                .and_then(|v| v.parse::<u64>().ok())
                .and_then(|epoch| UNIX_EPOCH.checked_add(Duration::from_secs(epoch)))
                .map(ServerHint::ResetAt);
        }

        None
    }
}

/// Classify a raw failure. Never panics; unrecognized input is `Unknown`.
pub fn classify(failure: &RawFailure) -> FailureKind {
    if failure.signals_quota() {
        return FailureKind::RateLimited;
    }

    if let Some(status) = failure.status {
        return match status {
            400 | 422 => FailureKind::InvalidRequest,
            403 if failure.rate_limit_exhausted() => FailureKind::RateLimited,
            401 | 403 => FailureKind::Unauthorized,
            404 => FailureKind::NotFound,
            429 => FailureKind::RateLimited,
            500..=599 => FailureKind::ServerFault,
            _ => FailureKind::Unknown,
        };
    }

    if failure.network.is_some() {
        return FailureKind::Transient;
    }

    FailureKind::Unknown
}
