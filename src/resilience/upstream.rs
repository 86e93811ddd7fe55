//! HTTP upstream adapter.
//!
//! # Responsibilities
//! - Turn reqwest responses and transport errors into `RawFailure`s
//! - Pull provider error codes out of JSON error bodies
//! - Offer `send_json` so a reqwest call can be handed straight to the executor

use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::resilience::classifier::{NetworkErrorKind, RawFailure};

/// JSON pointers probed, in order, for a provider error code.
const CODE_POINTERS: &[&str] = &["/error/code", "/error/type", "/error/status", "/code", "/type"];

const MESSAGE_POINTERS: &[&str] = &["/error/message", "/message"];

fn string_at<'a>(body: &'a Value, pointer: &str) -> Option<&'a str> {
    body.pointer(pointer).and_then(Value::as_str)
}

/// Provider error code in an error body. Quota codes win over other codes.
pub fn provider_error_code(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    let codes: Vec<&str> = CODE_POINTERS.iter().filter_map(|p| string_at(&json, p)).collect();

    codes
        .iter()
        .find(|code| RawFailure::other("").with_provider_code(**code).signals_quota())
        .or_else(|| codes.first())
        .map(|code| code.to_string())
}

fn provider_error_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    MESSAGE_POINTERS
        .iter()
        .find_map(|p| string_at(&json, p))
        .map(str::to_string)
}

/// Failure from a non-success HTTP response.
pub fn failure_from_response(status: StatusCode, headers: HeaderMap, body: &str) -> RawFailure {
    let mut failure = RawFailure::http(status.as_u16()).with_headers(headers);

    if let Some(code) = provider_error_code(body) {
        failure = failure.with_provider_code(code);
    }
    if let Some(message) = provider_error_message(body) {
        failure = failure.with_message(format!("HTTP {}: {}", status.as_u16(), message));
    }
    failure
}

/// Failure from a transport-level reqwest error.
pub fn failure_from_transport(error: &reqwest::Error) -> RawFailure {
    if let Some(status) = error.status() {
        return RawFailure::http(status.as_u16()).with_message(error.to_string());
    }

    let network = if error.is_timeout() {
        Some(NetworkErrorKind::Timeout)
    } else if error.is_connect() {
        Some(NetworkErrorKind::Connect)
    } else if error.is_request() || error.is_body() {
        Some(NetworkErrorKind::ConnectionReset)
    } else {
        None
    };

    match network {
        Some(kind) => RawFailure::network(kind).with_message(error.to_string()),
        None => RawFailure::other(error.to_string()),
    }
}

/// Send a request and decode a JSON body, or describe the failure.
pub async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, RawFailure> {
    let response = request.send().await.map_err(|e| failure_from_transport(&e))?;
    let status = response.status();

    if !status.is_success() {
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        return Err(failure_from_response(status, headers, &body));
    }

    response.json::<T>().await.map_err(|e| failure_from_transport(&e))
}
