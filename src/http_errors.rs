// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP status code mapping for Dynatrace API responses.
//!
//! The Dynatrace API client never interprets status codes itself; every non-success
//! response goes through [`classify_status`], which decides the error class the root
//! reconciler acts on. Throttling (429) and maintenance (503) must stay
//! distinguishable from real failures, because they only shorten the requeue
//! interval.
//!
//! # Usage
//!
//! ```rust
//! use dynakube_operator::http_errors::classify_status;
//!
//! assert!(classify_status(429, "too many requests").is_unreachable());
//! assert!(!classify_status(500, "boom").is_unreachable());
//! ```

use crate::errors::Error;

/// Reason used when the tenant throttles or is down
pub const REASON_DYNATRACE_UNREACHABLE: &str = "DynatraceApiUnreachable";

/// Reason used when the tenant rejects the credentials
pub const REASON_DYNATRACE_AUTH_FAILED: &str = "DynatraceApiAuthFailed";

/// Reason used when the requested object does not exist on the tenant
pub const REASON_DYNATRACE_NOT_FOUND: &str = "DynatraceApiNotFound";

/// Reason used for any other error response
pub const REASON_DYNATRACE_ERROR: &str = "DynatraceApiError";

/// Convert a non-success Dynatrace response into an [`Error`].
///
/// # Arguments
///
/// * `status_code` - HTTP status code of the response
/// * `body` - Response body, kept as the error message
///
/// # HTTP Code Mapping
///
/// | HTTP Code | Error |
/// |-----------|-------|
/// | 429, 503 | [`Error::Unreachable`] |
/// | 401, 403 | [`Error::Token`] |
/// | Other | [`Error::DynatraceApi`] |
#[must_use]
pub fn classify_status(status_code: u16, body: &str) -> Error {
    match status_code {
        429 | 503 => Error::unreachable(status_code, body),
        401 | 403 => Error::Token(format!(
            "Dynatrace API rejected the token (HTTP {status_code}): {body}"
        )),
        _ => Error::DynatraceApi {
            status: status_code,
            message: body.to_string(),
        },
    }
}

/// Map an HTTP status code to a condition reason and message.
///
/// # Returns
///
/// A tuple of `(reason, message)` for status conditions written by components that
/// talk to the Dynatrace API.
#[must_use]
pub fn map_http_error_to_reason(status_code: u16) -> (&'static str, String) {
    match status_code {
        429 => (
            REASON_DYNATRACE_UNREACHABLE,
            "Dynatrace API is throttling requests (429)".into(),
        ),
        503 => (
            REASON_DYNATRACE_UNREACHABLE,
            "Dynatrace API temporarily unavailable (503)".into(),
        ),
        401 => (
            REASON_DYNATRACE_AUTH_FAILED,
            "Dynatrace API authentication required (401)".into(),
        ),
        403 => (
            REASON_DYNATRACE_AUTH_FAILED,
            "Dynatrace API authorization failed (403)".into(),
        ),
        404 => (
            REASON_DYNATRACE_NOT_FOUND,
            "Resource not found on Dynatrace tenant (404)".into(),
        ),
        _ => (
            REASON_DYNATRACE_ERROR,
            format!("Unexpected HTTP error from Dynatrace API ({status_code})"),
        ),
    }
}
