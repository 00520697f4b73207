//! HTTP handlers, grouped by resource.

pub mod inventory;
pub mod ops;
pub mod outbox;
pub mod sagas;

use axum::http::HeaderMap;

/// Reads the client's idempotency key from `header`.
pub(crate) fn idempotency_key(headers: &HeaderMap, header: &str) -> Option<String> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
