//! API constants

/// Versioned prefix of every API route except health checks.
pub const API_PREFIX: &str = "/api/v0";

/// Largest accepted request body. Batch requests are lists of ids.
pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Default for the concurrency limit applied in front of every route.
pub const DEFAULT_HTTP_CONCURRENCY_LIMIT: usize = 10_000;
