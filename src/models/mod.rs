//! Data models representing database entities and API bodies.

/// API client authentication model
pub mod api_key;
/// Audit log entries
pub mod audit;
/// Single-use access keys
pub mod key;
/// Creator notification payloads
pub mod webhook;
