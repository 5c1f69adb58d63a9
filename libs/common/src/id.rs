//! Prefixed ULID identifiers such as `conn_01J9Z3…`.

use ulid::Ulid;

/// Prefixes for ids minted by this service.
pub mod prefix {
    /// One gateway WebSocket connection.
    pub const CONNECTION: &str = "conn";
}

/// `{prefix}_{ulid}`. Unique per call and lexically sortable by creation time.
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{prefix}_{}", Ulid::new())
}
