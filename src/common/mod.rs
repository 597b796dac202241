//! Common utilities shared by the runner and the mock server

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, QueryError, Result};

/// Normalize a `host:port` endpoint, defaulting the host to localhost.
///
/// Accepts a bare port (`28015`), `:28015`, or `host:port`.
pub fn parse_endpoint(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let (host, port) = match raw.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None => ("", raw),
    };
    let port: u16 = port.parse().ok()?;
    let host = if host.is_empty() { "127.0.0.1" } else { host };
    Some(format!("{}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(parse_endpoint("28015").as_deref(), Some("127.0.0.1:28015"));
        assert_eq!(parse_endpoint(":28016").as_deref(), Some("127.0.0.1:28016"));
        assert_eq!(
            parse_endpoint("db.local:28015").as_deref(),
            Some("db.local:28015")
        );
        assert_eq!(parse_endpoint("db.local"), None);
        assert_eq!(parse_endpoint("host:99999"), None);
    }
}
