//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol_constants::{APP_NAME, UUID_PREFIX};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Formats the current time as an RFC 1123 date for the SSDP `DATE` header.
#[must_use]
pub fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the `SERVER` banner advertised on every outbound datagram.
///
/// Format: `<os>/<arch> DLNADOC/1.50 UPnP/1.0 chirp/<version>`.
#[must_use]
pub fn server_banner() -> String {
    format!(
        "{}/{} DLNADOC/1.50 UPnP/1.0 {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        APP_NAME,
        env!("CARGO_PKG_VERSION")
    )
}

/// Returns the machine hostname, or `"localhost"` if it cannot be read.
#[must_use]
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Strips a leading `uuid:` prefix, if present.
#[must_use]
pub fn strip_uuid_prefix(value: &str) -> &str {
    value.strip_prefix(UUID_PREFIX).unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_banner_carries_dlna_tokens() {
        let banner = server_banner();
        assert!(banner.contains("DLNADOC/1.50 UPnP/1.0"));
        assert!(banner.contains("chirp/"));
    }

    #[test]
    fn http_date_is_gmt() {
        let date = http_date();
        assert!(date.ends_with(" GMT"));
        // "Sun, 06 Nov 1994 08:49:37 GMT"
        assert_eq!(date.len(), 29);
    }

    #[test]
    fn strip_uuid_prefix_handles_both_forms() {
        assert_eq!(strip_uuid_prefix("uuid:abc"), "abc");
        assert_eq!(strip_uuid_prefix("abc"), "abc");
    }
}
