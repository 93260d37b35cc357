//! Application configuration: constants plus environment overrides.

use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;

/// Application-level constants
pub const APP_NAME: &str = "labsync";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Ceiling for numeric analysis channel readings (PCR cycle threshold).
/// A channel value at or above this is a malformed reading and the action
/// is rejected before any state change.
pub const CHANNEL_VALUE_CEILING: f64 = 45.0;

/// A result date must fall within this many days before "today" (inclusive)
/// in the organization's time zone.
pub const RESULT_WINDOW_DAYS: i64 = 30;

/// Base URL of the external scheduling service API.
pub fn scheduling_base_url() -> String {
    std::env::var("LABSYNC_SCHEDULING_URL")
        .unwrap_or_else(|_| "https://acuityscheduling.com/api/v1".to_string())
}

/// Basic-auth user id for the scheduling service.
pub fn scheduling_user() -> String {
    std::env::var("LABSYNC_SCHEDULING_USER").unwrap_or_default()
}

/// Basic-auth API key for the scheduling service.
pub fn scheduling_api_key() -> String {
    std::env::var("LABSYNC_SCHEDULING_KEY").unwrap_or_default()
}

/// Base URL of the report delivery service (email/fax transport).
pub fn dispatch_base_url() -> String {
    std::env::var("LABSYNC_DISPATCH_URL").unwrap_or_else(|_| "http://localhost:9820".to_string())
}

/// Timeout applied to every upstream call (scheduling fetch, dispatch).
pub fn upstream_timeout() -> Duration {
    let secs = std::env::var("LABSYNC_UPSTREAM_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
    Duration::from_secs(secs)
}

/// The organization's UTC offset in hours. The 30-day result window is
/// evaluated against "today" in this zone, not the server's zone.
pub fn org_utc_offset() -> FixedOffset {
    let hours: i32 = std::env::var("LABSYNC_ORG_UTC_OFFSET_HOURS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(-5);
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
}

/// Prefix for allocated test-kit barcodes.
pub fn barcode_prefix() -> String {
    std::env::var("LABSYNC_BARCODE_PREFIX").unwrap_or_else(|_| "KIT".to_string())
}

/// Path of the SQLite database file.
pub fn database_path() -> PathBuf {
    std::env::var("LABSYNC_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("labsync.db"))
}

/// Socket address the HTTP server binds.
pub fn bind_addr() -> String {
    std::env::var("LABSYNC_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}

/// Default log filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    "info,labsync=debug".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_name_is_labsync() {
        assert_eq!(APP_NAME, "labsync");
    }

    #[test]
    fn channel_ceiling_is_pcr_range() {
        assert!(CHANNEL_VALUE_CEILING > 0.0 && CHANNEL_VALUE_CEILING <= 50.0);
    }

    #[test]
    fn scheduling_url_has_default() {
        assert!(scheduling_base_url().starts_with("http"));
    }

    #[test]
    fn upstream_timeout_nonzero() {
        assert!(upstream_timeout().as_secs() > 0);
    }

    #[test]
    fn org_offset_is_valid() {
        let off = org_utc_offset();
        assert!(off.local_minus_utc().abs() <= 14 * 3600);
    }
}
