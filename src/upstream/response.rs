//! Interpretation of upstream responses.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use super::transport::TransportResponse;
use crate::models::{parse_count, LookupResult};

pub const RATE_LIMIT_RESET_HEADER: &str = "x-rate-limit-reset";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-rate-limit-remaining";

/// What a rate-limit response said about recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHint {
    /// When the upstream window resets.
    pub reset_at: Option<DateTime<Utc>>,
    /// Remaining quota as reported.
    pub remaining: Option<String>,
}

impl RateLimitHint {
    pub fn from_response(response: &TransportResponse) -> Self {
        Self {
            reset_at: response
                .header(RATE_LIMIT_RESET_HEADER)
                .and_then(parse_reset_seconds),
            remaining: remaining_quota(response),
        }
    }
}

/// `x-rate-limit-reset` is unix seconds.
pub fn parse_reset_seconds(raw: &str) -> Option<DateTime<Utc>> {
    let secs: i64 = raw.trim().parse().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

pub fn remaining_quota(response: &TransportResponse) -> Option<String> {
    response
        .header(RATE_LIMIT_REMAINING_HEADER)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract the account profile from a response body.
///
/// A well-formed body without a profile is an unknown country, not an error.
pub fn parse_profile(body: &str) -> Result<LookupResult, serde_json::Error> {
    let data: Value = serde_json::from_str(body)?;

    let about = data
        .pointer("/data/user_result_by_screen_name/result/about_profile")
        .filter(|v| v.is_object());

    let Some(about) = about else {
        return Ok(LookupResult::default());
    };

    Ok(LookupResult {
        country: about
            .get("account_based_in")
            .and_then(Value::as_str)
            .map(str::to_string),
        location_accurate: about.get("location_accurate").and_then(Value::as_bool),
        username_change_count: about
            .pointer("/username_changes/count")
            .and_then(parse_count),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_profile_full() {
        let body = r#"{"data":{"user_result_by_screen_name":{"result":{"about_profile":{
            "account_based_in":"Japan","location_accurate":false,
            "username_changes":{"count":"2"}}}}}}"#;
        let result = parse_profile(body).unwrap();
        assert_eq!(result.country.as_deref(), Some("Japan"));
        assert_eq!(result.location_accurate, Some(false));
        assert_eq!(result.username_change_count, Some(2));
    }

    #[test]
    fn test_parse_profile_missing_is_unknown() {
        let body = r#"{"data":{"user_result_by_screen_name":{"result":{}}}}"#;
        assert_eq!(parse_profile(body).unwrap(), LookupResult::default());
        assert_eq!(parse_profile("{}").unwrap(), LookupResult::default());
    }

    #[test]
    fn test_parse_profile_rejects_garbage() {
        assert!(parse_profile("<html>").is_err());
    }

    #[test]
    fn test_rate_limit_hint() {
        let response = TransportResponse::new(429, "")
            .with_header("X-Rate-Limit-Reset", "1700000000")
            .with_header("x-rate-limit-remaining", "0");
        let hint = RateLimitHint::from_response(&response);
        assert_eq!(hint.reset_at.map(|t| t.timestamp()), Some(1_700_000_000));
        assert_eq!(hint.remaining.as_deref(), Some("0"));

        let bare = RateLimitHint::from_response(&TransportResponse::new(429, ""));
        assert_eq!(bare, RateLimitHint::default());
    }

    #[test]
    fn test_parse_reset_seconds_rejects_non_numeric() {
        assert!(parse_reset_seconds("soon").is_none());
    }
}
