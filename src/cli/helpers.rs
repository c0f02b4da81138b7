//! Shared helper functions for CLI commands.

use console::style;
use serde_json::{json, Value};

use crate::coordinator::LookupOutcome;

/// Format bytes as human-readable size.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.2} GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.2} MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.2} KB", bytes as f64 / 1_000.0)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format a millisecond span as `1h 2m 3s`.
pub fn format_duration_ms(ms: u64) -> String {
    let secs = ms / 1000;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Turn user input into a lookup key: trimmed, without a leading `@`.
/// Case is preserved.
pub fn normalize_handle(raw: &str) -> Option<String> {
    let handle = raw.trim().trim_start_matches('@').trim();
    (!handle.is_empty()).then(|| handle.to_string())
}

/// One lookup outcome as a JSON object.
pub fn outcome_json(handle: &str, outcome: &LookupOutcome) -> Value {
    match outcome {
        Ok(result) => json!({ "handle": handle, "result": result }),
        Err(e) => json!({
            "handle": handle,
            "error": { "code": e.code(), "message": e.to_string() }
        }),
    }
}

/// One lookup outcome as a styled line.
pub fn outcome_line(handle: &str, outcome: &LookupOutcome) -> String {
    match outcome {
        Ok(result) => {
            let mut details = Vec::new();
            match result.location_accurate {
                Some(true) => details.push("accurate".to_string()),
                Some(false) => details.push("approximate".to_string()),
                None => {}
            }
            if let Some(count) = result.username_change_count {
                details.push(format!("{} username changes", count));
            }

            let country = match result.country {
                Some(ref c) => style(c.clone()).green().to_string(),
                None => style("Unknown").dim().to_string(),
            };
            if details.is_empty() {
                format!("@{:<24} {}", handle, country)
            } else {
                format!(
                    "@{:<24} {} {}",
                    handle,
                    country,
                    style(format!("({})", details.join(", "))).dim()
                )
            }
        }
        Err(e) => format!(
            "@{:<24} {} {}",
            handle,
            style(e.code()).red(),
            style(e.to_string()).dim()
        ),
    }
}
