//! Common utility functions shared across CLI commands.

use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use regex_lite::Regex;
use serde_json::Value;

/// Viewer page for a published container.
///
/// Transforms `.../name.chif` into `.../index.html#name`; other URLs are
/// returned unchanged.
pub fn cdn_viewer_url(published: &str) -> String {
    static CONTAINER: OnceLock<Regex> = OnceLock::new();
    let pattern = CONTAINER
        .get_or_init(|| Regex::new(r"/([^/]+)\.chif$").expect("container pattern is valid"));
    pattern.replace(published, "/index.html#$1").into_owned()
}

/// Parse an event range bound: an RFC 3339 timestamp or a `YYYY-MM-DD`
/// date (midnight UTC).
pub fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("expected RFC 3339 timestamp or YYYY-MM-DD, got {value:?}"))
}

/// Pretty-print JSON on stdout.
pub fn print_json(value: &Value) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to format response")?;
    println!("{json}");
    Ok(())
}

/// A response body formatted for logs: indented when it is JSON.
pub fn pretty_body(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| body.to_string())
}
