use anyhow::Context as _;
use axum::http::{HeaderMap, StatusCode};
use serde_json::Value;

/// Assert HTTP status code with helpful error message
pub fn assert_status(actual: StatusCode, expected: StatusCode, context: &str) {
    assert_eq!(
        actual, expected,
        "{context}: expected status {expected}, got {actual}"
    );
}

pub fn json_body(body: &[u8]) -> anyhow::Result<Value> {
    serde_json::from_slice(body).context("parse JSON body")
}

/// Assert the error envelope `{"status":"false","message":...}`.
pub fn assert_error_body(body: &[u8]) -> anyhow::Result<String> {
    let value = json_body(body)?;
    assert_eq!(value["status"], "false", "error envelope: {value}");
    value["message"]
        .as_str()
        .map(str::to_string)
        .context("error message is a string")
}

/// Ids of the rows in a paged `data` array, in order.
pub fn page_ids(page: &Value) -> anyhow::Result<Vec<String>> {
    let rows = page["data"].as_array().context("page.data is array")?;
    Ok(rows
        .iter()
        .filter_map(|row| row["id"].as_str().map(str::to_string))
        .collect())
}

pub fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Whether any `Set-Cookie` header clears `cookie_name`.
pub fn clears_cookie(headers: &HeaderMap, cookie_name: &str) -> bool {
    headers
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.starts_with(&format!("{cookie_name}=;")) && v.contains("Max-Age=0"))
}
