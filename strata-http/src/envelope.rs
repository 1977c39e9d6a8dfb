use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cursor::Cursor;
use crate::error::Error;

/// Response metadata block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub code: u16,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Pagination block attached to paged responses. The next cursor appears
/// both as a JSON object and as a ready-made query-string continuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(rename = "nextCursor")]
    pub next_cursor: Cursor,
    #[serde(rename = "nextCursorQuery")]
    pub next_cursor_query: String,
}

/// The `{ data, meta, pagination }` envelope every bridge response uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    pub meta: Meta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl Envelope {
    /// A successful response with no pagination.
    pub fn data(data: Value, warnings: Vec<String>) -> Self {
        Self {
            data,
            meta: Meta {
                code: 200,
                status: "OK".to_string(),
                error: None,
                warnings,
            },
            pagination: None,
        }
    }

    /// A successful paged response carrying a continuation cursor.
    pub fn paged(data: Value, cursor: Cursor, warnings: Vec<String>) -> Self {
        let next_cursor_query = cursor.to_query_string();
        Self {
            pagination: Some(Pagination {
                next_cursor: cursor,
                next_cursor_query,
            }),
            ..Self::data(data, warnings)
        }
    }

    /// An error response. The status line is the canonical reason phrase for
    /// the kind's status code.
    pub fn error(err: &Error) -> Self {
        let code = err.status_code();
        let status = http::StatusCode::from_u16(code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Error")
            .to_string();
        Self {
            data: Value::Null,
            meta: Meta {
                code,
                status,
                error: Some(err.message().to_string()),
                warnings: Vec::new(),
            },
            pagination: None,
        }
    }

    /// Whether the envelope reports success, judged by `meta.code` alone.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.meta.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_envelope_shape() {
        let env = Envelope::data(json!({"name": "ds"}), Vec::new());
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["data"]["name"], "ds");
        assert_eq!(v["meta"]["code"], 200);
        assert!(v.get("pagination").is_none());
        assert!(v["meta"].get("warnings").is_none());
    }

    #[test]
    fn paged_envelope_carries_both_cursor_forms() {
        let cursor = Cursor::new().set("limit", 25).set("offset", 35);
        let env = Envelope::paged(json!([]), cursor, Vec::new());
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["pagination"]["nextCursor"]["offset"], 35);
        assert_eq!(
            v["pagination"]["nextCursorQuery"],
            "?limit=25&offset=35"
        );
    }

    #[test]
    fn error_envelope_uses_canonical_status() {
        let env = Envelope::error(&Error::not_found("no such dataset"));
        assert_eq!(env.meta.code, 404);
        assert_eq!(env.meta.status, "Not Found");
        assert_eq!(env.meta.error.as_deref(), Some("no such dataset"));
        assert!(!env.ok());
    }

    #[test]
    fn warnings_ride_in_meta() {
        let env = Envelope::data(json!(1), vec!["deprecated filter".to_string()]);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["meta"]["warnings"][0], "deprecated filter");
    }
}
